//! Build script for the sysmon kprobes
//!
//! Rebuild whenever the shared policy code changes, since it is compiled
//! into the probes.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=../sysmon-common/src/");
}
