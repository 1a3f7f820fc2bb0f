use std::env;
use std::path::Path;
use std::process::Command;

const EBPF_TARGET: &str = "bpfel-unknown-none";

fn main() {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("build-ebpf") => {
            let release = args.iter().any(|a| a == "--release");
            if let Err(e) = build_ebpf(release) {
                eprintln!("Failed to build eBPF object: {e}");
                std::process::exit(1);
            }
        }
        Some("build-all") => {
            let target = args.get(2).map(String::as_str);
            if let Err(e) = build_all(target) {
                eprintln!("Failed to build: {e}");
                std::process::exit(1);
            }
        }
        Some("run-agent") => {
            if let Err(e) = run_agent(&args[2..]) {
                eprintln!("Failed to run agent: {e}");
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("Usage:");
            eprintln!("  xtask build-ebpf [--release]      - Build the kprobe object");
            eprintln!("  xtask build-all [target]          - Build kprobes + Rust binaries");
            eprintln!("  xtask run-agent [agent args...]   - Build kprobes and run the agent (needs root)");
            eprintln!();
            eprintln!("Examples:");
            eprintln!("  xtask build-ebpf --release");
            eprintln!("  xtask build-all x86_64-unknown-linux-musl");
            eprintln!("  xtask run-agent -- --socket /tmp/sysmon.sock");
        }
    }
}

fn build_ebpf(release: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = Path::new("sysmon-ebpf");
    println!("Building kprobes in {} for {}", dir.display(), EBPF_TARGET);

    let mut cmd = Command::new("cargo");
    cmd.current_dir(dir)
        .args(["+nightly", "build", "-Z", "build-std=core", "--target", EBPF_TARGET])
        // The object lands next to the userspace binaries.
        .args(["--target-dir", "../target"]);
    if release {
        cmd.arg("--release");
    }
    let status = cmd.status()?;
    if !status.success() {
        return Err("cargo build of sysmon-ebpf failed".into());
    }

    let profile = if release { "release" } else { "debug" };
    println!(
        "✓ Kprobe object built: target/{}/{}/sysmon-ebpf",
        EBPF_TARGET, profile
    );
    Ok(())
}

fn build_all(target: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let rust_target = match target {
        Some(t @ ("aarch64-unknown-linux-musl"
        | "x86_64-unknown-linux-musl"
        | "aarch64-unknown-linux-gnu"
        | "x86_64-unknown-linux-gnu")) => t.to_string(),
        None => match env::consts::ARCH {
            "x86_64" => "x86_64-unknown-linux-musl".to_string(),
            "aarch64" => "aarch64-unknown-linux-musl".to_string(),
            other => return Err(format!("Unsupported host architecture: {}", other).into()),
        },
        Some(other) => return Err(format!("Unsupported target: {}", other).into()),
    };

    println!("\n=== Building for target: {} ===", rust_target);

    println!("\n[1/2] Building kprobe object...");
    build_ebpf(true)?;

    println!("\n[2/2] Building Rust binaries...");
    let has_zigbuild = Command::new("cargo")
        .args(["zigbuild", "--version"])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);

    let cargo_cmd = if rust_target.contains("musl") && has_zigbuild {
        println!("Using cargo-zigbuild for static musl compilation");
        "zigbuild"
    } else {
        println!("Using cargo build");
        "build"
    };

    let status = Command::new("cargo")
        .arg(cargo_cmd)
        .args(["--release", "--target", &rust_target])
        .status()?;
    if !status.success() {
        return Err("cargo build failed".into());
    }

    println!("\n✓ Build completed successfully!");
    println!("Binaries located at: target/{}/release/", rust_target);
    Ok(())
}

fn run_agent(extra: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    build_ebpf(true)?;
    let bpf_obj = format!("target/{}/release/sysmon-ebpf", EBPF_TARGET);
    let extra = match extra.first().map(String::as_str) {
        Some("--") => &extra[1..],
        _ => extra,
    };

    println!("Running agent: cargo run -p sysmon-agent --release");
    let status = Command::new("cargo")
        .args(["run", "-p", "sysmon-agent", "--release", "--"])
        .args(["--bpf-obj", &bpf_obj])
        .args(extra)
        .status()?;
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
