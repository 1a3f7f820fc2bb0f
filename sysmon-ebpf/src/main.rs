//! sysmon kernel-space probes (Aya-based)
//!
//! One kprobe per monitored syscall. Each reads the policy slot, runs the
//! shared decision and reports recorded calls through a ring buffer.

#![no_std]
#![no_main]

mod syscall;

use aya_ebpf::{macros::map, maps::Array};
use sysmon_common::PolicyConfig;

/// Active policy, slot 0. Written by the agent only.
#[map(name = "POLICY")]
static POLICY: Array<PolicyConfig> = Array::with_max_entries(1, 0);

/// Current policy, or the all-off default when the slot cannot be read.
#[inline(always)]
pub fn get_policy() -> PolicyConfig {
    match POLICY.get(0) {
        Some(policy) => *policy,
        None => PolicyConfig::default(),
    }
}

/// Thread-group id whose calls are never decided on, slot 0.
#[map(name = "EXEMPT")]
static EXEMPT: Array<u32> = Array::with_max_entries(1, 0);

#[inline(always)]
pub fn get_exempt() -> u32 {
    match EXEMPT.get(0) {
        Some(tgid) => *tgid,
        None => 0,
    }
}

#[no_mangle]
#[link_section = "license"]
pub static LICENSE: [u8; 4] = *b"GPL\0";

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
