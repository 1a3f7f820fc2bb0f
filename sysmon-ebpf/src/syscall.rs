//! Syscall-entry kprobes for open, read and write
//!
//! Denial uses `bpf_override_return`, so the attach points must be the
//! error-injectable syscall wrappers (`__x64_sys_*` / `__arm64_sys_*`).

use aya_ebpf::{
    helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_ktime_get_ns, gen},
    macros::{kprobe, map},
    maps::RingBuf,
    programs::ProbeContext,
};
use sysmon_common::{decide_unless_exempt, OperationKind, Outcome, SyscallEvent, Verdict, MAX_COMM_LEN};

use crate::{get_exempt, get_policy};

/// Ring buffer for recorded calls
#[map(name = "EVENTS")]
static EVENTS: RingBuf = RingBuf::with_byte_size(256 * 1024, 0);

const EPERM: i64 = 1;

#[kprobe]
pub fn sysmon_open(ctx: ProbeContext) -> u32 {
    intercept(&ctx, OperationKind::Open)
}

#[kprobe]
pub fn sysmon_read(ctx: ProbeContext) -> u32 {
    intercept(&ctx, OperationKind::Read)
}

#[kprobe]
pub fn sysmon_write(ctx: ProbeContext) -> u32 {
    intercept(&ctx, OperationKind::Write)
}

#[inline(always)]
fn intercept(ctx: &ProbeContext, kind: OperationKind) -> u32 {
    let policy = get_policy();
    let pid_tgid = bpf_get_current_pid_tgid();
    let tgid = (pid_tgid >> 32) as u32;

    let verdict = decide_unless_exempt(&policy, get_exempt(), kind, tgid);
    if let Some(outcome) = verdict.outcome() {
        send_event(kind, outcome, tgid, pid_tgid as u32);
    }
    if verdict == Verdict::Deny {
        unsafe {
            gen::bpf_override_return(ctx.regs, (-EPERM) as u64);
        }
    }
    0
}

/// Best effort: a full ring buffer drops the record, never the call.
#[inline(always)]
fn send_event(kind: OperationKind, outcome: Outcome, pid: u32, tid: u32) {
    let mut event = SyscallEvent::new(kind, outcome, pid, tid);
    event.timestamp_ns = unsafe { bpf_ktime_get_ns() };
    if let Ok(comm) = bpf_get_current_comm() {
        event.comm[..MAX_COMM_LEN].copy_from_slice(&comm);
    }
    let _ = EVENTS.output(&event, 0);
}
