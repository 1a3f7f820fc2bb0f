//! Records exchanged with the kernel-side probes.
//!
//! Both structs are plain `repr(C)` data so they can sit in BPF maps and in
//! the event ring buffer without any encoding step.

use crate::event::Outcome;
use crate::operation::{EnforcementMode, OperationKind};
use crate::policy::ProcessFilter;

/// Maximum length for command names
pub const MAX_COMM_LEN: usize = 16;

/// Name of the single-slot array map holding the active [`PolicyConfig`].
pub const POLICY_MAP: &str = "POLICY";

/// Name of the ring buffer carrying [`SyscallEvent`]s to userspace.
pub const EVENTS_MAP: &str = "EVENTS";

/// Name of the single-slot array map holding the exempt thread-group id
/// (the agent itself). `0` exempts nobody.
pub const EXEMPT_MAP: &str = "EXEMPT";

/// Kprobe program names, indexed by [`OperationKind`].
pub const PROGRAM_NAMES: [&str; 3] = ["sysmon_open", "sysmon_read", "sysmon_write"];

/// Active policy as stored in the kernel map and packed into the userspace
/// atomic. Fields are raw bytes on purpose: anything out of range is treated
/// as "off" by [`crate::decide`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub mode: u8,
    pub target: u8,
    pub padding: [u8; 2],
    pub target_pid: i32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::new(EnforcementMode::Off, OperationKind::Open, ProcessFilter::Any)
    }
}

impl PolicyConfig {
    pub const fn new(mode: EnforcementMode, target: OperationKind, filter: ProcessFilter) -> Self {
        Self {
            mode: mode as u8,
            target: target as u8,
            padding: [0; 2],
            target_pid: filter.raw(),
        }
    }

    /// Pack into a single word so the whole triple can be swapped atomically.
    pub const fn to_bits(self) -> u64 {
        (self.mode as u64) | ((self.target as u64) << 8) | ((self.target_pid as u32 as u64) << 32)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self {
            mode: bits as u8,
            target: (bits >> 8) as u8,
            padding: [0; 2],
            target_pid: (bits >> 32) as u32 as i32,
        }
    }
}

/// Event record written by the kernel probes into the ring buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SyscallEvent {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub operation: u8,
    pub outcome: u8,
    pub padding: [u8; 6],
    pub comm: [u8; MAX_COMM_LEN],
}

impl SyscallEvent {
    pub const fn new(operation: OperationKind, outcome: Outcome, pid: u32, tid: u32) -> Self {
        Self {
            timestamp_ns: 0,
            pid,
            tid,
            operation: operation as u8,
            outcome: outcome as u8,
            padding: [0; 6],
            comm: [0; MAX_COMM_LEN],
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PolicyConfig {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for SyscallEvent {}
