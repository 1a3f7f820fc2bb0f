#![cfg_attr(not(feature = "user"), no_std)]

pub mod ebpf;
#[cfg(feature = "user")]
pub mod config;
pub mod event;
pub mod operation;
pub mod policy;

#[cfg(feature = "user")]
pub use config::{ConfigError, FsmConfig};
pub use ebpf::{PolicyConfig, SyscallEvent, MAX_COMM_LEN};
#[cfg(feature = "user")]
pub use event::InterceptionEvent;
pub use event::{Outcome, EVENT_MARKER};
pub use operation::{Decision, EnforcementMode, OperationKind};
#[cfg(feature = "user")]
pub use operation::UnknownOperation;
pub use policy::{decide, decide_unless_exempt, ProcessFilter, Verdict, ANY_PROCESS, NO_EXEMPTION};

/// Process identifier as seen by the hooks. Signed so that `-1` can mean "any".
pub type ProcessId = i32;
