#[cfg(feature = "user")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "user")]
use crate::ebpf::SyscallEvent;
#[cfg(feature = "user")]
use crate::operation::OperationKind;
#[cfg(feature = "user")]
use crate::ProcessId;

/// Fixed token prefixed to every event line; consumers grep for it.
pub const EVENT_MARKER: &str = "SYSCALL_MONITOR";

/// What the hook did with an intercepted call that it recorded.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "user", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "user", serde(rename_all = "lowercase"))]
pub enum Outcome {
    Observed = 0,
    Denied = 1,
}

impl Outcome {
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Outcome::Observed),
            1 => Some(Outcome::Denied),
            _ => None,
        }
    }
}

/// One recorded interception. Immutable once created.
#[cfg(feature = "user")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptionEvent {
    pub operation: OperationKind,
    pub process_id: ProcessId,
    pub outcome: Outcome,
}

#[cfg(feature = "user")]
impl InterceptionEvent {
    pub fn observed(operation: OperationKind, process_id: ProcessId) -> Self {
        Self {
            operation,
            process_id,
            outcome: Outcome::Observed,
        }
    }

    pub fn denied(operation: OperationKind, process_id: ProcessId) -> Self {
        Self {
            operation,
            process_id,
            outcome: Outcome::Denied,
        }
    }
}

/// Renders the log line consumers match on, e.g.
/// `SYSCALL_MONITOR: PID=812 called read()`.
#[cfg(feature = "user")]
impl std::fmt::Display for InterceptionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.outcome {
            Outcome::Observed => write!(
                f,
                "{}: PID={} called {}()",
                EVENT_MARKER, self.process_id, self.operation
            ),
            Outcome::Denied => write!(
                f,
                "{}: Blocking {}() for PID={}",
                EVENT_MARKER, self.operation, self.process_id
            ),
        }
    }
}

/// Kernel records carry raw bytes; anything that does not decode is dropped
/// by the caller rather than guessed at.
#[cfg(feature = "user")]
impl TryFrom<&SyscallEvent> for InterceptionEvent {
    type Error = u8;

    fn try_from(raw: &SyscallEvent) -> Result<Self, Self::Error> {
        let operation = OperationKind::from_raw(raw.operation).ok_or(raw.operation)?;
        let outcome = Outcome::from_raw(raw.outcome).ok_or(raw.outcome)?;
        Ok(Self {
            operation,
            process_id: raw.pid as ProcessId,
            outcome,
        })
    }
}

#[cfg(all(test, feature = "user"))]
mod tests {
    use super::*;

    #[test]
    fn log_lines_carry_marker_and_operation() {
        let seen = InterceptionEvent::observed(OperationKind::Read, 812);
        assert_eq!(seen.to_string(), "SYSCALL_MONITOR: PID=812 called read()");

        let denied = InterceptionEvent::denied(OperationKind::Open, 9);
        assert_eq!(denied.to_string(), "SYSCALL_MONITOR: Blocking open() for PID=9");
    }

    #[test]
    fn kernel_record_decodes() {
        let raw = SyscallEvent::new(OperationKind::Write, Outcome::Denied, 77, 78);
        let event = InterceptionEvent::try_from(&raw).unwrap();
        assert_eq!(event, InterceptionEvent::denied(OperationKind::Write, 77));

        let mut bad = raw;
        bad.operation = 5;
        assert_eq!(InterceptionEvent::try_from(&bad), Err(5));
    }
}
