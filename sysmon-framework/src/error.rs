use serde::{Deserialize, Serialize};
use sysmon_common::OperationKind;
use thiserror::Error;

use sysmon_probes::ProbeError;

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("control channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// A control request carrying a value outside its enumeration. Rejected at
/// the channel boundary before anything reaches the policy store.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("invalid mode {value} (must be 0=OFF, 1=LOG or 2=BLOCK)")]
    InvalidMode { value: i64 },

    #[error("invalid operation {value} (must be 0=open, 1=read or 2=write)")]
    InvalidOperation { value: i64 },

    #[error("process id {value} is out of range")]
    InvalidProcess { value: i64 },

    #[error("invalid syscall name: {name} (must be: open, read, or write)")]
    UnknownOperationName { name: String },
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("request rejected: {0}")]
    Validation(#[from] ValidationError),

    /// The core could not be reached, or stopped answering.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be decoded; the connection is still usable.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The peer broke framing or answered out of turn.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum FsmError {
    #[error("FSM must have at least one state")]
    Empty,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("control channel failed: {0}")]
    Channel(#[from] ChannelError),

    /// The bounded wait ran out before the operation was observed.
    #[error("detection timeout: no {operation}() observed after {polls} polls")]
    DetectionTimeout { operation: OperationKind, polls: u32 },
}
