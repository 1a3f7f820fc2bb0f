#[cfg(feature = "user")]
use serde::{Deserialize, Serialize};

/// The monitored system operations. The discriminants are the stable
/// encoding shared with the kernel probes and the control protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "user", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "user", serde(rename_all = "lowercase"))]
pub enum OperationKind {
    Open = 0,
    Read = 1,
    Write = 2,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [OperationKind::Open, OperationKind::Read, OperationKind::Write];

    #[inline(always)]
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(OperationKind::Open),
            1 => Some(OperationKind::Read),
            2 => Some(OperationKind::Write),
            _ => None,
        }
    }

    /// Lowercase name used in configuration files and log lines.
    pub const fn name(self) -> &'static str {
        match self {
            OperationKind::Open => "open",
            OperationKind::Read => "read",
            OperationKind::Write => "write",
        }
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Enforcement posture: inactive, observe-only, or deny matching calls.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "user", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "user", serde(rename_all = "lowercase"))]
pub enum EnforcementMode {
    #[default]
    Off = 0,
    Log = 1,
    Block = 2,
}

impl EnforcementMode {
    #[inline(always)]
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(EnforcementMode::Off),
            1 => Some(EnforcementMode::Log),
            2 => Some(EnforcementMode::Block),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            EnforcementMode::Off => "OFF",
            EnforcementMode::Log => "LOG",
            EnforcementMode::Block => "BLOCK",
        }
    }
}

/// Outcome handed back to the caller of a monitored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "user", derive(Serialize, Deserialize))]
pub enum Decision {
    Proceed,
    Deny,
}

#[cfg(feature = "user")]
impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(feature = "user")]
impl std::fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An operation name outside `open`, `read`, `write`.
#[cfg(feature = "user")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

#[cfg(feature = "user")]
impl std::fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown operation '{}' (must be: open, read, or write)", self.0)
    }
}

#[cfg(feature = "user")]
impl std::error::Error for UnknownOperation {}

#[cfg(feature = "user")]
impl std::str::FromStr for OperationKind {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}
