//! Process-wide enforcement policy.
//!
//! The `(mode, target, process filter)` triple is packed into one
//! [`PolicyConfig`] word and kept in a single `AtomicU64`. A read is one
//! atomic load, so the hot path never waits on a writer, and every read sees
//! a triple exactly as some writer stored it (no torn cross-field states).

use std::sync::atomic::{AtomicU64, Ordering};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sysmon_common::{EnforcementMode, OperationKind, PolicyConfig, ProcessFilter, ProcessId};

/// Decoded view of the policy at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub mode: EnforcementMode,
    pub target: OperationKind,
    pub process_filter: ProcessFilter,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Off,
            target: OperationKind::Open,
            process_filter: ProcessFilter::Any,
        }
    }
}

impl PolicySnapshot {
    pub fn to_config(self) -> PolicyConfig {
        PolicyConfig::new(self.mode, self.target, self.process_filter)
    }

    /// `None` if either enumeration byte is out of range.
    pub fn from_config(config: PolicyConfig) -> Option<Self> {
        Some(Self {
            mode: EnforcementMode::from_raw(config.mode)?,
            target: OperationKind::from_raw(config.target)?,
            process_filter: ProcessFilter::from_raw(config.target_pid),
        })
    }
}

pub struct PolicyStore {
    word: AtomicU64,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    /// OFF, targeting `open`, any process.
    pub fn new() -> Self {
        Self::with_snapshot(PolicySnapshot::default())
    }

    pub fn with_snapshot(snapshot: PolicySnapshot) -> Self {
        Self {
            word: AtomicU64::new(snapshot.to_config().to_bits()),
        }
    }

    /// Raw policy word for the interception path.
    #[inline]
    pub fn config(&self) -> PolicyConfig {
        PolicyConfig::from_bits(self.word.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot::from_config(self.config()).unwrap_or_default()
    }

    /// Store `snapshot` wholesale and return the one it replaced.
    pub fn replace(&self, snapshot: PolicySnapshot) -> PolicySnapshot {
        let previous = self
            .word
            .swap(snapshot.to_config().to_bits(), Ordering::AcqRel);
        PolicySnapshot::from_config(PolicyConfig::from_bits(previous)).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: EnforcementMode) {
        self.update(|config| PolicyConfig {
            mode: mode as u8,
            ..config
        });
        info!("Mode changed to {}", mode);
    }

    pub fn set_target_operation(&self, target: OperationKind) {
        self.update(|config| PolicyConfig {
            target: target as u8,
            ..config
        });
        info!("Target syscall changed to {}", target);
    }

    /// Any value is accepted; `-1` means every process.
    pub fn set_target_process(&self, pid: ProcessId) {
        self.update(|config| PolicyConfig {
            target_pid: pid,
            ..config
        });
        info!("Target PID changed to {}", pid);
    }

    /// Fail-soft numeric mutator: an out-of-range mode leaves the store
    /// untouched. Returns whether the value was applied.
    pub fn set_mode_raw(&self, raw: i64) -> bool {
        match u8::try_from(raw).ok().and_then(EnforcementMode::from_raw) {
            Some(mode) => {
                self.set_mode(mode);
                true
            }
            None => {
                warn!("Ignoring out-of-range mode {}", raw);
                false
            }
        }
    }

    /// Fail-soft numeric mutator for the target operation.
    pub fn set_target_operation_raw(&self, raw: i64) -> bool {
        match u8::try_from(raw).ok().and_then(OperationKind::from_raw) {
            Some(target) => {
                self.set_target_operation(target);
                true
            }
            None => {
                warn!("Ignoring out-of-range operation {}", raw);
                false
            }
        }
    }

    fn update<F: Fn(PolicyConfig) -> PolicyConfig>(&self, f: F) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(f(PolicyConfig::from_bits(bits)).to_bits())
            });
    }
}
