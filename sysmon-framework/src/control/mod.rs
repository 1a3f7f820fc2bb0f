//! Control channel: the only way an operator changes the policy.
//!
//! Requests arrive either typed ([`ControlRequest`]) or raw
//! ([`RawRequest`], as decoded off the wire). Raw requests are validated
//! here, at the boundary, and a rejected request never reaches the store.

pub mod client;
pub mod protocol;
pub mod server;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use sysmon_common::{EnforcementMode, OperationKind, ProcessFilter, ProcessId};

use crate::{ChannelError, PolicySnapshot, PolicyStore, ValidationError};

pub use client::ControlClient;
pub use server::ControlServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
pub enum ControlRequest {
    SetMode(EnforcementMode),
    SetTargetOperation(OperationKind),
    SetTargetProcess(ProcessId),
}

impl ControlRequest {
    /// Parse an operation name as typed by an operator.
    pub fn target_by_name(name: &str) -> Result<Self, ValidationError> {
        name.parse::<OperationKind>()
            .map(ControlRequest::SetTargetOperation)
            .map_err(|_| ValidationError::UnknownOperationName {
                name: name.to_string(),
            })
    }

    pub fn apply_to(self, snapshot: PolicySnapshot) -> PolicySnapshot {
        match self {
            ControlRequest::SetMode(mode) => PolicySnapshot { mode, ..snapshot },
            ControlRequest::SetTargetOperation(target) => PolicySnapshot { target, ..snapshot },
            ControlRequest::SetTargetProcess(pid) => PolicySnapshot {
                process_filter: ProcessFilter::from_raw(pid),
                ..snapshot
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    SetMode,
    SetTargetOperation,
    SetTargetProcess,
}

/// Unvalidated request: a command and whatever integer came with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    pub command: ControlCommand,
    pub value: i64,
}

impl From<ControlRequest> for RawRequest {
    fn from(request: ControlRequest) -> Self {
        match request {
            ControlRequest::SetMode(mode) => RawRequest {
                command: ControlCommand::SetMode,
                value: mode as i64,
            },
            ControlRequest::SetTargetOperation(op) => RawRequest {
                command: ControlCommand::SetTargetOperation,
                value: op as i64,
            },
            ControlRequest::SetTargetProcess(pid) => RawRequest {
                command: ControlCommand::SetTargetProcess,
                value: pid as i64,
            },
        }
    }
}

impl TryFrom<RawRequest> for ControlRequest {
    type Error = ValidationError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        let value = raw.value;
        match raw.command {
            ControlCommand::SetMode => u8::try_from(value)
                .ok()
                .and_then(EnforcementMode::from_raw)
                .map(ControlRequest::SetMode)
                .ok_or(ValidationError::InvalidMode { value }),
            ControlCommand::SetTargetOperation => u8::try_from(value)
                .ok()
                .and_then(OperationKind::from_raw)
                .map(ControlRequest::SetTargetOperation)
                .ok_or(ValidationError::InvalidOperation { value }),
            ControlCommand::SetTargetProcess => ProcessId::try_from(value)
                .map(ControlRequest::SetTargetProcess)
                .map_err(|_| ValidationError::InvalidProcess { value }),
        }
    }
}

/// Confirmation of an applied request, carrying the resulting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub request: ControlRequest,
    pub snapshot: PolicySnapshot,
}

#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn apply(&self, request: ControlRequest) -> Result<Ack, ChannelError>;

    async fn snapshot(&self) -> Result<PolicySnapshot, ChannelError>;
}

#[async_trait]
impl<T: ControlChannel + ?Sized> ControlChannel for Arc<T> {
    async fn apply(&self, request: ControlRequest) -> Result<Ack, ChannelError> {
        (**self).apply(request).await
    }

    async fn snapshot(&self) -> Result<PolicySnapshot, ChannelError> {
        (**self).snapshot().await
    }
}

/// Receives every accepted policy before it is committed to the store, so
/// the enforcing side (e.g. the kernel) never lags the store. An error here
/// aborts the request.
pub trait PolicyMirror: Send + Sync {
    fn publish(&self, snapshot: &PolicySnapshot) -> Result<(), ChannelError>;
}

/// Channel applying requests directly to a store in this process.
pub struct LocalChannel {
    store: Arc<PolicyStore>,
    mirror: Option<Arc<dyn PolicyMirror>>,
    // Serialises writers so read-modify-write requests cannot lose each
    // other's fields. Readers of the store never touch it.
    writer: Mutex<()>,
}

impl LocalChannel {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self {
            store,
            mirror: None,
            writer: Mutex::new(()),
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn PolicyMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn apply_now(&self, request: ControlRequest) -> Result<Ack, ChannelError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = request.apply_to(self.store.snapshot());
        if let Some(mirror) = &self.mirror {
            mirror.publish(&snapshot)?;
        }
        self.store.replace(snapshot);
        match request {
            ControlRequest::SetMode(mode) => info!("Mode changed to {}", mode),
            ControlRequest::SetTargetOperation(op) => info!("Target syscall changed to {}", op),
            ControlRequest::SetTargetProcess(pid) => info!("Target PID changed to {}", pid),
        }
        Ok(Ack { request, snapshot })
    }

    /// Validate, then apply. Invalid input is reported, never applied.
    pub fn apply_raw(&self, raw: RawRequest) -> Result<Ack, ChannelError> {
        let request = ControlRequest::try_from(raw)?;
        self.apply_now(request)
    }

    /// Push the current policy through the mirror, e.g. right after the
    /// mirror was attached.
    pub fn sync_mirror(&self) -> Result<(), ChannelError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mirror) = &self.mirror {
            mirror.publish(&self.store.snapshot())?;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlChannel for LocalChannel {
    async fn apply(&self, request: ControlRequest) -> Result<Ack, ChannelError> {
        self.apply_now(request)
    }

    async fn snapshot(&self) -> Result<PolicySnapshot, ChannelError> {
        Ok(self.store.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingMirror;

    impl PolicyMirror for FailingMirror {
        fn publish(&self, _snapshot: &PolicySnapshot) -> Result<(), ChannelError> {
            Err(ChannelError::Transport("kernel map unavailable".to_string()))
        }
    }

    struct RecordingMirror(Mutex<Vec<PolicySnapshot>>);

    impl PolicyMirror for RecordingMirror {
        fn publish(&self, snapshot: &PolicySnapshot) -> Result<(), ChannelError> {
            self.0.lock().unwrap().push(*snapshot);
            Ok(())
        }
    }

    #[test]
    fn ack_reports_resulting_state() {
        let channel = LocalChannel::new(Arc::new(PolicyStore::new()));
        let ack = channel
            .apply_now(ControlRequest::SetMode(EnforcementMode::Log))
            .unwrap();
        assert_eq!(ack.snapshot.mode, EnforcementMode::Log);
        assert_eq!(ack.snapshot.target, OperationKind::Open);

        let ack = channel
            .apply_now(ControlRequest::SetTargetProcess(99))
            .unwrap();
        assert_eq!(ack.snapshot.mode, EnforcementMode::Log);
        assert_eq!(ack.snapshot.process_filter, ProcessFilter::Pid(99));
        assert_eq!(channel.store().snapshot(), ack.snapshot);
    }

    #[test]
    fn invalid_raw_requests_never_reach_the_store() {
        let channel = LocalChannel::new(Arc::new(PolicyStore::new()));
        let before = channel.store().snapshot();

        let err = channel
            .apply_raw(RawRequest {
                command: ControlCommand::SetMode,
                value: 3,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Validation(ValidationError::InvalidMode { value: 3 })
        ));

        let err = channel
            .apply_raw(RawRequest {
                command: ControlCommand::SetTargetOperation,
                value: -1,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Validation(ValidationError::InvalidOperation { value: -1 })
        ));
        assert_eq!(channel.store().snapshot(), before);
    }

    #[test]
    fn any_process_value_in_range_is_accepted() {
        let channel = LocalChannel::new(Arc::new(PolicyStore::new()));
        for value in [-1, -7, 0, 31337] {
            let ack = channel
                .apply_raw(RawRequest {
                    command: ControlCommand::SetTargetProcess,
                    value,
                })
                .unwrap();
            assert_eq!(ack.snapshot.process_filter.raw() as i64, value);
        }
    }

    #[test]
    fn raw_form_round_trips_valid_requests() {
        for request in [
            ControlRequest::SetMode(EnforcementMode::Block),
            ControlRequest::SetTargetOperation(OperationKind::Read),
            ControlRequest::SetTargetProcess(-1),
        ] {
            assert_eq!(ControlRequest::try_from(RawRequest::from(request)), Ok(request));
        }
    }

    #[test]
    fn operation_names_are_validated() {
        assert_eq!(
            ControlRequest::target_by_name("write"),
            Ok(ControlRequest::SetTargetOperation(OperationKind::Write))
        );
        assert_eq!(
            ControlRequest::target_by_name("delete"),
            Err(ValidationError::UnknownOperationName {
                name: "delete".to_string()
            })
        );
    }

    #[test]
    fn mirror_failure_leaves_store_untouched() {
        let channel =
            LocalChannel::new(Arc::new(PolicyStore::new())).with_mirror(Arc::new(FailingMirror));
        let err = channel
            .apply_now(ControlRequest::SetMode(EnforcementMode::Block))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
        assert_eq!(channel.store().snapshot().mode, EnforcementMode::Off);
    }

    #[test]
    fn mirror_sees_every_accepted_policy() {
        let mirror = Arc::new(RecordingMirror(Mutex::new(Vec::new())));
        let channel = LocalChannel::new(Arc::new(PolicyStore::new())).with_mirror(mirror.clone());
        channel.sync_mirror().unwrap();
        channel
            .apply_now(ControlRequest::SetTargetOperation(OperationKind::Write))
            .unwrap();

        let published = mirror.0.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], PolicySnapshot::default());
        assert_eq!(published[1].target, OperationKind::Write);
    }
}
