//! Unix-socket front end for a [`LocalChannel`].
//!
//! Connections are served concurrently, up to a fixed cap. Control requests
//! from different connections are applied in arrival order through the
//! channel's writer lock, so the last one to arrive wins.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::protocol::{read_frame, write_frame, WireRequest, WireResponse};
use super::LocalChannel;
use crate::{ChannelError, EventSink};

/// Connections served at once. Further clients wait in the listen backlog
/// until a slot frees up.
pub const MAX_CONNECTIONS: usize = 64;

pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    channel: Arc<LocalChannel>,
    sink: Arc<EventSink>,
    connections: Arc<Semaphore>,
}

/// Remove a socket left behind by an earlier run. Anything at `path` that is
/// not a socket is left alone and refused.
fn remove_stale_socket(path: &Path) -> Result<(), ChannelError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(ChannelError::Transport(format!(
                "cannot inspect {}: {}",
                path.display(),
                e
            )))
        }
    };
    if !metadata.file_type().is_socket() {
        return Err(ChannelError::Transport(format!(
            "path {} exists but is not a socket",
            path.display()
        )));
    }
    std::fs::remove_file(path).map_err(|e| {
        ChannelError::Transport(format!(
            "failed to remove stale socket {}: {}",
            path.display(),
            e
        ))
    })
}

impl ControlServer {
    /// Bind `path`, replacing a stale socket left by an earlier run.
    pub fn bind<P: AsRef<Path>>(
        path: P,
        channel: Arc<LocalChannel>,
        sink: Arc<EventSink>,
    ) -> Result<Self, ChannelError> {
        let path = path.as_ref().to_path_buf();
        remove_stale_socket(&path)?;
        let listener = UnixListener::bind(&path).map_err(|e| {
            ChannelError::Transport(format!("failed to bind {}: {}", path.display(), e))
        })?;
        info!("Control socket listening on {}", path.display());
        Ok(Self {
            listener,
            path,
            channel,
            sink,
            connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.connections = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) {
        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.connections).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let channel = Arc::clone(&self.channel);
                        let sink = Arc::clone(&self.sink);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = handle_connection(stream, &channel, &sink, cancel).await {
                                warn!("Control connection closed: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept control connection: {}", e),
                },
            }
        }
        debug!("Control server on {} stopped", self.path.display());
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection(
    stream: UnixStream,
    channel: &LocalChannel,
    sink: &EventSink,
    cancel: CancellationToken,
) -> Result<(), ChannelError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame::<_, WireRequest>(&mut reader) => frame,
        };
        let response = match frame {
            Ok(Some(request)) => dispatch(channel, sink, request),
            Ok(None) => return Ok(()),
            Err(ChannelError::Malformed(message)) => {
                debug!("Malformed control frame: {}", message);
                WireResponse::Malformed { message }
            }
            Err(e) => return Err(e),
        };
        write_frame(&mut write, &response).await?;
    }
}

/// Answer one request against the local policy and event log.
pub fn dispatch(channel: &LocalChannel, sink: &EventSink, request: WireRequest) -> WireResponse {
    match request {
        WireRequest::Control(raw) => match channel.apply_raw(raw) {
            Ok(ack) => WireResponse::Ack(ack),
            Err(ChannelError::Validation(error)) => {
                warn!("Rejected control request {:?}: {}", raw, error);
                WireResponse::Rejected { error }
            }
            Err(e) => WireResponse::Error {
                message: e.to_string(),
            },
        },
        WireRequest::Snapshot => WireResponse::Snapshot(channel.store().snapshot()),
        WireRequest::Epoch => WireResponse::Epoch {
            epoch: sink.epoch(),
        },
        WireRequest::FindRecent(query) => WireResponse::Found {
            found: sink.find(&query),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlCommand, RawRequest};
    use crate::{EventQuery, PolicyStore, ValidationError};
    use sysmon_common::{EnforcementMode, InterceptionEvent, OperationKind};

    fn fixture() -> (LocalChannel, EventSink) {
        (LocalChannel::new(Arc::new(PolicyStore::new())), EventSink::new())
    }

    #[test]
    fn dispatch_applies_valid_control() {
        let (channel, sink) = fixture();
        let response = dispatch(
            &channel,
            &sink,
            WireRequest::Control(RawRequest {
                command: ControlCommand::SetMode,
                value: 2,
            }),
        );
        match response {
            WireResponse::Ack(ack) => assert_eq!(ack.snapshot.mode, EnforcementMode::Block),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn dispatch_rejects_out_of_range() {
        let (channel, sink) = fixture();
        let response = dispatch(
            &channel,
            &sink,
            WireRequest::Control(RawRequest {
                command: ControlCommand::SetTargetOperation,
                value: 5,
            }),
        );
        assert_eq!(
            response,
            WireResponse::Rejected {
                error: ValidationError::InvalidOperation { value: 5 }
            }
        );
        assert_eq!(channel.store().snapshot().target, OperationKind::Open);
    }

    #[test]
    fn dispatch_answers_event_queries() {
        let (channel, sink) = fixture();
        let epoch = match dispatch(&channel, &sink, WireRequest::Epoch) {
            WireResponse::Epoch { epoch } => epoch,
            other => panic!("unexpected response {:?}", other),
        };
        sink.append(InterceptionEvent::observed(OperationKind::Read, 8));
        let query = EventQuery::observed(OperationKind::Read, epoch, 20);
        assert_eq!(
            dispatch(&channel, &sink, WireRequest::FindRecent(query)),
            WireResponse::Found { found: true }
        );
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let (channel, sink) = fixture();
        let server = ControlServer::bind(&path, Arc::new(channel), Arc::new(sink)).unwrap();
        assert_eq!(server.path(), path.as_path());
        drop(server);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn bind_refuses_to_delete_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        std::fs::write(&path, b"keep me").unwrap();

        let (channel, sink) = fixture();
        let result = ControlServer::bind(&path, Arc::new(channel), Arc::new(sink));
        match result {
            Err(ChannelError::Transport(message)) => assert!(message.contains("not a socket")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("bind replaced a regular file"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn undecodable_bytes_get_a_malformed_reply() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let (channel, sink) = fixture();
        let server = ControlServer::bind(&path, Arc::new(channel), Arc::new(sink)).unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(server.serve(cancel.clone()));

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(b"\xff\xfe\n{\"type\":\"epoch\"}\n").await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let first: WireResponse = serde_json::from_str(&line).unwrap();
        assert!(matches!(first, WireResponse::Malformed { .. }));

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let second: WireResponse = serde_json::from_str(&line).unwrap();
        assert!(matches!(second, WireResponse::Epoch { .. }));
        cancel.cancel();
    }

    #[tokio::test]
    async fn connections_beyond_the_cap_wait_for_a_slot() {
        use crate::control::ControlClient;
        use crate::ControlChannel;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let (channel, sink) = fixture();
        let server = ControlServer::bind(&path, Arc::new(channel), Arc::new(sink))
            .unwrap()
            .with_max_connections(1);
        let cancel = CancellationToken::new();
        tokio::spawn(server.serve(cancel.clone()));

        let first = ControlClient::connect(&path).await.unwrap();
        first.snapshot().await.unwrap();

        let second = ControlClient::connect(&path).await.unwrap();
        let pending = tokio::spawn(async move { second.snapshot().await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!pending.is_finished());

        first.close().await.unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.mode, EnforcementMode::Off);
        cancel.cancel();
    }
}
