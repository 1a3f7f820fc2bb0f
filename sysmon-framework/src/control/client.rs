//! Client side of the control socket, used by out-of-process tooling.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use super::protocol::{read_frame, write_frame, WireRequest, WireResponse};
use super::{Ack, ControlChannel, ControlRequest, RawRequest};
use crate::intercept::current_pid;
use crate::{ChannelError, Epoch, EventQuery, EventSource, PolicySnapshot};
use sysmon_common::ProcessId;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// An open control connection. Requests are answered in order, so calls
/// from concurrent tasks are serialised on the connection.
///
/// Event queries never match this process's own calls: talking to the agent
/// reads and writes the socket, and that must not count as evidence.
pub struct ControlClient {
    conn: Mutex<Connection>,
    pid: ProcessId,
}

impl ControlClient {
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            ChannelError::Transport(format!("cannot connect to {}: {}", path.display(), e))
        })?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            conn: Mutex::new(Connection {
                reader: BufReader::new(read),
                writer,
            }),
            pid: current_pid(),
        })
    }

    pub async fn call(&self, request: &WireRequest) -> Result<WireResponse, ChannelError> {
        let mut conn = self.conn.lock().await;
        write_frame(&mut conn.writer, request).await?;
        read_frame(&mut conn.reader)
            .await?
            .ok_or_else(|| ChannelError::Transport("agent closed the connection".to_string()))
    }

    /// Send an unvalidated request; the agent validates it.
    pub async fn apply_raw(&self, raw: RawRequest) -> Result<Ack, ChannelError> {
        match self.call(&WireRequest::Control(raw)).await? {
            WireResponse::Ack(ack) => Ok(ack),
            other => Err(unexpected(other)),
        }
    }

    pub async fn close(self) -> Result<(), ChannelError> {
        let mut conn = self.conn.into_inner();
        conn.writer.shutdown().await?;
        Ok(())
    }
}

fn unexpected(response: WireResponse) -> ChannelError {
    match response {
        WireResponse::Rejected { error } => ChannelError::Validation(error),
        WireResponse::Malformed { message } => ChannelError::Malformed(message),
        WireResponse::Error { message } => ChannelError::Transport(message),
        other => ChannelError::Protocol(format!("unexpected response {:?}", other)),
    }
}

#[async_trait]
impl ControlChannel for ControlClient {
    async fn apply(&self, request: ControlRequest) -> Result<Ack, ChannelError> {
        self.apply_raw(RawRequest::from(request)).await
    }

    async fn snapshot(&self) -> Result<PolicySnapshot, ChannelError> {
        match self.call(&WireRequest::Snapshot).await? {
            WireResponse::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl EventSource for ControlClient {
    async fn epoch(&self) -> Result<Epoch, ChannelError> {
        match self.call(&WireRequest::Epoch).await? {
            WireResponse::Epoch { epoch } => Ok(epoch),
            other => Err(unexpected(other)),
        }
    }

    async fn find(&self, query: &EventQuery) -> Result<bool, ChannelError> {
        let query = EventQuery {
            exclude_process: query.exclude_process.or(Some(self.pid)),
            ..*query
        };
        match self.call(&WireRequest::FindRecent(query)).await? {
            WireResponse::Found { found } => Ok(found),
            other => Err(unexpected(other)),
        }
    }
}
