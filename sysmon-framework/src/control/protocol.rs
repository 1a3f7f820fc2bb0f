//! Wire format of the control socket.
//!
//! One JSON document per line in each direction. Every request gets exactly
//! one response, in order.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Ack, RawRequest};
use crate::{ChannelError, Epoch, EventQuery, PolicySnapshot, ValidationError};

pub const DEFAULT_SOCKET_PATH: &str = "/run/sysmon.sock";

/// Longest accepted line, newline included.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireRequest {
    Control(RawRequest),
    Snapshot,
    Epoch,
    FindRecent(EventQuery),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireResponse {
    Ack(Ack),
    Snapshot(PolicySnapshot),
    Epoch { epoch: Epoch },
    Found { found: bool },
    Rejected { error: ValidationError },
    /// The request frame did not decode. The connection stays open.
    Malformed { message: String },
    /// The request was valid but the agent failed to carry it out.
    Error { message: String },
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line =
        serde_json::to_vec(message).map_err(|e| ChannelError::Malformed(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ChannelError>
where
    R: AsyncBufRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_FRAME_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(if read >= MAX_FRAME_LEN {
            ChannelError::Protocol(format!("frame exceeds {} bytes", MAX_FRAME_LEN))
        } else {
            ChannelError::Protocol("connection closed mid-frame".to_string())
        });
    }
    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|e| ChannelError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlCommand;
    use tokio::io::BufReader;

    #[test]
    fn request_wire_shape() {
        let request = WireRequest::Control(RawRequest {
            command: ControlCommand::SetMode,
            value: 1,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "control", "command": "set_mode", "value": 1})
        );
        let back: WireRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn rejection_names_the_bad_value() {
        let response = WireResponse::Rejected {
            error: ValidationError::InvalidMode { value: 9 },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["error"]["kind"], "invalid_mode");
        assert_eq!(json["error"]["value"], 9);
    }

    #[tokio::test]
    async fn frames_are_newline_delimited() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &WireRequest::Epoch).await.unwrap();
        write_frame(&mut buf, &WireRequest::Snapshot).await.unwrap();
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 2);

        let mut reader = BufReader::new(buf.as_slice());
        let first: Option<WireRequest> = read_frame(&mut reader).await.unwrap();
        let second: Option<WireRequest> = read_frame(&mut reader).await.unwrap();
        let end: Option<WireRequest> = read_frame(&mut reader).await.unwrap();
        assert_eq!(first, Some(WireRequest::Epoch));
        assert_eq!(second, Some(WireRequest::Snapshot));
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn garbage_is_malformed_not_fatal() {
        let input = b"not json\n{\"type\":\"epoch\"}\n".to_vec();
        let mut reader = BufReader::new(input.as_slice());
        let err = read_frame::<_, WireRequest>(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChannelError::Malformed(_)));
        let next: Option<WireRequest> = read_frame(&mut reader).await.unwrap();
        assert_eq!(next, Some(WireRequest::Epoch));
    }

    #[tokio::test]
    async fn invalid_utf8_is_malformed_not_fatal() {
        let input = b"\xff\xfe\n{\"type\":\"epoch\"}\n".to_vec();
        let mut reader = BufReader::new(input.as_slice());
        let err = read_frame::<_, WireRequest>(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChannelError::Malformed(_)));
        let next: Option<WireRequest> = read_frame(&mut reader).await.unwrap();
        assert_eq!(next, Some(WireRequest::Epoch));
    }

    #[tokio::test]
    async fn oversized_frame_is_a_protocol_error() {
        let input = vec![b'x'; MAX_FRAME_LEN + 10];
        let mut reader = BufReader::new(input.as_slice());
        let err = read_frame::<_, WireRequest>(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }

    #[tokio::test]
    async fn truncated_frame_is_a_protocol_error() {
        let input = b"{\"type\":\"ep".to_vec();
        let mut reader = BufReader::new(input.as_slice());
        let err = read_frame::<_, WireRequest>(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }
}
