//! Content-Length framed DAP transport.
//!
//! The reader and writer are generic over the underlying stream so the same
//! code serves stdio, a TCP socket, or an in-memory duplex in tests.

use crate::dap::protocol::Request;
use crate::error::{DebugError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

pub struct MessageReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next request from the editor. Returns `None` once the
    /// stream closes. Non-request messages (stray responses, client events)
    /// are skipped.
    pub async fn next_request(&mut self) -> Result<Option<Request>> {
        loop {
            let body = match self.read_frame().await? {
                Some(body) => body,
                None => return Ok(None),
            };

            let msg: Value = serde_json::from_str(&body)
                .map_err(|e| DebugError::Transport(format!("malformed message: {}", e)))?;

            if msg.get("type").and_then(|t| t.as_str()) == Some("request") {
                let request: Request = serde_json::from_value(msg)
                    .map_err(|e| DebugError::Transport(format!("malformed request: {}", e)))?;
                return Ok(Some(request));
            }
            warn!("ignoring non-request message from client");
        }
    }

    async fn read_frame(&mut self) -> Result<Option<String>> {
        let mut headers = String::new();
        let mut buf = [0u8; 1];

        loop {
            match self.reader.read_exact(&mut buf).await {
                Ok(_) => headers.push(buf[0] as char),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Mid-header EOF with data already buffered is a broken peer,
                    // EOF on a frame boundary is a normal shutdown.
                    if headers.is_empty() {
                        return Ok(None);
                    }
                    return Err(DebugError::Transport("connection closed mid-frame".to_string()));
                }
                Err(e) => return Err(e.into()),
            }
            if headers.ends_with("\r\n\r\n") {
                break;
            }
        }

        let content_length = headers
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
            .and_then(|line| line.split(':').nth(1))
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| DebugError::Transport("missing Content-Length header".to_string()))?;

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;

        String::from_utf8(body)
            .map(Some)
            .map_err(|e| DebugError::Transport(format!("invalid UTF-8 payload: {}", e)))
    }
}

/// Shared, sequence-numbered writer. Handlers run as independent tasks, so
/// the stream sits behind a mutex and each message is written whole.
pub struct MessageWriter {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    seq: AtomicI64,
}

impl MessageWriter {
    pub fn new<W: AsyncWrite + Send + Unpin + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            seq: AtomicI64::new(1),
        }
    }

    pub async fn send_response(
        &self,
        request_seq: i64,
        command: &str,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> Result<()> {
        let payload = json!({
            "type": "response",
            "seq": self.next_seq(),
            "request_seq": request_seq,
            "success": success,
            "command": command,
            "message": message,
            "body": body,
        });
        self.send(&payload).await
    }

    pub async fn send_event(&self, event: &str, body: Option<Value>) -> Result<()> {
        let payload = json!({
            "type": "event",
            "seq": self.next_seq(),
            "event": event,
            "body": body,
        });
        self.send(&payload).await
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, payload: &Value) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let mut writer = self.writer.lock().await;
        writer.write_all(header.as_bytes()).await?;
        writer.write_all(body.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn framed_request_roundtrip() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_rx, _server_tx) = tokio::io::split(server);
        let (_client_rx, mut client_tx) = tokio::io::split(client);

        let body = r#"{"type":"request","seq":1,"command":"threads"}"#;
        let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        client_tx.write_all(frame.as_bytes()).await.unwrap();

        let mut reader = MessageReader::new(server_rx);
        let req = reader.next_request().await.unwrap().unwrap();
        assert_eq!(req.seq, 1);
        assert_eq!(req.command, "threads");
    }

    #[tokio::test]
    async fn skips_non_request_messages() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_rx, _server_tx) = tokio::io::split(server);
        let (_client_rx, mut client_tx) = tokio::io::split(client);

        for body in [
            r#"{"type":"event","seq":9,"event":"noise"}"#,
            r#"{"type":"request","seq":2,"command":"disconnect"}"#,
        ] {
            let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
            client_tx.write_all(frame.as_bytes()).await.unwrap();
        }

        let mut reader = MessageReader::new(server_rx);
        let req = reader.next_request().await.unwrap().unwrap();
        assert_eq!(req.command, "disconnect");
    }

    #[tokio::test]
    async fn eof_on_frame_boundary_yields_none() {
        let (client, server) = tokio::io::duplex(64);
        let (server_rx, _server_tx) = tokio::io::split(server);
        drop(client);

        let mut reader = MessageReader::new(server_rx);
        assert!(reader.next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writer_frames_and_numbers_messages() {
        let (client, server) = tokio::io::duplex(4096);
        let (mut client_rx, _client_tx) = tokio::io::split(client);
        let (_server_rx, server_tx) = tokio::io::split(server);

        let writer = MessageWriter::new(server_tx);
        writer.send_event("initialized", None).await.unwrap();
        writer
            .send_response(5, "launch", true, None, None)
            .await
            .unwrap();

        let mut raw = vec![0u8; 1024];
        let n = client_rx.read(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw[..n]).to_string();

        assert!(text.starts_with("Content-Length: "));
        assert!(text.contains(r#""event":"initialized""#));
        assert!(text.contains(r#""request_seq":5"#));
        // seq increments across messages
        assert!(text.contains(r#""seq":1"#));
        assert!(text.contains(r#""seq":2"#));
    }
}
