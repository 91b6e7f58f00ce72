use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::dap::protocol::{ErrorBody, ErrorMessage, Event, Request, Response};
use crate::error::{AppError, AppResult};

/// Read one Content-Length framed DAP message. Returns `None` on a clean
/// EOF before any header.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> AppResult<Option<Value>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line).await?;
        if read_n == 0 {
            return if content_length.is_none() {
                Ok(None)
            } else {
                Err(AppError::Protocol("connection closed mid-message".to_string()))
            };
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            content_length = Some(v.trim().parse().map_err(|_| {
                AppError::Protocol(format!("bad Content-Length header: {}", line))
            })?);
        }
    }

    let len = content_length
        .ok_or_else(|| AppError::Protocol("missing Content-Length header".to_string()))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let message: Value = serde_json::from_slice(&buf)?;
    debug!("dap <- {}", message);
    Ok(Some(message))
}

async fn write_message<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> AppResult<()> {
    let payload = serde_json::to_vec(message)?;
    debug!("dap -> {}", String::from_utf8_lossy(&payload));
    writer
        .write_all(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// The client half of the session: frames responses and events onto the
/// output stream, numbering them with its own sequence.
pub struct DapClient<W: AsyncWrite + Unpin> {
    writer: W,
    seq: i64,
}

impl<W: AsyncWrite + Unpin> DapClient<W> {
    pub fn new(writer: W) -> Self {
        DapClient { writer, seq: 1 }
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    pub async fn respond(&mut self, request: &Request, result: AppResult<Value>) {
        let response = match result {
            Ok(body) => Response {
                seq: self.next_seq(),
                kind: "response",
                request_seq: request.seq,
                success: true,
                command: request.command.clone(),
                message: None,
                body: if body.is_null() { None } else { Some(body) },
            },
            Err(e) => {
                let format = e.to_string();
                Response {
                    seq: self.next_seq(),
                    kind: "response",
                    request_seq: request.seq,
                    success: false,
                    command: request.command.clone(),
                    message: Some(format.clone()),
                    body: serde_json::to_value(ErrorBody {
                        error: ErrorMessage {
                            id: 1,
                            format,
                            show_user: true,
                        },
                    })
                    .ok(),
                }
            }
        };
        if let Err(e) = write_message(&mut self.writer, &response).await {
            warn!("failed to write response: {}", e);
        }
    }

    pub async fn send_event<T: Serialize>(&mut self, event: &'static str, body: T) {
        let event = Event {
            seq: self.next_seq(),
            kind: "event",
            event,
            body: serde_json::to_value(body).ok(),
        };
        if let Err(e) = write_message(&mut self.writer, &event).await {
            warn!("failed to write event: {}", e);
        }
    }

    pub async fn send_bodyless_event(&mut self, event: &'static str) {
        let event = Event {
            seq: self.next_seq(),
            kind: "event",
            event,
            body: None,
        };
        if let Err(e) = write_message(&mut self.writer, &event).await {
            warn!("failed to write event: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_read_message_framing() {
        let payload = r#"{"seq":1,"type":"request","command":"initialize"}"#;
        let wire = format!("Content-Length: {}\r\n\r\n{}", payload.len(), payload);
        let mut reader = BufReader::new(wire.as_bytes());
        let message = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message["command"], "initialize");
        // clean EOF afterwards
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let mut wire = Vec::new();
        let mut client = DapClient::new(&mut wire);
        client
            .send_event("output", serde_json::json!({"category": "console", "output": "hi"}))
            .await;
        drop(client);

        let mut reader = BufReader::new(wire.as_slice());
        let message = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message["type"], "event");
        assert_eq!(message["event"], "output");
        assert_eq!(message["body"]["output"], "hi");
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let request = Request {
            seq: 9,
            kind: "request".to_string(),
            command: "evaluate".to_string(),
            arguments: Value::Null,
        };
        let mut wire = Vec::new();
        let mut client = DapClient::new(&mut wire);
        client
            .respond(&request, Err(AppError::Mi("No symbol".to_string())))
            .await;
        drop(client);

        let mut reader = BufReader::new(wire.as_slice());
        let message = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message["success"], false);
        assert_eq!(message["request_seq"], 9);
        assert_eq!(message["body"]["error"]["format"], "No symbol");
    }
}
