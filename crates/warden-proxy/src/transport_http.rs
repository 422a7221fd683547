//! Streamable HTTP transport.
//!
//! Each JSON-RPC message is an HTTP POST to the server's endpoint. The
//! response body is either a single JSON message or a `text/event-stream`
//! carrying one or more; both are decoded into the incoming queue that
//! `recv` drains. Session affinity rides the `Mcp-Session-Id` header, and
//! the last seen SSE event id is replayed via `Last-Event-ID` so the server
//! can resume after a dropped stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use warden_types::errors::WardenError;
use warden_types::protocol::{JsonRpcMessage, MCP_PROTOCOL_VERSION};
use warden_types::traits::McpTransport;

use crate::transport_sse::SseBuffer;

/// Transport to an MCP server over streamable HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    session_id: StdMutex<Option<String>>,
    last_event_id: StdMutex<Option<String>>,
    queue_tx: StdMutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Build a transport POSTing to exactly `url`.
    pub fn new(url: &str) -> Result<Self, WardenError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| WardenError::Transport(format!("failed to build HTTP client: {e}")))?;
        let (queue_tx, incoming) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            url: url.to_string(),
            session_id: StdMutex::new(None),
            last_event_id: StdMutex::new(None),
            queue_tx: StdMutex::new(Some(queue_tx)),
            incoming: Mutex::new(incoming),
            connected: AtomicBool::new(true),
        })
    }

    fn enqueue(&self, message: JsonRpcMessage) {
        let guard = self.queue_tx.lock().expect("http queue lock poisoned");
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Classify a non-success status: 4xx will not improve on retry, 5xx may.
    fn classify_status(status: reqwest::StatusCode) -> WardenError {
        if status.is_client_error() {
            WardenError::Downstream(format!("permanent HTTP error {status}"))
        } else if status.is_server_error() {
            WardenError::Downstream(format!("retryable HTTP error {status}"))
        } else {
            WardenError::Downstream(format!("unexpected HTTP status {status}"))
        }
    }

    fn decode_body(&self, content_type: &str, body: &str) {
        if body.is_empty() {
            // Notification acknowledgements are often empty 2xx responses.
            return;
        }
        if content_type.contains("text/event-stream") {
            for event in SseBuffer::parse_complete(body) {
                if let Some(id) = &event.id {
                    *self.last_event_id.lock().expect("event id lock poisoned") =
                        Some(id.clone());
                }
                let is_message = event.event.as_deref().map_or(true, |e| e == "message");
                if !is_message || event.data.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                    Ok(message) => self.enqueue(message),
                    Err(e) => warn!(error = %e, "discarding malformed SSE event in HTTP response"),
                }
            }
        } else {
            match serde_json::from_str::<JsonRpcMessage>(body) {
                Ok(message) => self.enqueue(message),
                Err(e) => warn!(error = %e, "discarding malformed JSON-RPC response body"),
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), WardenError> {
        if !self.is_connected() {
            return Err(WardenError::Unavailable("HTTP transport closed".to_string()));
        }

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream, application/json")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION)
            .json(&message);

        if let Some(session_id) = self.session_id.lock().expect("session lock poisoned").clone() {
            request = request.header("Mcp-Session-Id", session_id);
        }
        if let Some(event_id) = self
            .last_event_id
            .lock()
            .expect("event id lock poisoned")
            .clone()
        {
            request = request.header("Last-Event-ID", event_id);
        }

        debug!(url = %self.url, method = ?message.method, id = ?message.id, "HTTP POST");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WardenError::Timeout(format!("HTTP request timed out: {e}"))
            } else if e.is_connect() {
                WardenError::Unavailable(format!("failed to connect to MCP server: {e}"))
            } else {
                WardenError::Transport(format!("HTTP request failed: {e}"))
            }
        })?;

        if let Some(session_id) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            debug!(session_id = session_id, "captured MCP session id");
            *self.session_id.lock().expect("session lock poisoned") =
                Some(session_id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| WardenError::Transport(format!("failed to read response body: {e}")))?;

        self.decode_body(&content_type, &body);
        Ok(())
    }

    async fn recv(&self) -> Result<JsonRpcMessage, WardenError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| WardenError::Unavailable("HTTP transport closed".to_string()))
    }

    async fn close(&self) -> Result<(), WardenError> {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the queue sender wakes any blocked recv with Unavailable.
        self.queue_tx.lock().expect("http queue lock poisoned").take();
        info!("HTTP transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
