//! SSE transport: legacy HTTP+SSE MCP servers.
//!
//! The server holds open a `text/event-stream` GET response. Its first event
//! (`event: endpoint`) names the URL to POST client messages to; subsequent
//! `message` events carry JSON-RPC frames. This module also owns the
//! incremental SSE parser the streamable-HTTP adapter reuses for
//! `text/event-stream` response bodies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use warden_types::errors::WardenError;
use warden_types::protocol::{JsonRpcMessage, MCP_PROTOCOL_VERSION};
use warden_types::traits::McpTransport;

// ============================================================
// SSE event parsing
// ============================================================

/// One parsed event from a `text/event-stream`.
#[derive(Debug, Clone, Default)]
pub(crate) struct SseEvent {
    /// The `id:` field, used for reconnection via `Last-Event-ID`.
    pub id: Option<String>,
    /// The `event:` field (event type; default is "message").
    pub event: Option<String>,
    /// The `data:` field, accumulated across multiple `data:` lines.
    pub data: String,
}

/// Incremental SSE parser.
///
/// Chunks from the network are pushed in as they arrive; complete events
/// (terminated by a blank line) come out. Partial events stay buffered until
/// their terminator shows up in a later chunk.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buf.push_str(&chunk.replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let raw: String = self.buf.drain(..pos + 2).collect();
            if let Some(event) = parse_event(raw.trim_end()) {
                events.push(event);
            }
        }
        events
    }

    /// Parse a complete body in one call (used for non-streaming responses).
    pub fn parse_complete(body: &str) -> Vec<SseEvent> {
        let mut parser = Self::new();
        let mut events = parser.push(body);
        // A final event without a trailing blank line is still an event.
        if let Some(event) = parse_event(parser.buf.trim_end()) {
            events.push(event);
        }
        events
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    if raw.trim().is_empty() {
        return None;
    }

    let mut event = SseEvent::default();
    let mut has_data = false;

    for line in raw.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.find(':') {
            Some(pos) => (&line[..pos], line[pos + 1..].strip_prefix(' ').unwrap_or(&line[pos + 1..])),
            None => (line, ""),
        };
        match field {
            "id" => event.id = Some(value.to_string()),
            "event" => event.event = Some(value.to_string()),
            "data" => {
                if has_data {
                    event.data.push('\n');
                }
                event.data.push_str(value);
                has_data = true;
            }
            // `retry` and unknown fields are ignored.
            _ => {}
        }
    }

    has_data.then_some(event)
}

// ============================================================
// SseTransport
// ============================================================

/// Transport to an MCP server over HTTP+SSE.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: watch::Receiver<Option<String>>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    connected: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream at `url` and start the reader task.
    pub async fn connect(url: &str) -> Result<Self, WardenError> {
        let client = reqwest::Client::new();
        let response = client
            .get(url)
            .header("Accept", "text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION)
            .send()
            .await
            .map_err(|e| WardenError::Unavailable(format!("failed to open SSE stream: {e}")))?;

        if !response.status().is_success() {
            return Err(WardenError::Unavailable(format!(
                "SSE stream at {url} returned HTTP {}",
                response.status()
            )));
        }

        info!(url = url, "SSE stream opened");

        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        let (tx, incoming) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let base_url = url.to_string();
        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            let mut response = response;
            let mut parser = SseBuffer::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        let chunk = String::from_utf8_lossy(&bytes);
                        for event in parser.push(&chunk) {
                            route_event(event, &base_url, &endpoint_tx, &tx);
                        }
                    }
                    Ok(None) => {
                        debug!("SSE stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "SSE stream read failed");
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            client,
            endpoint: endpoint_rx,
            incoming: Mutex::new(incoming),
            connected,
            reader,
        })
    }

    /// Wait for the server to announce its POST endpoint.
    async fn post_endpoint(&self) -> Result<String, WardenError> {
        let mut endpoint = self.endpoint.clone();
        loop {
            if let Some(url) = endpoint.borrow().clone() {
                return Ok(url);
            }
            if !self.is_connected() {
                return Err(WardenError::Unavailable(
                    "SSE stream closed before announcing an endpoint".to_string(),
                ));
            }
            endpoint.changed().await.map_err(|_| {
                WardenError::Unavailable(
                    "SSE stream closed before announcing an endpoint".to_string(),
                )
            })?;
        }
    }
}

fn route_event(
    event: SseEvent,
    base_url: &str,
    endpoint_tx: &watch::Sender<Option<String>>,
    tx: &mpsc::UnboundedSender<JsonRpcMessage>,
) {
    match event.event.as_deref() {
        Some("endpoint") => {
            let url = resolve_endpoint(base_url, &event.data);
            debug!(endpoint = %url, "SSE endpoint announced");
            let _ = endpoint_tx.send(Some(url));
        }
        Some("message") | None => match serde_json::from_str::<JsonRpcMessage>(&event.data) {
            Ok(message) => {
                let _ = tx.send(message);
            }
            Err(e) => {
                warn!(error = %e, "discarding malformed SSE message event");
            }
        },
        Some(other) => {
            debug!(event = other, "ignoring unrecognized SSE event type");
        }
    }
}

/// Resolve the endpoint event's data against the stream URL.
///
/// Servers send either an absolute URL or an origin-relative path.
fn resolve_endpoint(base_url: &str, data: &str) -> String {
    let data = data.trim();
    if data.starts_with("http://") || data.starts_with("https://") {
        return data.to_string();
    }
    let origin = match base_url.find("://") {
        Some(scheme_end) => match base_url[scheme_end + 3..].find('/') {
            Some(path_start) => &base_url[..scheme_end + 3 + path_start],
            None => base_url,
        },
        None => base_url,
    };
    if data.starts_with('/') {
        format!("{origin}{data}")
    } else {
        format!("{origin}/{data}")
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), WardenError> {
        let endpoint = self.post_endpoint().await?;
        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION)
            .json(&message)
            .send()
            .await
            .map_err(|e| WardenError::Transport(format!("SSE POST failed: {e}")))?;

        if !response.status().is_success() {
            return Err(WardenError::Transport(format!(
                "SSE POST returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<JsonRpcMessage, WardenError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| WardenError::Unavailable("SSE stream closed".to_string()))
    }

    async fn close(&self) -> Result<(), WardenError> {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        info!("SSE transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Test: SSE parsing ─────────────────────────────────────

    #[test]
    fn single_event_parses() {
        let mut parser = SseBuffer::new();
        let events = parser.push("data: {\"jsonrpc\":\"2.0\",\"id\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\",\"id\":1}");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn events_split_across_chunks_are_reassembled() {
        let mut parser = SseBuffer::new();
        assert!(parser.push("event: mess").is_empty());
        assert!(parser.push("age\ndata: {\"jsonrpc\"").is_empty());
        let events = parser.push(":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
    }

    #[test]
    fn multiline_data_joins_with_newlines() {
        let mut parser = SseBuffer::new();
        let events = parser.push("data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn comments_and_dataless_events_are_skipped() {
        let mut parser = SseBuffer::new();
        assert!(parser.push(": keepalive\n\n").is_empty());
        assert!(parser.push("event: ping\nid: 7\n\n").is_empty());
    }

    #[test]
    fn crlf_lines_are_handled() {
        let mut parser = SseBuffer::new();
        let events = parser.push("id: e1\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("e1"));
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn parse_complete_takes_trailing_event_without_blank_line() {
        let events = SseBuffer::parse_complete("data: a\n\ndata: b\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "b");
    }

    // ── Test: endpoint resolution ─────────────────────────────

    #[test]
    fn endpoint_resolution_handles_absolute_and_relative() {
        assert_eq!(
            resolve_endpoint("http://h:8080/sse", "http://other/messages"),
            "http://other/messages"
        );
        assert_eq!(
            resolve_endpoint("http://h:8080/sse", "/messages?session=1"),
            "http://h:8080/messages?session=1"
        );
        assert_eq!(
            resolve_endpoint("https://h/sse", "messages"),
            "https://h/messages"
        );
    }

    // ── Test: live stream against an axum server ──────────────

    #[tokio::test]
    async fn endpoint_discovery_and_message_delivery() {
        use axum::response::Response;
        use axum::routing::{get, post};
        use axum::Router;
        use std::sync::Mutex as StdMutex;

        let posted: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let posted_handle = posted.clone();

        let sse_body = "\
event: endpoint\n\
data: /messages\n\
\n\
event: message\n\
data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\
\n";

        let app = Router::new()
            .route(
                "/sse",
                get(move || async move {
                    Response::builder()
                        .status(200)
                        .header("content-type", "text/event-stream")
                        .body(axum::body::Body::from(sse_body))
                        .unwrap()
                }),
            )
            .route(
                "/messages",
                post(move |body: String| {
                    posted_handle.lock().unwrap().push(body);
                    async { "Accepted" }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let transport = SseTransport::connect(&format!("http://{addr}/sse"))
            .await
            .unwrap();

        // The message event arrives through recv.
        let message = transport.recv().await.unwrap();
        assert_eq!(message.id, Some(serde_json::json!(1)));

        // Sends go to the announced endpoint.
        transport
            .send(JsonRpcMessage::request(2, "tools/list", serde_json::json!({})))
            .await
            .unwrap();
        let bodies = posted.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("tools/list"));
    }
}
