//! Test doubles shared by the proxy crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use warden_types::errors::WardenError;
use warden_types::protocol::{error_codes, JsonRpcMessage};
use warden_types::traits::McpTransport;

/// A transport that replays pre-programmed responses.
///
/// Each request sent through the transport consumes the next scripted
/// response template, rewrites its id to the request's id, and queues it for
/// `recv`. Notifications sent by the client consume nothing. By default a
/// request with an empty script gets a loud "unscripted request" error
/// response so a test fails instead of hanging; [`ScriptedTransport::manual`]
/// turns that off for tests that answer requests by hand.
pub(crate) struct ScriptedTransport {
    script: StdMutex<VecDeque<JsonRpcMessage>>,
    sent: StdMutex<Vec<JsonRpcMessage>>,
    queue_tx: StdMutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    connected: AtomicBool,
    // When false, an empty script leaves a request unanswered instead of
    // erroring; tests that answer by hand (out-of-order correlation,
    // disconnect-in-flight) need the request to stay pending.
    auto_error: bool,
}

/// Out-of-band control over a [`ScriptedTransport`]: inject server-initiated
/// messages or kill the connection mid-test.
#[derive(Clone)]
pub(crate) struct ScriptHandle {
    transport: Arc<ScriptedTransport>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<JsonRpcMessage>) -> (Arc<Self>, ScriptHandle) {
        Self::build(script, true)
    }

    /// A transport with no script and no auto-error: every request stays
    /// pending until the handle pushes a raw response.
    pub fn manual() -> (Arc<Self>, ScriptHandle) {
        Self::build(Vec::new(), false)
    }

    fn build(script: Vec<JsonRpcMessage>, auto_error: bool) -> (Arc<Self>, ScriptHandle) {
        let (queue_tx, incoming) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: StdMutex::new(script.into()),
            sent: StdMutex::new(Vec::new()),
            queue_tx: StdMutex::new(Some(queue_tx)),
            incoming: Mutex::new(incoming),
            connected: AtomicBool::new(true),
            auto_error,
        });
        let handle = ScriptHandle {
            transport: transport.clone(),
        };
        (transport, handle)
    }

    /// Append more scripted responses mid-test.
    pub fn extend_script(&self, responses: Vec<JsonRpcMessage>) {
        self.script.lock().unwrap().extend(responses);
    }

    /// Methods of every message the client sent, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.method.clone())
            .collect()
    }

    fn enqueue(&self, message: JsonRpcMessage) {
        if let Some(tx) = self.queue_tx.lock().unwrap().as_ref() {
            let _ = tx.send(message);
        }
    }
}

impl ScriptHandle {
    /// Push a server-initiated notification to the client.
    pub fn push_notification(&self, method: &str, params: Option<serde_json::Value>) {
        self.transport
            .enqueue(JsonRpcMessage::notification(method, params));
    }

    /// Push a raw message (e.g. a response with a chosen id).
    pub fn push_raw(&self, message: JsonRpcMessage) {
        self.transport.enqueue(message);
    }

    /// Drop the connection: pending and future receives fail.
    pub fn disconnect(&self) {
        self.transport.connected.store(false, Ordering::SeqCst);
        self.transport.queue_tx.lock().unwrap().take();
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), WardenError> {
        if !self.is_connected() {
            return Err(WardenError::Unavailable("scripted transport closed".to_string()));
        }
        let request_id = if message.method.is_some() {
            message.id.clone()
        } else {
            None
        };
        self.sent.lock().unwrap().push(message);

        if let Some(id) = request_id {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(mut template) => {
                    template.id = Some(id);
                    self.enqueue(template);
                }
                None if self.auto_error => {
                    self.enqueue(JsonRpcMessage::error_response(
                        id,
                        error_codes::INTERNAL_ERROR,
                        "unscripted request",
                    ));
                }
                None => {}
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<JsonRpcMessage, WardenError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| WardenError::Unavailable("scripted transport closed".to_string()))
    }

    async fn close(&self) -> Result<(), WardenError> {
        self.connected.store(false, Ordering::SeqCst);
        self.queue_tx.lock().unwrap().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── Response template builders ────────────────────────────────

/// An `initialize` result with the given instructions field.
pub(crate) fn init_response(instructions: Option<&str>) -> JsonRpcMessage {
    let mut result = serde_json::json!({
        "protocolVersion": "2025-06-18",
        "capabilities": {"tools": {"listChanged": true}},
        "serverInfo": {"name": "scripted-server", "version": "1.0"}
    });
    if let Some(text) = instructions {
        result["instructions"] = serde_json::json!(text);
    }
    JsonRpcMessage::response(serde_json::json!(0), result)
}

/// A `tools/list` result with the given tool definitions.
pub(crate) fn tools_response(tools: serde_json::Value) -> JsonRpcMessage {
    JsonRpcMessage::response(serde_json::json!(0), serde_json::json!({ "tools": tools }))
}

/// A `tools/call` result wrapping one text content item.
pub(crate) fn call_text_response(text: &str) -> JsonRpcMessage {
    JsonRpcMessage::response(
        serde_json::json!(0),
        serde_json::json!({"content": [{"type": "text", "text": text}]}),
    )
}

/// An error response template.
pub(crate) fn error_template(code: i64, message: &str) -> JsonRpcMessage {
    JsonRpcMessage::error_response(serde_json::json!(0), code, message)
}
