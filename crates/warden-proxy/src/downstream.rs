//! Downstream MCP client.
//!
//! Owns the live session to the wrapped server. A background pump task is
//! the only reader of the transport: it routes responses to the request that
//! owns their id and funnels server-initiated notifications into a channel
//! the wrapper consumes. Responses correlate strictly by JSON-RPC id; there
//! is no FIFO assumption across unrelated requests.
//!
//! When the transport dies, every pending request fails with an
//! `Unavailable` error and the notification channel closes; that closure is
//! the wrapper's disconnect signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use warden_types::errors::WardenError;
use warden_types::protocol::{
    error_codes, InitializeSummary, JsonRpcMessage, McpToolDef, MCP_PROTOCOL_VERSION,
};
use warden_types::traits::McpTransport;

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<JsonRpcMessage>>>>;

/// Client side of the wrapper's session to the downstream server.
pub struct DownstreamClient {
    transport: Arc<dyn McpTransport>,
    pending: PendingMap,
    next_id: AtomicU64,
    notifications: StdMutex<Option<mpsc::UnboundedReceiver<JsonRpcMessage>>>,
}

impl DownstreamClient {
    /// Wrap a connected transport and start the receive pump.
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let pump_transport = transport.clone();
        let pump_pending = pending.clone();
        tokio::spawn(async move {
            pump(pump_transport, pump_pending, notify_tx).await;
        });

        Self {
            transport,
            pending,
            next_id: AtomicU64::new(0),
            notifications: StdMutex::new(Some(notify_rx)),
        }
    }

    /// Take the server-initiated notification stream. The wrapper calls this
    /// once; the channel closing signals downstream disconnect.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.notifications
            .lock()
            .expect("notification slot poisoned")
            .take()
    }

    /// Whether the transport still looks alive.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send a request and await the response correlated to its id.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<JsonRpcMessage, WardenError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(serde_json::json!(id).to_string(), tx);

        let message = JsonRpcMessage::request(id, method, params);
        if let Err(e) = self.transport.send(message).await {
            self.pending
                .lock()
                .expect("pending map poisoned")
                .remove(&serde_json::json!(id).to_string());
            return Err(e);
        }

        rx.await.map_err(|_| {
            WardenError::Unavailable("downstream disconnected before responding".to_string())
        })
    }

    /// Send a notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), WardenError> {
        self.transport
            .send(JsonRpcMessage::notification(method, params))
            .await
    }

    /// Run the MCP `initialize` handshake and the follow-up `initialized`
    /// notification. Returns the fields the wrapper pins.
    pub async fn initialize(&self) -> Result<InitializeSummary, WardenError> {
        let response = self
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mcp-warden",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;

        if let Some(error) = &response.error {
            return Err(WardenError::Downstream(format!(
                "initialize failed: {} (code {})",
                error.message, error.code
            )));
        }
        let result = response
            .result
            .ok_or_else(|| WardenError::Downstream("initialize response has no result".to_string()))?;

        let summary = InitializeSummary {
            server_name: result
                .pointer("/serverInfo/name")
                .and_then(|v| v.as_str())
                .map(String::from),
            instructions: result
                .get("instructions")
                .and_then(|v| v.as_str())
                .map(String::from),
        };

        self.notify("notifications/initialized", None).await?;
        info!(server = ?summary.server_name, "downstream session initialized");
        Ok(summary)
    }

    /// Fetch the downstream tool list.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, WardenError> {
        let response = self.request("tools/list", serde_json::json!({})).await?;
        if let Some(error) = &response.error {
            return Err(WardenError::Downstream(format!(
                "tools/list failed: {} (code {})",
                error.message, error.code
            )));
        }
        let result = response
            .result
            .ok_or_else(|| WardenError::Downstream("tools/list response has no result".to_string()))?;
        let tools = result
            .get("tools")
            .ok_or_else(|| WardenError::Downstream("tools/list result has no 'tools' field".to_string()))?;
        serde_json::from_value(tools.clone())
            .map_err(|e| WardenError::Downstream(format!("failed to parse tools list: {e}")))
    }

    /// Forward a tool call. The full response comes back so the caller can
    /// distinguish results from downstream errors.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<JsonRpcMessage, WardenError> {
        self.request(
            "tools/call",
            serde_json::json!({"name": name, "arguments": arguments}),
        )
        .await
    }

    /// Forward an arbitrary request verbatim (prompts, resources).
    pub async fn passthrough(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<JsonRpcMessage, WardenError> {
        self.request(method, params).await
    }

    /// Close the transport; the pump fails all pending requests.
    pub async fn close(&self) -> Result<(), WardenError> {
        self.transport.close().await
    }
}

/// The single reader of the transport.
async fn pump(
    transport: Arc<dyn McpTransport>,
    pending: PendingMap,
    notify_tx: mpsc::UnboundedSender<JsonRpcMessage>,
) {
    loop {
        let message = match transport.recv().await {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "downstream receive pump stopping");
                break;
            }
        };

        if message.is_response() {
            let key = message
                .id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_default();
            let waiter = pending.lock().expect("pending map poisoned").remove(&key);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => warn!(id = %key, "orphan response from downstream"),
            }
        } else if message.is_notification() {
            if notify_tx.send(message).is_err() {
                break;
            }
        } else if let (Some(id), Some(method)) = (message.id.clone(), message.method.as_deref()) {
            // Server-to-client request. Answer ping; refuse the rest.
            let reply = if method == "ping" {
                JsonRpcMessage::response(id, serde_json::json!({}))
            } else {
                warn!(method = method, "refusing unsupported downstream request");
                JsonRpcMessage::error_response(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    "method not supported by wrapper",
                )
            };
            if transport.send(reply).await.is_err() {
                break;
            }
        }
    }

    // Cancel everything in flight; dropping the senders fails the waiters.
    pending.lock().expect("pending map poisoned").clear();
    // notify_tx drops here, closing the wrapper's notification stream.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{init_response, tools_response, ScriptedTransport};

    // ── Test: initialize handshake ────────────────────────────

    #[tokio::test]
    async fn initialize_extracts_instructions_and_sends_initialized() {
        let (transport, _handle) =
            ScriptedTransport::new(vec![init_response(Some("Use with care"))]);
        let client = DownstreamClient::new(transport.clone());

        let summary = client.initialize().await.unwrap();
        assert_eq!(summary.instructions.as_deref(), Some("Use with care"));
        assert_eq!(summary.server_name.as_deref(), Some("scripted-server"));
        assert_eq!(
            transport.sent_methods(),
            vec!["initialize", "notifications/initialized"]
        );
    }

    #[tokio::test]
    async fn initialize_with_absent_instructions() {
        let (transport, _handle) = ScriptedTransport::new(vec![init_response(None)]);
        let client = DownstreamClient::new(transport);
        let summary = client.initialize().await.unwrap();
        assert!(summary.instructions.is_none());
    }

    // ── Test: tools/list parsing ──────────────────────────────

    #[tokio::test]
    async fn list_tools_parses_definitions() {
        let (transport, _handle) = ScriptedTransport::new(vec![tools_response(serde_json::json!([
            {"name": "echo", "description": "Echo", "inputSchema": {"type": "object"}},
            {"name": "sum", "inputSchema": {"type": "object"}}
        ]))]);
        let client = DownstreamClient::new(transport);

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "echo");
        assert!(tools[1].description.is_none());
    }

    #[tokio::test]
    async fn list_tools_surfaces_downstream_errors() {
        let (transport, _handle) = ScriptedTransport::new(vec![
            crate::testing::error_template(-32603, "boom"),
        ]);
        let client = DownstreamClient::new(transport);
        let err = client.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    // ── Test: correlation by id, not arrival order ────────────

    #[tokio::test]
    async fn responses_correlate_by_id_out_of_order() {
        // Manual transport: requests stay pending until we answer them,
        // in reverse order of the requests.
        let (transport, handle) = ScriptedTransport::manual();
        let client = Arc::new(DownstreamClient::new(transport));

        let c1 = client.clone();
        let first = tokio::spawn(async move { c1.request("a", serde_json::json!({})).await });
        let c2 = client.clone();
        let second = tokio::spawn(async move { c2.request("b", serde_json::json!({})).await });

        // Wait until both requests are registered, then answer in reverse.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.push_raw(JsonRpcMessage::response(
            serde_json::json!(2),
            serde_json::json!("for-b"),
        ));
        handle.push_raw(JsonRpcMessage::response(
            serde_json::json!(1),
            serde_json::json!("for-a"),
        ));

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.result, Some(serde_json::json!("for-a")));
        assert_eq!(second.result, Some(serde_json::json!("for-b")));
    }

    // ── Test: disconnect cancels pending requests ─────────────

    #[tokio::test]
    async fn disconnect_fails_pending_with_unavailable() {
        let (transport, handle) = ScriptedTransport::manual();
        let client = Arc::new(DownstreamClient::new(transport));

        let c = client.clone();
        let in_flight = tokio::spawn(async move { c.request("slow", serde_json::json!({})).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        handle.disconnect();
        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, WardenError::Unavailable(_)), "got {err}");
    }

    // ── Test: notifications reach the wrapper channel ─────────

    #[tokio::test]
    async fn notifications_flow_to_the_channel_and_close_on_disconnect() {
        let (transport, handle) = ScriptedTransport::new(vec![]);
        let client = DownstreamClient::new(transport);
        let mut notifications = client.take_notifications().unwrap();
        assert!(client.take_notifications().is_none());

        handle.push_notification("notifications/tools/list_changed", None);
        let note = notifications.recv().await.unwrap();
        assert_eq!(
            note.method.as_deref(),
            Some("notifications/tools/list_changed")
        );

        handle.disconnect();
        assert!(notifications.recv().await.is_none());
    }

    // ── Test: downstream ping is answered ─────────────────────

    #[tokio::test]
    async fn downstream_ping_gets_an_empty_result() {
        let (transport, handle) = ScriptedTransport::new(vec![]);
        let _client = DownstreamClient::new(transport.clone());

        handle.push_raw(JsonRpcMessage::request(99, "ping", serde_json::json!({})));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let sent = transport.sent_methods();
        // The reply is a response (no method), so sent_methods stays empty,
        // but the raw sent list has one response with the echoed id.
        assert!(sent.is_empty());
    }
}
