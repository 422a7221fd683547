//! Wrapper server facade.
//!
//! The host-facing MCP server. Every verb that touches the downstream's
//! tool/prompt surface goes through the approval gate:
//!
//! - `tools/list` exposes only approved downstream tools plus the wrapper's
//!   built-ins, and leaks nothing about blocked tools: no names, counts, or
//!   schemas.
//! - `tools/call` forwards approved tools, answers built-ins locally, and
//!   returns one uniform error for blocked and nonexistent tools so the two
//!   cases are byte-indistinguishable.
//! - Prompts and resources pass through only when the server is fully
//!   approved.
//! - A downstream `tools/list_changed` triggers a re-fetch and re-evaluation
//!   under the session write lock before the next call is admitted; bursts
//!   coalesce into a single refresh.
//!
//! Approved tool responses run through the sanitizer and, when configured,
//! a guardrail provider whose suspicious verdicts divert the payload into
//! quarantine.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_store::{diff_snapshots, evaluate, ApprovalStore, Evaluation, OverallState, QuarantineStore, ServerSnapshot};
use warden_types::config::WrapperConfig;
use warden_types::errors::WardenError;
use warden_types::protocol::{error_codes, JsonRpcMessage, ToolExchange, Verdict};
use warden_types::traits::GuardrailProvider;

use crate::downstream::DownstreamClient;
use crate::sanitize::{sanitize_text, SanitizeMode};

// ============================================================
// Built-in tools and fixed texts
// ============================================================

/// Reserved name of the "why are my tools missing" built-in.
pub const CONFIG_INSTRUCTIONS_TOOL: &str = "config_instructions";

/// Reserved name of the quarantine release built-in.
pub const QUARANTINE_RELEASE_TOOL: &str = "quarantine_release";

/// The uniform error message for a tool that is blocked or does not exist.
/// One constant on purpose: callers must not be able to distinguish the two.
pub const BLOCKED_TOOL_MESSAGE: &str =
    "tool unavailable: it does not exist or is blocked pending configuration review";

/// Error message for prompt/resource surfaces while the server is not fully
/// approved.
const UNAPPROVED_SURFACE_MESSAGE: &str = "server configuration not approved";

/// Fixed explanatory text returned by `config_instructions`. Deliberately
/// free of counts or tool names.
const CONFIG_INSTRUCTIONS_TEXT: &str = "\
Tools from the wrapped server may be hidden because its configuration has not \
been approved, or because it changed since it was last approved. To inspect \
and approve the configuration, run the review command in a terminal:\n\
\n\
    mcp-warden --review-server --command \"<server command>\"\n\
\n\
(use --url or --sse-url for remote servers). After approving, reconnect to \
use the server's tools.";

/// Downstream notifications forwarded verbatim to the host.
/// `tools/list_changed` is absent on purpose: it triggers a re-evaluation
/// first and is re-emitted afterwards.
const FORWARDED_NOTIFICATIONS: &[&str] = &[
    "notifications/prompts/list_changed",
    "notifications/resources/list_changed",
    "notifications/resources/updated",
    "notifications/progress",
    "notifications/message",
    "notifications/cancelled",
];

// ============================================================
// Session state
// ============================================================

/// Mutable per-session view of the downstream: the current snapshot and its
/// evaluation. Guarded by the session lock; a refresh replaces both
/// atomically.
struct SessionState {
    snapshot: ServerSnapshot,
    evaluation: Evaluation,
}

// ============================================================
// WrapperServer
// ============================================================

/// The host-facing MCP server enforcing the approval gate.
pub struct WrapperServer {
    config: WrapperConfig,
    downstream: Arc<DownstreamClient>,
    approvals: Arc<ApprovalStore>,
    quarantine: Option<Arc<QuarantineStore>>,
    guardrail: Option<Arc<dyn GuardrailProvider>>,
    state: RwLock<SessionState>,
    outbox: mpsc::UnboundedSender<JsonRpcMessage>,
}

impl WrapperServer {
    /// Initialize the downstream session, take the first snapshot, evaluate
    /// it, and start the notification loop.
    ///
    /// Returns the server and the host-bound notification stream (the
    /// "outbox") the caller must drain toward the host.
    pub async fn start(
        config: WrapperConfig,
        downstream: Arc<DownstreamClient>,
        approvals: Arc<ApprovalStore>,
        quarantine: Option<Arc<QuarantineStore>>,
        guardrail: Option<Arc<dyn GuardrailProvider>>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<JsonRpcMessage>), WardenError> {
        let summary = downstream.initialize().await?;
        let tools = downstream.list_tools().await?;
        let snapshot = ServerSnapshot::from_parts(summary.instructions, tools);
        let evaluation = approvals.evaluate(&config.identity, &snapshot);

        info!(
            server = %config.identity,
            overall = ?evaluation.overall_state,
            blocked_tools = evaluation.blocked_tool_count(),
            "downstream snapshot evaluated"
        );

        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let server = Arc::new(Self {
            config,
            downstream: downstream.clone(),
            approvals,
            quarantine,
            guardrail,
            state: RwLock::new(SessionState {
                snapshot,
                evaluation,
            }),
            outbox: outbox_tx,
        });

        if let Some(notifications) = downstream.take_notifications() {
            let looped = server.clone();
            tokio::spawn(async move {
                notification_loop(looped, notifications).await;
            });
        }

        Ok((server, outbox_rx))
    }

    /// The current snapshot (cloned). Used by the review CLI.
    pub async fn snapshot(&self) -> ServerSnapshot {
        self.state.read().await.snapshot.clone()
    }

    /// The current evaluation (cloned).
    pub async fn evaluation(&self) -> Evaluation {
        self.state.read().await.evaluation.clone()
    }

    fn mode(&self) -> SanitizeMode {
        SanitizeMode::from_flag(self.config.visualize_ansi_codes)
    }

    fn send_upstream(&self, message: JsonRpcMessage) {
        let _ = self.outbox.send(message);
    }

    // ------------------------------------------------------------
    // Message dispatch
    // ------------------------------------------------------------

    /// Handle one host message. Requests produce a response; notifications
    /// produce `None`.
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        let method = message.method.clone()?;

        match (method.as_str(), message.id.clone()) {
            ("initialize", Some(id)) => Some(self.handle_initialize(id)),
            ("ping", Some(id)) => Some(JsonRpcMessage::response(id, serde_json::json!({}))),
            ("tools/list", Some(id)) => Some(self.handle_tools_list(id).await),
            ("tools/call", Some(id)) => Some(self.handle_tools_call(id, message.params).await),
            ("prompts/list", Some(id)) => {
                Some(self.handle_gated_list(id, "prompts/list", "prompts", message.params).await)
            }
            ("resources/list", Some(id)) => {
                Some(
                    self.handle_gated_list(id, "resources/list", "resources", message.params)
                        .await,
                )
            }
            ("prompts/get", Some(id)) => {
                Some(self.handle_gated_fetch(id, "prompts/get", message.params).await)
            }
            ("resources/read", Some(id)) => {
                Some(self.handle_gated_fetch(id, "resources/read", message.params).await)
            }
            (method, None) => {
                self.handle_host_notification(method, message.params).await;
                None
            }
            (method, Some(id)) => {
                debug!(method = method, "unsupported method from host");
                Some(JsonRpcMessage::error_response(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    &format!("method '{method}' not supported"),
                ))
            }
        }
    }

    fn handle_initialize(&self, id: serde_json::Value) -> JsonRpcMessage {
        // Always succeeds; the wrapper advertises itself, never the
        // downstream's identity or instructions.
        JsonRpcMessage::response(
            id,
            serde_json::json!({
                "protocolVersion": warden_types::protocol::MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {"listChanged": true},
                    "prompts": {"listChanged": true},
                    "resources": {"listChanged": true},
                },
                "serverInfo": {
                    "name": "mcp-warden",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    async fn handle_host_notification(&self, method: &str, params: Option<serde_json::Value>) {
        match method {
            "notifications/initialized" | "notifications/cancelled" | "notifications/progress" => {
                if let Err(e) = self.downstream.notify(method, params).await {
                    warn!(method = method, error = %e, "failed to forward host notification");
                }
            }
            other => {
                debug!(method = other, "dropping host notification");
            }
        }
    }

    // ------------------------------------------------------------
    // tools/list
    // ------------------------------------------------------------

    async fn handle_tools_list(&self, id: serde_json::Value) -> JsonRpcMessage {
        let state = self.state.read().await;
        let mut tools = Vec::new();

        tools.push(serde_json::json!({
            "name": CONFIG_INSTRUCTIONS_TOOL,
            "description": "Explains why tools from the wrapped server may be hidden and how to review and approve its configuration.",
            "inputSchema": {"type": "object", "properties": {}, "required": []},
        }));
        if self.config.use_guardrails() {
            tools.push(serde_json::json!({
                "name": QUARANTINE_RELEASE_TOOL,
                "description": "Return a quarantined tool response after it has been approved for release in an out-of-band review.",
                "inputSchema": {
                    "type": "object",
                    "required": ["quarantine_id"],
                    "properties": {
                        "quarantine_id": {
                            "type": "string",
                            "description": "Id of the quarantined response to release",
                        },
                    },
                },
            }));
        }

        for (name, spec) in &state.snapshot.tools {
            if !state.evaluation.is_tool_approved(name) {
                continue;
            }
            if name == CONFIG_INSTRUCTIONS_TOOL || name == QUARANTINE_RELEASE_TOOL {
                // Reserved names stay reserved; the downstream tool is never
                // exposed under them.
                warn!(tool = %name, "downstream tool shadowed by built-in");
                continue;
            }
            tools.push(serde_json::json!({
                "name": spec.name,
                "description": sanitize_text(&spec.description, self.mode()),
                "inputSchema": spec.input_schema,
            }));
        }

        JsonRpcMessage::response(id, serde_json::json!({ "tools": tools }))
    }

    // ------------------------------------------------------------
    // tools/call
    // ------------------------------------------------------------

    async fn handle_tools_call(
        &self,
        id: serde_json::Value,
        params: Option<serde_json::Value>,
    ) -> JsonRpcMessage {
        let params = params.unwrap_or_default();
        let Some(name) = params.get("name").and_then(|v| v.as_str()).map(String::from) else {
            return JsonRpcMessage::error_response(
                id,
                error_codes::INVALID_PARAMS,
                "tools/call requires a tool name",
            );
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        // Built-ins first: their names are reserved even against a
        // downstream tool that collides.
        if name == CONFIG_INSTRUCTIONS_TOOL {
            return text_result(id, CONFIG_INSTRUCTIONS_TEXT);
        }
        if name == QUARANTINE_RELEASE_TOOL {
            return self.handle_quarantine_release(id, &arguments).await;
        }

        // Capture the gate decision, then release the lock: in-flight calls
        // complete with the evaluation active when they were accepted.
        let (blocked, in_snapshot) = {
            let state = self.state.read().await;
            let in_snapshot = state.snapshot.tools.contains_key(&name);
            let blocked = match state.evaluation.overall_state {
                OverallState::BlockedAll => true,
                _ => in_snapshot && !state.evaluation.is_tool_approved(&name),
            };
            (blocked, in_snapshot)
        };

        if blocked {
            debug!(tool = %name, "blocking tool call");
            return blocked_tool_error(id);
        }

        // Approved, or unknown to the snapshot (pass-through).
        let response = match self.downstream.call_tool(&name, arguments.clone()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(tool = %name, error = %e, "downstream call failed");
                return JsonRpcMessage::error_response(
                    id,
                    error_codes::INTERNAL_ERROR,
                    "downstream server unavailable",
                );
            }
        };

        if let Some(error) = response.error {
            if !in_snapshot {
                // Pass-through calls honor downstream semantics on success,
                // but their failures collapse into the uniform blocked error
                // so probing for hidden tools learns nothing.
                return blocked_tool_error(id);
            }
            return JsonRpcMessage {
                jsonrpc: "2.0".to_string(),
                id: Some(id),
                method: None,
                params: None,
                result: None,
                error: Some(error),
            };
        }

        let result = response
            .result
            .unwrap_or_else(|| serde_json::json!({"content": []}));
        self.pipeline_result(id, &name, arguments, result).await
    }

    /// Guardrail + sanitizer pipeline for a successful tool result.
    async fn pipeline_result(
        &self,
        id: serde_json::Value,
        tool_name: &str,
        arguments: serde_json::Value,
        result: serde_json::Value,
    ) -> JsonRpcMessage {
        if let Some(provider) = &self.guardrail {
            let exchange = ToolExchange {
                tool_name: tool_name.to_string(),
                request_args: arguments.clone(),
                response_text: collect_text(&result),
            };

            let verdict =
                match tokio::time::timeout(self.config.scan_timeout, provider.scan(&exchange)).await
                {
                    Ok(Ok(verdict)) => verdict,
                    Ok(Err(e)) => {
                        warn!(provider = provider.name(), error = %e, "guardrail scan failed");
                        Verdict::suspicious(&format!("guardrail_error: {e}"), "")
                    }
                    Err(_) => {
                        warn!(provider = provider.name(), "guardrail scan timed out");
                        Verdict::suspicious("guardrail_timeout", "")
                    }
                };

            if let Verdict::Suspicious { reason, evidence } = verdict {
                return self
                    .quarantine_result(id, tool_name, arguments, result, reason, evidence)
                    .await;
            }
        }

        JsonRpcMessage::response(id, sanitize_result(result, self.mode()))
    }

    async fn quarantine_result(
        &self,
        id: serde_json::Value,
        tool_name: &str,
        arguments: serde_json::Value,
        result: serde_json::Value,
        reason: String,
        evidence: String,
    ) -> JsonRpcMessage {
        let Some(store) = &self.quarantine else {
            // Guardrails without a quarantine store is a wiring bug; fail
            // closed rather than passing a flagged payload.
            return JsonRpcMessage::error_response(
                id,
                error_codes::INTERNAL_ERROR,
                "response flagged by guardrail but quarantine is unavailable",
            );
        };

        let verdict = Verdict::Suspicious {
            reason: reason.clone(),
            evidence,
        };
        match store.quarantine(&self.config.identity, tool_name, arguments, result, verdict) {
            Ok(quarantine_id) => text_result(
                id,
                &format!("[quarantined: id={quarantine_id}, reason={reason}]"),
            ),
            Err(e) => {
                warn!(error = %e, "failed to persist quarantine entry, withholding response");
                JsonRpcMessage::error_response(
                    id,
                    error_codes::INTERNAL_ERROR,
                    "response flagged by guardrail but quarantine is unavailable",
                )
            }
        }
    }

    async fn handle_quarantine_release(
        &self,
        id: serde_json::Value,
        arguments: &serde_json::Value,
    ) -> JsonRpcMessage {
        let Some(store) = &self.quarantine else {
            return JsonRpcMessage::error_response(
                id,
                error_codes::INVALID_PARAMS,
                "quarantine is not enabled for this wrapper",
            );
        };
        let Some(raw_id) = arguments.get("quarantine_id").and_then(|v| v.as_str()) else {
            return JsonRpcMessage::error_response(
                id,
                error_codes::INVALID_PARAMS,
                "quarantine_release requires a 'quarantine_id' string",
            );
        };
        let Ok(quarantine_id) = Uuid::parse_str(raw_id) else {
            return JsonRpcMessage::error_response(
                id,
                error_codes::INVALID_PARAMS,
                "quarantine_id must be a UUID",
            );
        };

        // One message for "missing" and "not yet released": holding an id
        // must not confirm an entry exists before a human released it.
        let entry = match store.get(quarantine_id) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "quarantine read failed");
                return JsonRpcMessage::error_response(
                    id,
                    error_codes::INTERNAL_ERROR,
                    "quarantine store unavailable",
                );
            }
        };
        match entry {
            Some(entry) if entry.released => {
                info!(id = %quarantine_id, "returning released quarantine payload");
                JsonRpcMessage::response(id, sanitize_result(entry.response, self.mode()))
            }
            _ => JsonRpcMessage::error_response(
                id,
                error_codes::INVALID_PARAMS,
                "no releasable quarantined response with that id",
            ),
        }
    }

    // ------------------------------------------------------------
    // Prompts and resources
    // ------------------------------------------------------------

    /// List-shaped surfaces return an empty inventory while gated.
    async fn handle_gated_list(
        &self,
        id: serde_json::Value,
        method: &str,
        list_key: &str,
        params: Option<serde_json::Value>,
    ) -> JsonRpcMessage {
        if !self.is_fully_approved().await {
            debug!(method = method, "gating list on unapproved configuration");
            return JsonRpcMessage::response(id, serde_json::json!({ list_key: [] }));
        }
        self.forward_passthrough(id, method, params).await
    }

    /// Fetch-shaped surfaces fail while gated.
    async fn handle_gated_fetch(
        &self,
        id: serde_json::Value,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> JsonRpcMessage {
        if !self.is_fully_approved().await {
            debug!(method = method, "gating fetch on unapproved configuration");
            return JsonRpcMessage::error_response(
                id,
                error_codes::INVALID_PARAMS,
                UNAPPROVED_SURFACE_MESSAGE,
            );
        }
        self.forward_passthrough(id, method, params).await
    }

    async fn is_fully_approved(&self) -> bool {
        self.state.read().await.evaluation.overall_state == OverallState::FullyApproved
    }

    async fn forward_passthrough(
        &self,
        id: serde_json::Value,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> JsonRpcMessage {
        let params = params.unwrap_or_else(|| serde_json::json!({}));
        match self.downstream.passthrough(method, params).await {
            Ok(response) => {
                if let Some(error) = response.error {
                    JsonRpcMessage {
                        jsonrpc: "2.0".to_string(),
                        id: Some(id),
                        method: None,
                        params: None,
                        result: None,
                        error: Some(error),
                    }
                } else {
                    let result = response.result.unwrap_or(serde_json::Value::Null);
                    JsonRpcMessage::response(id, sanitize_result(result, self.mode()))
                }
            }
            Err(e) => {
                warn!(method = method, error = %e, "passthrough failed");
                JsonRpcMessage::error_response(
                    id,
                    error_codes::INTERNAL_ERROR,
                    "downstream server unavailable",
                )
            }
        }
    }

    // ------------------------------------------------------------
    // Snapshot refresh
    // ------------------------------------------------------------

    /// Re-fetch the tool list and re-evaluate, atomically under the session
    /// write lock. Admission of the next call waits for the lock, so the
    /// re-evaluation happens-before it.
    pub async fn refresh_snapshot(&self) -> Result<(), WardenError> {
        let mut state = self.state.write().await;
        let tools = self.downstream.list_tools().await?;
        let snapshot = ServerSnapshot::from_parts(state.snapshot.instructions.clone(), tools);

        if snapshot != state.snapshot {
            let diff = diff_snapshots(&state.snapshot, &snapshot);
            warn!(server = %self.config.identity, diff = %diff, "configuration changed");
        }

        let evaluation = self.approvals.evaluate(&self.config.identity, &snapshot);
        info!(
            overall = ?evaluation.overall_state,
            blocked_tools = evaluation.blocked_tool_count(),
            "snapshot re-evaluated"
        );
        state.snapshot = snapshot;
        state.evaluation = evaluation;
        Ok(())
    }

    /// Downstream is gone: empty the snapshot, block everything, and tell
    /// the host the tool list changed.
    async fn handle_disconnect(&self) {
        warn!(server = %self.config.identity, "downstream disconnected");
        let mut state = self.state.write().await;
        state.snapshot = ServerSnapshot::default();
        state.evaluation = evaluate(None, &state.snapshot);
        drop(state);
        self.send_upstream(JsonRpcMessage::notification(
            "notifications/tools/list_changed",
            None,
        ));
    }
}

// ============================================================
// Notification loop
// ============================================================

/// Consume downstream notifications: re-evaluate on `tools/list_changed`
/// (coalescing bursts), forward the spec-compliant rest, and treat channel
/// closure as disconnect.
async fn notification_loop(
    server: Arc<WrapperServer>,
    mut notifications: mpsc::UnboundedReceiver<JsonRpcMessage>,
) {
    while let Some(note) = notifications.recv().await {
        let method = note.method.clone().unwrap_or_default();

        if method == "notifications/tools/list_changed" {
            // Coalesce: a burst of change notifications is one refresh.
            let mut others = Vec::new();
            while let Ok(next) = notifications.try_recv() {
                if next.method.as_deref() != Some("notifications/tools/list_changed") {
                    others.push(next);
                }
            }

            if let Err(e) = server.refresh_snapshot().await {
                warn!(error = %e, "snapshot refresh failed");
            }
            server.send_upstream(JsonRpcMessage::notification(
                "notifications/tools/list_changed",
                None,
            ));

            for other in others {
                forward_notification(&server, other);
            }
        } else {
            forward_notification(&server, note);
        }
    }

    server.handle_disconnect().await;
}

fn forward_notification(server: &Arc<WrapperServer>, note: JsonRpcMessage) {
    let method = note.method.clone().unwrap_or_default();
    if FORWARDED_NOTIFICATIONS.contains(&method.as_str()) {
        debug!(method = %method, "forwarding downstream notification");
        server.send_upstream(note);
    } else {
        debug!(method = %method, "discarding non-spec notification");
    }
}

// ============================================================
// Host stdio serving
// ============================================================

/// Serve the wrapper over the process's own stdin/stdout.
///
/// Each host request is handled on its own task so the host-facing stream
/// never blocks on a downstream await; responses and notifications funnel
/// through a single writer.
pub async fn serve_stdio(
    server: Arc<WrapperServer>,
    mut outbox: mpsc::UnboundedReceiver<JsonRpcMessage>,
) -> Result<(), WardenError> {
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<JsonRpcMessage>();

    let funnel = write_tx.clone();
    tokio::spawn(async move {
        while let Some(note) = outbox.recv().await {
            if funnel.send(note).is_err() {
                break;
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = write_rx.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to serialize host-bound message");
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: JsonRpcMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "discarding malformed frame from host");
                continue;
            }
        };

        let server = server.clone();
        let respond = write_tx.clone();
        tokio::spawn(async move {
            if let Some(response) = server.handle_message(message).await {
                let _ = respond.send(response);
            }
        });
    }

    info!("host closed stdin, shutting down");
    drop(write_tx);
    let _ = writer.await;
    server.downstream.close().await
}

// ============================================================
// Helpers
// ============================================================

fn blocked_tool_error(id: serde_json::Value) -> JsonRpcMessage {
    JsonRpcMessage::error_response(id, error_codes::INVALID_PARAMS, BLOCKED_TOOL_MESSAGE)
}

fn text_result(id: serde_json::Value, text: &str) -> JsonRpcMessage {
    JsonRpcMessage::response(
        id,
        serde_json::json!({"content": [{"type": "text", "text": text}]}),
    )
}

/// Concatenated text content of a tool result, for guardrail scanning.
fn collect_text(result: &serde_json::Value) -> String {
    let mut parts = Vec::new();
    if let Some(items) = result.get("content").and_then(|v| v.as_array()) {
        for item in items {
            if item.get("type").and_then(|v| v.as_str()) == Some("text") {
                if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
                    parts.push(text.to_string());
                }
            }
        }
    }
    parts.join(" ")
}

/// Sanitize every text content item in a result value, wherever it nests.
/// Non-text content (images, embedded resources) passes through untouched.
fn sanitize_result(mut result: serde_json::Value, mode: SanitizeMode) -> serde_json::Value {
    sanitize_in_place(&mut result, mode);
    result
}

fn sanitize_in_place(value: &mut serde_json::Value, mode: SanitizeMode) {
    match value {
        serde_json::Value::Object(map) => {
            let is_text_item = map.get("type").and_then(|v| v.as_str()) == Some("text");
            for (key, child) in map.iter_mut() {
                if is_text_item && key == "text" {
                    if let Some(text) = child.as_str() {
                        *child = serde_json::Value::String(sanitize_text(text, mode));
                        continue;
                    }
                }
                sanitize_in_place(child, mode);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_in_place(item, mode);
            }
        }
        _ => {}
    }
}

// ============================================================
// Tests
// ============================================================
