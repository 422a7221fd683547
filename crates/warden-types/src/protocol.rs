/// Wire types shared across the wrapper.
///
/// These cover the JSON-RPC envelope and the slice of the MCP surface the
/// wrapper inspects: tool definitions, server identity, and the guardrail
/// verdict attached to tool responses.
use serde::{Deserialize, Serialize};

/// MCP protocol revision the wrapper speaks on both legs.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

// ============================================================
// JSON-RPC envelope
// ============================================================

/// A JSON-RPC 2.0 message for MCP communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID (None for notifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Method name (for requests/notifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Parameters (for requests/notifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Result (for responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error (for error responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Build a request with the given id, method, and params.
    pub fn request(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a notification (no id).
    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a success response echoing the request id.
    pub fn response(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response echoing the request id.
    pub fn error_response(id: serde_json::Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    /// Whether this message is a notification (has a method but no id).
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Whether this message is a response (has an id but no method).
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC error codes the wrapper emits.
pub mod error_codes {
    /// The requested method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ============================================================
// MCP surface types
// ============================================================

/// An MCP tool definition as it appears in `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input.
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Downstream server info captured from the `initialize` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeSummary {
    /// Server-declared name, if any.
    pub server_name: Option<String>,
    /// Server instructions injected into the host's prompt context.
    ///
    /// Absent and empty are distinct: a server that declares `""` made an
    /// explicit (hashable) statement, a server that omits the field did not.
    pub instructions: Option<String>,
}

// ============================================================
// Server identity
// ============================================================

/// Transport family used to reach a downstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process over stdin/stdout.
    Stdio,
    /// Server-sent events endpoint.
    Sse,
    /// Streamable HTTP endpoint.
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// The identity of a downstream server: transport kind plus exact locator.
///
/// The locator is the full command string for stdio servers and the URL for
/// SSE/HTTP servers. Equality is byte-exact; this pair is the unique key in
/// the approval store. Host-side nicknames are never part of identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Transport family.
    pub kind: TransportKind,
    /// Exact command string or URL.
    pub locator: String,
}

impl ServerIdentity {
    /// Build an identity for a stdio server launched with `command`.
    pub fn stdio(command: &str) -> Self {
        Self {
            kind: TransportKind::Stdio,
            locator: command.to_string(),
        }
    }

    /// Build an identity for an SSE server at `url`.
    pub fn sse(url: &str) -> Self {
        Self {
            kind: TransportKind::Sse,
            locator: url.to_string(),
        }
    }

    /// Build an identity for a streamable-HTTP server at `url`.
    pub fn http(url: &str) -> Self {
        Self {
            kind: TransportKind::Http,
            locator: url.to_string(),
        }
    }
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.locator)
    }
}

// ============================================================
// Guardrail types
// ============================================================

/// A tool call and its response, handed to a guardrail provider for scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExchange {
    /// Name of the tool that was called.
    pub tool_name: String,
    /// Arguments the host passed to the tool.
    pub request_args: serde_json::Value,
    /// Text rendering of the tool's response.
    pub response_text: String,
}

/// Verdict produced by a guardrail provider for one tool response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Response looks safe; return it to the host unchanged.
    Clean,
    /// Response looks like a prompt-injection payload; quarantine it.
    Suspicious {
        /// Why the provider flagged this response.
        reason: String,
        /// The matched or offending fragment, for review.
        evidence: String,
    },
}

impl Verdict {
    /// Convenience constructor for a suspicious verdict.
    pub fn suspicious(reason: &str, evidence: &str) -> Self {
        Verdict::Suspicious {
            reason: reason.to_string(),
            evidence: evidence.to_string(),
        }
    }
}
