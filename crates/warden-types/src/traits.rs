/// Trait contracts for the wrapper's pluggable seams.
///
/// Two seams are polymorphic: the transport that carries JSON-RPC frames to
/// a downstream server, and the guardrail provider that scans tool
/// responses. Both contracts live here so every crate can depend on them
/// without circular dependencies.
use async_trait::async_trait;

use crate::errors::WardenError;
use crate::protocol::{JsonRpcMessage, ToolExchange, Verdict};

// ============================================================
// Transport contract
// ============================================================

/// A transport carrying JSON-RPC frames to and from a downstream MCP server.
///
/// Methods take `&self`: adapters keep their mutable state behind internal
/// locks so one task can pump `recv` while another task sends. Concrete
/// adapters are unified by a sum type in the proxy crate; this trait is the
/// contract they (and test doubles) implement.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC message to the downstream server.
    async fn send(&self, message: JsonRpcMessage) -> Result<(), WardenError>;

    /// Receive the next JSON-RPC message from the downstream server.
    ///
    /// Blocks until a message arrives or the transport closes. A closed
    /// transport returns `WardenError::Unavailable`.
    async fn recv(&self) -> Result<JsonRpcMessage, WardenError>;

    /// Close the transport connection.
    async fn close(&self) -> Result<(), WardenError>;

    /// Check if the transport is still connected.
    fn is_connected(&self) -> bool;
}

// ============================================================
// Guardrail contract
// ============================================================

/// A pluggable scanner that inspects tool responses for injection payloads.
///
/// Providers are registered at process start and selected by name via
/// `--guardrail-provider`. A provider must never panic on hostile input;
/// scan failures are treated as suspicious by the caller, not by the
/// provider itself.
#[async_trait]
pub trait GuardrailProvider: Send + Sync {
    /// Stable name used for registry lookup and CLI selection.
    fn name(&self) -> &str;

    /// Scan one tool exchange and return a verdict.
    async fn scan(&self, exchange: &ToolExchange) -> Result<Verdict, WardenError>;
}
