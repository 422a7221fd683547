/// MCP wrapper proxy for mcp-warden.
///
/// Security gateway that sits between an MCP host and one downstream MCP
/// server:
/// - **Transports**: stdio child process, streamable HTTP, and SSE adapters
///   unified by a sum type
/// - **Downstream client**: the live MCP session to the wrapped server, with
///   request-id correlation and a notification channel
/// - **Sanitizer**: ANSI control-sequence stripping on every host-bound text
///   surface
/// - **Wrapper server**: the host-facing MCP facade that enforces the
///   approval gate and runs the guardrail/quarantine pipeline
pub mod downstream;
pub mod sanitize;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport_http;
pub mod transport_sse;
pub mod transport_stdio;
pub mod wrapper;

use warden_types::errors::WardenError;
use warden_types::protocol::{JsonRpcMessage, ServerIdentity, TransportKind};
use warden_types::traits::McpTransport;

pub use downstream::DownstreamClient;
pub use wrapper::WrapperServer;

/// The concrete transport adapters, unified as a sum type.
///
/// The trait [`McpTransport`] remains the contract (and the seam test
/// doubles implement); this enum is how production code names "whichever
/// adapter the CLI selected" without a heap of trait objects.
pub enum Transport {
    /// Child process over stdin/stdout.
    Stdio(transport_stdio::StdioTransport),
    /// Streamable HTTP endpoint.
    Http(transport_http::HttpTransport),
    /// SSE endpoint.
    Sse(transport_sse::SseTransport),
}

impl Transport {
    /// Connect the adapter matching the server identity.
    pub async fn connect(identity: &ServerIdentity) -> Result<Self, WardenError> {
        match identity.kind {
            TransportKind::Stdio => Ok(Transport::Stdio(
                transport_stdio::StdioTransport::spawn(&identity.locator).await?,
            )),
            TransportKind::Http => Ok(Transport::Http(transport_http::HttpTransport::new(
                &identity.locator,
            )?)),
            TransportKind::Sse => Ok(Transport::Sse(
                transport_sse::SseTransport::connect(&identity.locator).await?,
            )),
        }
    }
}

#[async_trait::async_trait]
impl McpTransport for Transport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), WardenError> {
        match self {
            Transport::Stdio(t) => t.send(message).await,
            Transport::Http(t) => t.send(message).await,
            Transport::Sse(t) => t.send(message).await,
        }
    }

    async fn recv(&self) -> Result<JsonRpcMessage, WardenError> {
        match self {
            Transport::Stdio(t) => t.recv().await,
            Transport::Http(t) => t.recv().await,
            Transport::Sse(t) => t.recv().await,
        }
    }

    async fn close(&self) -> Result<(), WardenError> {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::Http(t) => t.close().await,
            Transport::Sse(t) => t.close().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Transport::Stdio(t) => t.is_connected(),
            Transport::Http(t) => t.is_connected(),
            Transport::Sse(t) => t.is_connected(),
        }
    }
}
