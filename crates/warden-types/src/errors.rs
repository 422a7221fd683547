/// Unified error type for the mcp-warden wrapper.
///
/// All crates use this error type for propagation across crate boundaries.
/// Internal module errors should be converted into the appropriate variant.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Error on a transport leg (framing, I/O, disconnect).
    #[error("transport error: {0}")]
    Transport(String),

    /// Error reported by or about the downstream MCP server.
    #[error("downstream error: {0}")]
    Downstream(String),

    /// The downstream server is not connected or has gone away.
    #[error("downstream unavailable: {0}")]
    Unavailable(String),

    /// Error from the approval or quarantine store (I/O, corrupt file).
    #[error("store error: {0}")]
    Store(String),

    /// A tool schema or instructions text could not be canonicalized.
    #[error("canonicalization error: {0}")]
    Canonical(String),

    /// Error from a guardrail provider (scan failure, unknown provider).
    #[error("guardrail error: {0}")]
    Guardrail(String),

    /// Error from the quarantine subsystem (missing entry, not released).
    #[error("quarantine error: {0}")]
    Quarantine(String),

    /// Error from configuration validation.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Timeout waiting for a response (downstream call, guardrail scan).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::Transport(err.to_string())
    }
}
