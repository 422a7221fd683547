/// Shared types, traits, and errors for the mcp-warden wrapper.
///
/// This crate is the foundation that all other warden crates depend on.
/// It contains:
/// - **Wire types** (`protocol`) for JSON-RPC and the MCP surface the wrapper touches
/// - **Trait contracts** (`traits`) for transports and guardrail providers
/// - **Error types** (`errors`) for unified error handling
/// - **Config types** (`config`) describing how a wrapper instance is built
pub mod config;
pub mod errors;
pub mod protocol;
pub mod traits;

// Re-export commonly used types at the crate root for convenience.
pub use config::WrapperConfig;
pub use errors::WardenError;
pub use protocol::*;
pub use traits::*;
