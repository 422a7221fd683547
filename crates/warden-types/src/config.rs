/// Configuration for a wrapper instance.
///
/// Centralizes everything that determines how the wrapper connects to its
/// downstream server and which optional subsystems are active. Built by the
/// CLI from parsed arguments; constructed directly in tests.
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::WardenError;
use crate::protocol::ServerIdentity;

/// Default bound on a single guardrail `scan` call.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a wrapper session.
#[derive(Debug, Clone)]
pub struct WrapperConfig {
    /// Identity of the downstream server (transport kind + locator).
    pub identity: ServerIdentity,
    /// Override path for the approval store file.
    pub server_config_file: Option<PathBuf>,
    /// Override path for the quarantine store file.
    pub quarantine_path: Option<PathBuf>,
    /// Name of the guardrail provider to use, if any.
    pub guardrail_provider: Option<String>,
    /// Replace ESC bytes with the literal text "ESC" instead of stripping
    /// control sequences.
    pub visualize_ansi_codes: bool,
    /// Bound on a single guardrail scan call.
    pub scan_timeout: Duration,
}

impl WrapperConfig {
    /// Configuration for a stdio downstream launched with `command`.
    pub fn for_stdio(command: &str) -> Result<Self, WardenError> {
        if command.trim().is_empty() {
            return Err(WardenError::Config(
                "stdio command must not be empty".to_string(),
            ));
        }
        Ok(Self::new(ServerIdentity::stdio(command)))
    }

    /// Configuration for a streamable-HTTP downstream at `url`.
    pub fn for_http(url: &str) -> Result<Self, WardenError> {
        validate_url(url)?;
        Ok(Self::new(ServerIdentity::http(url)))
    }

    /// Configuration for an SSE downstream at `url`.
    pub fn for_sse(url: &str) -> Result<Self, WardenError> {
        validate_url(url)?;
        Ok(Self::new(ServerIdentity::sse(url)))
    }

    fn new(identity: ServerIdentity) -> Self {
        Self {
            identity,
            server_config_file: None,
            quarantine_path: None,
            guardrail_provider: None,
            visualize_ansi_codes: false,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    /// Whether the guardrail/quarantine pipeline is active.
    pub fn use_guardrails(&self) -> bool {
        self.guardrail_provider.is_some()
    }
}

fn validate_url(url: &str) -> Result<(), WardenError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(WardenError::Config(format!(
            "'{url}' is not an http(s) URL"
        )))
    }
}

impl std::fmt::Display for WrapperConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "WrapperConfig:")?;
        writeln!(f, "  Connection: {}", self.identity.kind)?;
        writeln!(f, "  Server: {}", self.identity.locator)?;
        if let Some(ref path) = self.server_config_file {
            writeln!(f, "  Config Path: {}", path.display())?;
        }
        if let Some(ref path) = self.quarantine_path {
            writeln!(f, "  Quarantine Path: {}", path.display())?;
        }
        if let Some(ref provider) = self.guardrail_provider {
            writeln!(f, "  Guardrail Provider: {provider}")?;
        }
        if self.visualize_ansi_codes {
            writeln!(f, "  ANSI Visualization: Enabled")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransportKind;

    #[test]
    fn stdio_config_requires_command() {
        assert!(WrapperConfig::for_stdio("").is_err());
        assert!(WrapperConfig::for_stdio("   ").is_err());
        let config = WrapperConfig::for_stdio("python server.py").unwrap();
        assert_eq!(config.identity.kind, TransportKind::Stdio);
        assert_eq!(config.identity.locator, "python server.py");
        assert!(!config.use_guardrails());
    }

    #[test]
    fn url_configs_reject_non_http_schemes() {
        assert!(WrapperConfig::for_http("ftp://example.com").is_err());
        assert!(WrapperConfig::for_sse("example.com/sse").is_err());
        assert!(WrapperConfig::for_http("https://example.com/mcp").is_ok());
        assert!(WrapperConfig::for_sse("http://127.0.0.1:8080/sse").is_ok());
    }

    #[test]
    fn guardrails_active_only_when_provider_named() {
        let mut config = WrapperConfig::for_stdio("cmd").unwrap();
        assert!(!config.use_guardrails());
        config.guardrail_provider = Some("pattern".to_string());
        assert!(config.use_guardrails());
    }
}
