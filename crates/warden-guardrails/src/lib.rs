//! Guardrail providers for the mcp-warden wrapper.
//!
//! A guardrail provider scans tool responses for prompt-injection payloads
//! before they reach the host. Providers are registered once at process
//! start and selected by name; `--list-guardrail-providers` enumerates the
//! registry. The wrapper treats provider failures and timeouts as
//! suspicious, so a broken scanner never silently waves traffic through.
pub mod pattern;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use warden_types::errors::WardenError;
use warden_types::traits::GuardrailProvider;

pub use pattern::PatternProvider;

/// Registry of guardrail providers, keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn GuardrailProvider>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with all built-in providers registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PatternProvider::new()));
        registry
    }

    /// Register a provider. A provider with the same name replaces the
    /// previous registration.
    pub fn register(&mut self, provider: Arc<dyn GuardrailProvider>) {
        debug!(provider = provider.name(), "registered guardrail provider");
        self.providers
            .insert(provider.name().to_string(), provider);
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn GuardrailProvider>, WardenError> {
        self.providers.get(name).cloned().ok_or_else(|| {
            WardenError::Guardrail(format!(
                "unknown guardrail provider '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    /// All registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}
