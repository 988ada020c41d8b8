//! Resolved, read-only adapter configuration and the bundled key stores.

use crate::api::{AdapterSpec, DefectRetryConfig, ProviderKind, RateLimitConfig};
use crate::error::{Result, RelayError};
use crate::traits::KeyStore;
use std::collections::HashMap;
use std::time::Duration;

/// Everything an adapter needs, resolved once at construction.
///
/// Never mutated after [`resolve`](Self::resolve); adapters hold it by value
/// and share nothing else between concurrent calls.
#[derive(Clone)]
pub struct AdapterConfig {
    pub alias: String,
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
    pub defect_retry: DefectRetryConfig,
    pub rate_limit: Option<RateLimitConfig>,
    pub options: serde_json::Value,
}

impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("alias", &self.alias)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AdapterConfig {
    /// Validate `spec` and look up its credential in `keys`.
    ///
    /// Backends without a default key name (local Ollama) only consult the
    /// key store when the spec names a key explicitly.
    pub fn resolve(spec: &AdapterSpec, keys: &dyn KeyStore) -> Result<Self> {
        spec.validate()?;

        let key_name = spec
            .api_key_name
            .as_deref()
            .or(spec.provider.default_key_name());
        let api_key = key_name.map(|name| keys.get_key(name)).transpose()?;

        let base_url = spec
            .base_url
            .clone()
            .unwrap_or_else(|| spec.provider.default_base_url().to_string());

        Ok(Self {
            alias: spec.alias.clone(),
            provider: spec.provider,
            model: spec.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout: spec.timeout_duration(),
            defect_retry: spec.defect_retry.clone(),
            rate_limit: spec.rate_limit.clone(),
            options: spec.options.clone(),
        })
    }

    /// Configuration for tests and callers that wire transports by hand.
    pub fn unauthenticated(provider: ProviderKind, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            alias: format!("{}/{}", provider.id(), model),
            provider,
            model,
            base_url: provider.default_base_url().to_string(),
            api_key: None,
            timeout: None,
            defect_retry: DefectRetryConfig::default(),
            rate_limit: Some(RateLimitConfig::default()),
            options: serde_json::Value::Null,
        }
    }
}

/// In-memory key store, typically filled by a config loader at startup.
#[derive(Default, Clone)]
pub struct StaticKeyStore {
    keys: HashMap<String, String>,
}

impl StaticKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }
}

impl KeyStore for StaticKeyStore {
    fn get_key(&self, name: &str) -> Result<String> {
        self.keys
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| RelayError::MissingKey(name.to_string()))
    }
}

/// Key store that reads the process environment on each lookup.
///
/// Only consulted from [`AdapterConfig::resolve`], so the environment is read
/// once per adapter at construction and never during a request.
#[derive(Default, Clone, Copy)]
pub struct EnvKeyStore;

impl KeyStore for EnvKeyStore {
    fn get_key(&self, name: &str) -> Result<String> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(RelayError::MissingKey(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    #[test]
    fn resolve_reads_default_key_and_base_url() {
        let keys = StaticKeyStore::new().with_key("OPENAI_API_KEY", "sk-test");
        let spec = AdapterSpec::new("chat/a", ProviderKind::OpenAi, "gpt-4o-mini");
        let config = AdapterConfig::resolve(&spec, &keys).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn resolve_honours_overrides() {
        let keys = StaticKeyStore::new().with_key("MY_KEY", "k");
        let mut spec = AdapterSpec::new("chat/a", ProviderKind::Groq, "llama");
        spec.api_key_name = Some("MY_KEY".into());
        spec.base_url = Some("http://localhost:8080/v1/".into());
        let config = AdapterConfig::resolve(&spec, &keys).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn resolve_fails_on_missing_key() {
        let spec = AdapterSpec::new("chat/a", ProviderKind::Anthropic, "claude");
        let err = AdapterConfig::resolve(&spec, &StaticKeyStore::new()).unwrap_err();
        assert_eq!(err, RelayError::MissingKey("ANTHROPIC_API_KEY".into()));
    }

    #[test]
    fn ollama_needs_no_key() {
        let spec = AdapterSpec::new("chat/local", ProviderKind::Ollama, "llama3");
        let config = AdapterConfig::resolve(&spec, &StaticKeyStore::new()).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn debug_redacts_key() {
        let keys = StaticKeyStore::new().with_key("OPENAI_API_KEY", "sk-secret");
        let spec = AdapterSpec::new("chat/a", ProviderKind::OpenAi, "gpt");
        let config = AdapterConfig::resolve(&spec, &keys).unwrap();
        assert!(!format!("{config:?}").contains("sk-secret"));
    }

    #[tokio::test]
    async fn env_key_store_reads_environment() {
        let _lock = ENV_LOCK.lock().await;
        // SAFETY: protected by ENV_LOCK
        unsafe { std::env::set_var("UNI_RELAY_TEST_KEY", "value") };
        assert!(EnvKeyStore.has_key("UNI_RELAY_TEST_KEY"));
        // SAFETY: protected by ENV_LOCK
        unsafe { std::env::remove_var("UNI_RELAY_TEST_KEY") };
        assert!(!EnvKeyStore.has_key("UNI_RELAY_TEST_KEY"));
    }
}
