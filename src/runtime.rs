//! The runtime that turns a catalog of [`AdapterSpec`]s into ready adapters.

use crate::adapter::ProviderAdapter;
use crate::api::{AdapterSpec, ProviderKind};
use crate::config::{AdapterConfig, EnvKeyStore};
use crate::error::{Result, RelayError};
use crate::reliability::CircuitBreakerConfig;
use crate::traits::{ChatAdapter, KeyStore, ProviderTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Builds the transport for one resolved adapter configuration.
pub type TransportFactory =
    Arc<dyn Fn(&AdapterConfig) -> Result<Arc<dyn ProviderTransport>> + Send + Sync>;

/// Owns the key store, the transport factories and every configured adapter.
///
/// Obtain an instance via [`RelayRuntime::builder()`]. Adapters are built and
/// validated up front, so a runtime that built successfully only fails
/// lookups for aliases it does not know.
pub struct RelayRuntime {
    context: BuildContext,
    adapters: RwLock<HashMap<String, Arc<ProviderAdapter>>>,
}

struct BuildContext {
    key_store: Arc<dyn KeyStore>,
    factories: HashMap<ProviderKind, TransportFactory>,
    breaker: CircuitBreakerConfig,
    #[cfg(feature = "transport-http")]
    client: reqwest::Client,
}

impl BuildContext {
    fn construct(&self, spec: &AdapterSpec) -> Result<Arc<ProviderAdapter>> {
        let config = AdapterConfig::resolve(spec, self.key_store.as_ref())?;
        let transport = match self.factories.get(&spec.provider) {
            Some(factory) => factory(&config)?,
            None => self.default_transport(&config)?,
        };

        tracing::info!(
            alias = %config.alias,
            provider = %config.provider,
            model = %config.model,
            "Adapter ready"
        );
        Ok(Arc::new(
            ProviderAdapter::new(config, transport).with_circuit_breaker(self.breaker.clone()),
        ))
    }

    fn default_transport(&self, config: &AdapterConfig) -> Result<Arc<dyn ProviderTransport>> {
        #[cfg(feature = "transport-http")]
        {
            if config.provider.is_openai_compatible() {
                return Ok(Arc::new(
                    crate::provider::OpenAiCompatibleTransport::with_client(
                        self.client.clone(),
                        config,
                    ),
                ));
            }
        }
        Err(RelayError::Config(format!(
            "No transport registered for provider '{}' (alias '{}')",
            config.provider, config.alias
        )))
    }
}

impl RelayRuntime {
    pub fn builder() -> RelayRuntimeBuilder {
        RelayRuntimeBuilder::default()
    }

    /// Add an adapter at runtime.
    pub async fn register(&self, spec: AdapterSpec) -> Result<()> {
        let mut adapters = self.adapters.write().await;
        if adapters.contains_key(&spec.alias) {
            return Err(RelayError::Config(format!(
                "Alias '{}' already exists",
                spec.alias
            )));
        }
        let adapter = self.context.construct(&spec)?;
        adapters.insert(spec.alias, adapter);
        Ok(())
    }

    pub async fn contains_alias(&self, alias: &str) -> bool {
        self.adapters.read().await.contains_key(alias)
    }

    /// All configured aliases, sorted.
    pub async fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.adapters.read().await.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// The adapter for `alias`.
    pub async fn adapter(&self, alias: &str) -> Result<Arc<dyn ChatAdapter>> {
        let adapter: Arc<dyn ChatAdapter> = self.provider_adapter(alias).await?;
        Ok(adapter)
    }

    /// The concrete adapter for `alias`, for callers that need
    /// [`ProviderAdapter::embed_with_cancellation`] or the resolved config.
    pub async fn provider_adapter(&self, alias: &str) -> Result<Arc<ProviderAdapter>> {
        self.adapters
            .read()
            .await
            .get(alias)
            .cloned()
            .ok_or_else(|| RelayError::ProviderNotFound(format!("Alias '{}' not found", alias)))
    }
}

/// Builder for [`RelayRuntime`].
///
/// ```rust,no_run
/// # use uni_relay::config::StaticKeyStore;
/// # use uni_relay::runtime::RelayRuntime;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = RelayRuntime::builder()
///     .key_store(StaticKeyStore::new().with_key("OPENAI_API_KEY", "sk-..."))
///     .catalog_from_str(r#"[{"alias": "chat/default", "provider": "openai", "model": "gpt-4o-mini"}]"#)?
///     .build()?;
/// let adapter = runtime.adapter("chat/default").await?;
/// # Ok(())
/// # }
/// ```
pub struct RelayRuntimeBuilder {
    key_store: Arc<dyn KeyStore>,
    factories: HashMap<ProviderKind, TransportFactory>,
    catalog: Vec<AdapterSpec>,
    breaker: CircuitBreakerConfig,
}

impl Default for RelayRuntimeBuilder {
    fn default() -> Self {
        Self {
            key_store: Arc::new(EnvKeyStore),
            factories: HashMap::new(),
            catalog: Vec::new(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl RelayRuntimeBuilder {
    /// Credential source. Defaults to [`EnvKeyStore`].
    pub fn key_store<K: KeyStore + 'static>(mut self, key_store: K) -> Self {
        self.key_store = Arc::new(key_store);
        self
    }

    /// Use `factory` to build transports for `kind`, replacing the built-in
    /// transport if there is one. Registering twice replaces the first.
    pub fn transport_factory<F>(mut self, kind: ProviderKind, factory: F) -> Self
    where
        F: Fn(&AdapterConfig) -> Result<Arc<dyn ProviderTransport>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    pub fn catalog(mut self, catalog: Vec<AdapterSpec>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Load catalog from a JSON string (array of adapter specs).
    pub fn catalog_from_str(mut self, s: &str) -> Result<Self> {
        self.catalog = crate::api::catalog_from_str(s)?;
        Ok(self)
    }

    /// Load catalog from a JSON file (array of adapter specs).
    pub fn catalog_from_file(mut self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        self.catalog = crate::api::catalog_from_file(path)?;
        Ok(self)
    }

    /// Circuit-breaker settings applied to every adapter.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Validate the catalog, resolve credentials and construct every adapter.
    ///
    /// Fails on the first invalid spec, missing key, provider without a
    /// transport, or duplicate alias.
    pub fn build(self) -> Result<Arc<RelayRuntime>> {
        let context = BuildContext {
            key_store: self.key_store,
            factories: self.factories,
            breaker: self.breaker,
            #[cfg(feature = "transport-http")]
            client: reqwest::Client::new(),
        };

        let mut adapters = HashMap::with_capacity(self.catalog.len());
        for spec in &self.catalog {
            if adapters.contains_key(&spec.alias) {
                return Err(RelayError::Config(format!(
                    "Duplicate alias '{}' in catalog",
                    spec.alias
                )));
            }
            let adapter = context.construct(spec)?;
            adapters.insert(spec.alias.clone(), adapter);
        }

        Ok(Arc::new(RelayRuntime {
            context,
            adapters: RwLock::new(adapters),
        }))
    }
}
