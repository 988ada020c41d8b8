//! Scripted transport and runtime helpers shared by the integration tests.

use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uni_relay::api::{AdapterSpec, ProviderKind, RateLimitConfig};
use uni_relay::config::{AdapterConfig, StaticKeyStore};
use uni_relay::error::{RelayError, Result};
use uni_relay::runtime::RelayRuntime;
use uni_relay::traits::{NativeRequest, NativeResponse, ProviderTransport, TokenStream};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Respond(NativeResponse),
    Stream(Vec<String>),
    Fail(RelayError),
    /// Sleep before answering with the text.
    Slow(Duration, String),
}

impl Step {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn stream(chunks: &[&str]) -> Self {
        Self::Stream(chunks.iter().map(|c| c.to_string()).collect())
    }
}

/// Replays steps in order; the last step repeats once the script runs out.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    requests: Mutex<Vec<NativeRequest>>,
    embed_rate_limits: AtomicU32,
    embed_calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            embed_rate_limits: AtomicU32::new(0),
            embed_calls: AtomicU32::new(0),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(vec![step])
    }

    pub fn with_embed_rate_limits(self, count: u32) -> Self {
        self.embed_rate_limits.store(count, Ordering::SeqCst);
        self
    }

    pub fn requests(&self) -> Vec<NativeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn embed_count(&self) -> u32 {
        self.embed_calls.load(Ordering::SeqCst)
    }

    fn next(&self, request: &NativeRequest) -> Step {
        self.requests.lock().unwrap().push(request.clone());
        let mut last = self.last.lock().unwrap();
        match self.script.lock().unwrap().pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last
                .clone()
                .unwrap_or(Step::Fail(RelayError::ProviderFault("script exhausted".into()))),
        }
    }
}

#[async_trait]
impl ProviderTransport for ScriptedTransport {
    async fn complete(&self, request: &NativeRequest) -> Result<NativeResponse> {
        match self.next(request) {
            Step::Text(text) => Ok(NativeResponse::text(text)),
            Step::Respond(response) => Ok(response),
            Step::Stream(chunks) => Ok(NativeResponse::text(chunks.concat())),
            Step::Fail(e) => Err(e),
            Step::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(NativeResponse::text(text))
            }
        }
    }

    async fn stream(&self, request: &NativeRequest) -> Result<TokenStream> {
        let chunks = match self.next(request) {
            Step::Stream(chunks) => chunks,
            Step::Text(text) => vec![text],
            Step::Respond(response) => vec![response.text.unwrap_or_default()],
            Step::Fail(e) => return Err(e),
            Step::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                vec![text]
            }
        };
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.embed_rate_limits.load(Ordering::SeqCst) > 0 {
            self.embed_rate_limits.fetch_sub(1, Ordering::SeqCst);
            return Err(RelayError::RateLimited);
        }
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![0.1; 8])
    }
}

/// Key store holding a dummy value for every default key name.
pub fn all_keys() -> StaticKeyStore {
    ProviderKind::ALL
        .into_iter()
        .filter_map(|kind| kind.default_key_name())
        .fold(StaticKeyStore::new(), |store, name| store.with_key(name, "test-key"))
}

/// Spec with fast rate-limit backoff so tests do not sleep for seconds.
pub fn fast_spec(alias: &str, provider: ProviderKind) -> AdapterSpec {
    let mut spec = AdapterSpec::new(alias, provider, "test-model");
    spec.rate_limit = Some(RateLimitConfig {
        max_retries: 5,
        base_delay_ms: 1,
        max_jitter_ms: 1,
    });
    spec
}

/// Runtime with a single adapter `chat/test` for `provider`, served by
/// `transport`.
pub fn runtime_with(
    provider: ProviderKind,
    transport: Arc<ScriptedTransport>,
) -> Arc<RelayRuntime> {
    runtime_with_spec(fast_spec("chat/test", provider), transport)
}

pub fn runtime_with_spec(spec: AdapterSpec, transport: Arc<ScriptedTransport>) -> Arc<RelayRuntime> {
    let provider = spec.provider;
    RelayRuntime::builder()
        .key_store(all_keys())
        .transport_factory(provider, move |_: &AdapterConfig| {
            Ok(transport.clone() as Arc<dyn ProviderTransport>)
        })
        .catalog(vec![spec])
        .build()
        .unwrap()
}
