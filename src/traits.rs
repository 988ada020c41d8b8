//! Core traits: the inbound adapter contract callers use, the outbound
//! transport each backend implements, and the key store the adapter reads
//! credentials from.

use crate::api::{ImageInput, StopSequence, ToolSpec, Turn};
use crate::error::{Result, RelayError};
use crate::tool_calls::NativeToolCall;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Advertised capabilities of a [`ChatAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterCapabilities {
    pub vision: bool,
    pub native_tools: bool,
    pub embeddings: bool,
    pub stop_sequences: bool,
    pub streaming: bool,
}

/// A chat request as handed to [`ChatAdapter::send_request`].
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub turns: Vec<Turn>,
    pub system_message: String,
    pub stop: Option<StopSequence>,
    /// `None` and an empty list both mean "no tools".
    pub tools: Option<Vec<ToolSpec>>,
    /// When cancelled, the in-flight call is aborted and the request resolves
    /// to the disconnect fallback.
    pub cancel: Option<CancellationToken>,
}

impl ChatRequest {
    pub fn new(turns: Vec<Turn>, system_message: impl Into<String>) -> Self {
        Self {
            turns,
            system_message: system_message.into(),
            ..Self::default()
        }
    }

    pub fn with_stop(mut self, stop: impl Into<StopSequence>) -> Self {
        self.stop = Some(stop.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The tool list, treating `None` and `Some(vec![])` alike.
    pub fn tool_list(&self) -> &[ToolSpec] {
        self.tools.as_deref().unwrap_or(&[])
    }
}

/// The uniform capability set every backend variant exposes.
///
/// Chat and vision calls resolve to a single string: either prose or the
/// canonical tool-call envelope (see [`crate::tool_calls`]). Callers must
/// check for the envelope marker before treating the string as a reply.
/// Only [`RelayError::Unsupported`] and configuration errors are ever
/// returned as `Err` from these two methods.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Identifier of the backend this adapter talks to (e.g. `"openai"`).
    fn provider_id(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities;

    async fn send_request(&self, request: ChatRequest) -> Result<String>;

    async fn send_vision_request(
        &self,
        request: ChatRequest,
        image: ImageInput,
    ) -> Result<String>;

    /// Embed a single text. Fails with [`RelayError::Unsupported`] on backends
    /// without an embedding endpoint, and with
    /// [`RelayError::MaxRetriesExceeded`] once rate-limit backoff gives up.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A provider-native request, built by the adapter after formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    /// Set when the backend takes the system prompt outside the turn list.
    pub system: Option<String>,
    /// Only forwarded to backends with native stop support.
    pub stop: Option<StopSequence>,
    pub tools: Vec<ToolSpec>,
    pub stream: bool,
}

/// A single-shot provider response, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<NativeToolCall>,
    pub finish_reason: Option<String>,
}

impl NativeResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<NativeToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }
}

/// Incremental text chunks of a streamed completion.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// The opaque network call to one backend.
///
/// Implementations report failures with the typed taxonomy: HTTP 429 as
/// [`RelayError::RateLimited`], oversized prompts as
/// [`RelayError::ContextLengthExceeded`], and so on. The default method
/// bodies fail with [`RelayError::Unsupported`].
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn complete(&self, request: &NativeRequest) -> Result<NativeResponse>;

    async fn stream(&self, _request: &NativeRequest) -> Result<TokenStream> {
        Err(RelayError::Unsupported(
            "streaming is not offered by this transport".to_string(),
        ))
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>> {
        Err(RelayError::Unsupported(
            "embeddings are not offered by this transport".to_string(),
        ))
    }
}

/// Read-only source of credentials, resolved by the surrounding application.
pub trait KeyStore: Send + Sync {
    /// Return the secret for `name`, or [`RelayError::MissingKey`].
    fn get_key(&self, name: &str) -> Result<String>;

    fn has_key(&self, name: &str) -> bool {
        self.get_key(name).is_ok()
    }
}
