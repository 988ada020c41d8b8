//! The per-backend adapter: one struct, configured by a [`ProviderProfile`],
//! that composes the formatter, sanitizer, tool-call normalizer and retry
//! engine over an injected [`ProviderTransport`].

use crate::api::{ImageInput, ProviderKind, StopSequence};
use crate::config::AdapterConfig;
use crate::error::{Result, RelayError};
use crate::format::{MessageFormatter, SystemMessagePolicy};
use crate::reliability::{
    CircuitBreakerConfig, CircuitBreakerWrapper, Resolution, RetryEngine, RetryPolicy, RetryState,
};
use crate::stream::accumulate;
use crate::thinking::{OrphanClosePolicy, ThinkingSanitizer};
use crate::tool_calls::{NormalizedResponse, ToolCallNormalizer, ToolProsePolicy};
use crate::traits::{
    AdapterCapabilities, ChatAdapter, ChatRequest, NativeRequest, NativeResponse,
    ProviderTransport,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Behavioral flags that distinguish one backend variant from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Accepts tool definitions and can answer with native tool calls.
    pub native_tools: bool,
    /// Tool calls only come back from single-shot requests, so streaming is
    /// switched off whenever tools are attached.
    pub tools_require_single_shot: bool,
    /// Completions are consumed as an incremental token stream.
    pub streaming: bool,
    /// Stop sequences are forwarded to the backend. When `false` they are
    /// applied client-side.
    pub stop_sequences: bool,
    pub vision: bool,
    pub embeddings: bool,
    pub system_policy: SystemMessagePolicy,
    /// Multimodal history is flattened to text before sending.
    pub text_only: bool,
    pub orphan_close_policy: OrphanClosePolicy,
    /// `finish_reason == "length"` is reported as a context overflow.
    pub length_finish_is_overflow: bool,
    pub tool_prose_policy: ToolProsePolicy,
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self {
            native_tools: true,
            tools_require_single_shot: false,
            streaming: false,
            stop_sequences: true,
            vision: true,
            embeddings: false,
            system_policy: SystemMessagePolicy::Prepend,
            text_only: false,
            orphan_close_policy: OrphanClosePolicy::Reconstruct,
            length_finish_is_overflow: true,
            tool_prose_policy: ToolProsePolicy::DiscardProse,
        }
    }
}

impl ProviderProfile {
    pub fn for_kind(kind: ProviderKind) -> Self {
        let base = Self::default();
        match kind {
            ProviderKind::OpenAi | ProviderKind::Mistral | ProviderKind::Ollama => Self {
                embeddings: true,
                ..base
            },
            ProviderKind::Anthropic => Self {
                system_policy: SystemMessagePolicy::SideChannel,
                ..base
            },
            ProviderKind::Gemini => Self {
                embeddings: true,
                system_policy: SystemMessagePolicy::SideChannel,
                ..base
            },
            ProviderKind::Groq => Self {
                orphan_close_policy: OrphanClosePolicy::Retry,
                ..base
            },
            ProviderKind::DeepSeek => Self {
                vision: false,
                text_only: true,
                ..base
            },
            ProviderKind::OpenRouter => base,
            ProviderKind::Replicate => Self {
                native_tools: false,
                streaming: true,
                stop_sequences: false,
                vision: false,
                text_only: true,
                system_policy: SystemMessagePolicy::SideChannel,
                length_finish_is_overflow: false,
                ..base
            },
            ProviderKind::HuggingFace => Self {
                streaming: true,
                tools_require_single_shot: true,
                vision: false,
                text_only: true,
                ..base
            },
            ProviderKind::Qwen => Self {
                streaming: true,
                tools_require_single_shot: true,
                embeddings: true,
                ..base
            },
            ProviderKind::Grok => Self {
                stop_sequences: false,
                ..base
            },
        }
    }

    pub fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            vision: self.vision,
            native_tools: self.native_tools,
            embeddings: self.embeddings,
            stop_sequences: self.stop_sequences,
            streaming: self.streaming,
        }
    }
}

/// A [`ChatAdapter`] for one backend.
///
/// Everything here is read-only after construction. Each call builds its own
/// [`RetryState`]; the only shared mutable piece is the circuit breaker,
/// which tracks backend health rather than request state.
pub struct ProviderAdapter {
    config: AdapterConfig,
    profile: ProviderProfile,
    transport: Arc<dyn ProviderTransport>,
    formatter: MessageFormatter,
    sanitizer: ThinkingSanitizer,
    normalizer: ToolCallNormalizer,
    engine: RetryEngine,
    breaker: CircuitBreakerWrapper,
}

impl ProviderAdapter {
    /// Adapter with the default profile for `config.provider`.
    pub fn new(config: AdapterConfig, transport: Arc<dyn ProviderTransport>) -> Self {
        let profile = ProviderProfile::for_kind(config.provider);
        Self::with_profile(config, profile, transport)
    }

    pub fn with_profile(
        config: AdapterConfig,
        profile: ProviderProfile,
        transport: Arc<dyn ProviderTransport>,
    ) -> Self {
        let engine = RetryEngine::new(
            config.provider.id(),
            RetryPolicy {
                shrink_on_overflow: true,
                rate_limit: config.rate_limit.clone(),
                timeout: config.timeout,
            },
        );
        Self {
            formatter: MessageFormatter::new(profile.system_policy, profile.text_only),
            sanitizer: ThinkingSanitizer::default(),
            normalizer: ToolCallNormalizer::new(profile.tool_prose_policy),
            breaker: CircuitBreakerWrapper::new(CircuitBreakerConfig::default()),
            engine,
            config,
            profile,
            transport,
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreakerWrapper::new(config);
        self
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// [`ChatAdapter::embed`] with an external cancellation token.
    pub async fn embed_with_cancellation(
        &self,
        text: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<f32>> {
        let start = Instant::now();
        if !self.profile.embeddings {
            self.record("embed", "error", start);
            return Err(RelayError::Unsupported(format!(
                "{} does not offer embeddings",
                self.config.provider
            )));
        }

        let res = self
            .engine
            .with_rate_limit_backoff(cancel, || {
                self.breaker.call(|| {
                    self.engine
                        .within_timeout(self.transport.embed(&self.config.model, text))
                })
            })
            .await
            .and_then(|vector| {
                if vector.is_empty() {
                    Err(RelayError::ProviderFault("empty embedding".to_string()))
                } else {
                    Ok(vector)
                }
            });

        self.record("embed", if res.is_ok() { "vector" } else { "error" }, start);
        res
    }

    /// One provider call for `state`: format, send, normalize.
    async fn attempt(&self, state: RetryState) -> Result<NormalizedResponse> {
        let conversation = match &state.image {
            Some(image) => {
                self.formatter
                    .format_vision(&state.turns, &state.system_message, image)
            }
            None => self.formatter.format(&state.turns, &state.system_message),
        };

        let with_tools = !state.tools.is_empty();
        let request = NativeRequest {
            model: self.config.model.clone(),
            turns: conversation.turns,
            system: conversation.system,
            stop: state.stop.clone().filter(|_| self.profile.stop_sequences),
            tools: state.tools.clone(),
            stream: self.profile.streaming
                && !(with_tools && self.profile.tools_require_single_shot),
        };

        tracing::debug!(
            provider = %self.config.provider,
            attempt = state.attempt,
            turns = request.turns.len(),
            stream = request.stream,
            tools = request.tools.len(),
            "Sending request"
        );

        let stop = state.stop.as_ref();
        let response = self
            .breaker
            .call(|| self.engine.within_timeout(self.call_transport(&request, stop)))
            .await?;
        self.normalize(response, stop)
    }

    async fn call_transport(
        &self,
        request: &NativeRequest,
        stop: Option<&StopSequence>,
    ) -> Result<NativeResponse> {
        if request.stream {
            let events = self.transport.stream(request).await?;
            let text = accumulate(events, stop).await?;
            Ok(NativeResponse::text(text))
        } else {
            self.transport.complete(request).await
        }
    }

    /// Tool calls short-circuit; otherwise the text is checked for overflow,
    /// emptiness and reasoning defects before it is returned.
    fn normalize(
        &self,
        response: NativeResponse,
        stop: Option<&StopSequence>,
    ) -> Result<NormalizedResponse> {
        if !response.tool_calls.is_empty() {
            return Ok(NormalizedResponse::ToolCalls(
                self.normalizer
                    .normalize(&response.tool_calls, response.text.as_deref()),
            ));
        }

        if self.profile.length_finish_is_overflow
            && response.finish_reason.as_deref() == Some("length")
        {
            return Err(RelayError::ContextLengthExceeded(
                "finish_reason=length".to_string(),
            ));
        }

        let raw = response
            .text
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| RelayError::ProviderFault("empty completion".to_string()))?;

        let sanitized = self.sanitizer.sanitize(&raw);
        if sanitized.partial {
            return Err(RelayError::TransientOutputDefect(
                "unterminated reasoning block".to_string(),
            ));
        }
        if sanitized.reconstructed && self.profile.orphan_close_policy == OrphanClosePolicy::Retry
        {
            return Err(RelayError::TransientOutputDefect(
                "reasoning block without opening marker".to_string(),
            ));
        }

        let mut clean = sanitized.clean;
        if let Some(stop) = stop.filter(|_| !self.profile.stop_sequences) {
            clean = stop.truncate(&clean).trim_end().to_string();
        }
        if clean.trim().is_empty() {
            return Err(RelayError::TransientOutputDefect(
                "reasoning without an answer".to_string(),
            ));
        }
        Ok(NormalizedResponse::Text(clean))
    }

    fn finish(
        &self,
        operation: &'static str,
        res: Result<Resolution<NormalizedResponse>>,
        start: Instant,
    ) -> Result<String> {
        let (status, out) = match res {
            Ok(Resolution::Answer(response)) => {
                let status = if response.is_tool_calls() {
                    "tool_calls"
                } else {
                    "text"
                };
                (status, Ok(response.into_wire()))
            }
            Ok(Resolution::Fallback(fallback)) => ("fallback", Ok(fallback.message().to_string())),
            Err(e) => ("error", Err(e)),
        };
        self.record(operation, status, start);
        out
    }

    fn record(&self, operation: &'static str, status: &'static str, start: Instant) {
        metrics::histogram!(
            "relay_request.duration_seconds",
            "provider" => self.config.provider.id(),
            "operation" => operation
        )
        .record(start.elapsed().as_secs_f64());

        metrics::counter!(
            "relay_request.total",
            "provider" => self.config.provider.id(),
            "operation" => operation,
            "status" => status
        )
        .increment(1);
    }
}

#[async_trait]
impl ChatAdapter for ProviderAdapter {
    fn provider_id(&self) -> &str {
        self.config.provider.id()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.profile.capabilities()
    }

    async fn send_request(&self, request: ChatRequest) -> Result<String> {
        let start = Instant::now();
        let ChatRequest {
            turns,
            system_message,
            stop,
            tools,
            cancel,
        } = request;
        let tools = tools.unwrap_or_default();

        if !tools.is_empty() && !self.profile.native_tools {
            self.record("chat", "error", start);
            return Err(RelayError::Unsupported(format!(
                "{} does not support native tool calling",
                self.config.provider
            )));
        }

        let state = RetryState::new(turns, system_message, self.config.defect_retry.max_attempts)
            .with_stop(stop)
            .with_tools(tools);
        let res = self
            .engine
            .execute(state, cancel.as_ref(), |state| self.attempt(state))
            .await;
        self.finish("chat", res, start)
    }

    async fn send_vision_request(
        &self,
        request: ChatRequest,
        image: ImageInput,
    ) -> Result<String> {
        let start = Instant::now();
        if !self.profile.vision {
            self.record("vision", "error", start);
            return Err(RelayError::Unsupported(format!(
                "{} does not accept image input",
                self.config.provider
            )));
        }

        let state = RetryState::new(
            request.turns,
            request.system_message,
            self.config.defect_retry.max_attempts,
        )
        .with_stop(request.stop)
        .with_image(image);
        let res = self
            .engine
            .execute(state, request.cancel.as_ref(), |state| self.attempt(state))
            .await;
        self.finish("vision", res, start)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_cancellation(text, None).await
    }
}
