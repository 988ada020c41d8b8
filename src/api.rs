//! Public API types: conversation turns, tool specs, stop sequences, and the
//! declarative adapter configuration.

use crate::error::{Result, RelayError};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Speaker of a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One element of a multimodal turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { mime: String, base64: String },
}

/// The body of a [`Turn`]: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One message in a conversation.
///
/// A conversation is an ordered `Vec<Turn>`; insertion order is
/// conversational order and is preserved end-to-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Text-only view of the content. Image parts are dropped and text parts
    /// are joined with newlines.
    pub fn text(&self) -> String {
        match &self.content {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// `true` when the turn carries no text and no image.
    pub fn is_empty(&self) -> bool {
        match &self.content {
            TurnContent::Text(text) => text.trim().is_empty(),
            TurnContent::Parts(parts) => parts.iter().all(|part| match part {
                ContentPart::Text { text } => text.trim().is_empty(),
                ContentPart::Image { .. } => false,
            }),
        }
    }

    pub fn is_multimodal(&self) -> bool {
        matches!(self.content, TurnContent::Parts(_))
    }
}

/// An image attached to a vision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInput {
    /// MIME type, e.g. `"image/png"`.
    pub mime: String,
    /// Base64-encoded image bytes (standard alphabet, padded).
    pub base64: String,
}

impl ImageInput {
    /// Encode raw image bytes.
    pub fn from_bytes(mime: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime: mime.into(),
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Render as a `data:` URL, the form most chat APIs accept inline.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

/// A vendor-agnostic tool definition. Adapters translate it into the
/// provider's native shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// A literal stop sequence, or several of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequence {
    One(String),
    Many(Vec<String>),
}

impl StopSequence {
    /// Iterate the non-empty members.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let members: &[String] = match self {
            Self::One(s) => std::slice::from_ref(s),
            Self::Many(v) => v.as_slice(),
        };
        members.iter().map(String::as_str).filter(|s| !s.is_empty())
    }

    /// Length in bytes of the longest member.
    pub fn max_len(&self) -> usize {
        self.iter().map(str::len).max().unwrap_or(0)
    }

    /// Byte offset of the earliest occurrence of any member in `text`.
    pub fn find_in(&self, text: &str) -> Option<usize> {
        self.iter().filter_map(|stop| text.find(stop)).min()
    }

    /// Cut `text` at the earliest stop sequence, if any.
    pub fn truncate<'a>(&self, text: &'a str) -> &'a str {
        match self.find_in(text) {
            Some(idx) => &text[..idx],
            None => text,
        }
    }
}

impl From<&str> for StopSequence {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for StopSequence {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<Vec<String>> for StopSequence {
    fn from(value: Vec<String>) -> Self {
        Self::Many(value)
    }
}

/// The backends an adapter can be constructed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    Mistral,
    Groq,
    #[serde(rename = "deepseek")]
    DeepSeek,
    Ollama,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Replicate,
    #[serde(rename = "huggingface")]
    HuggingFace,
    Qwen,
    Grok,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 12] = [
        Self::OpenAi,
        Self::Anthropic,
        Self::Gemini,
        Self::Mistral,
        Self::Groq,
        Self::DeepSeek,
        Self::Ollama,
        Self::OpenRouter,
        Self::Replicate,
        Self::HuggingFace,
        Self::Qwen,
        Self::Grok,
    ];

    /// Stable identifier, also the serde name.
    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
            Self::Groq => "groq",
            Self::DeepSeek => "deepseek",
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::Replicate => "replicate",
            Self::HuggingFace => "huggingface",
            Self::Qwen => "qwen",
            Self::Grok => "grok",
        }
    }

    /// Default API endpoint for this backend.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::DeepSeek => "https://api.deepseek.com",
            Self::Ollama => "http://127.0.0.1:11434/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Replicate => "https://api.replicate.com/v1",
            Self::HuggingFace => "https://router.huggingface.co/v1",
            Self::Qwen => "https://dashscope-intl.aliyuncs.com/compatible-mode/v1",
            Self::Grok => "https://api.x.ai/v1",
        }
    }

    /// Name of the credential looked up in the key store when the spec does
    /// not override it. `None` for backends that run unauthenticated.
    pub fn default_key_name(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::Groq => Some("GROQCLOUD_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Ollama => None,
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Replicate => Some("REPLICATE_API_KEY"),
            Self::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            Self::Qwen => Some("QWEN_API_KEY"),
            Self::Grok => Some("XAI_API_KEY"),
        }
    }

    /// Whether the backend speaks the OpenAI chat-completions dialect and can
    /// be served by the built-in HTTP transport.
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, Self::Anthropic | Self::Gemini | Self::Replicate)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| RelayError::ProviderNotFound(s.to_string()))
    }
}

/// Bounded retry of responses that came back cut off mid-reasoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectRetryConfig {
    /// Maximum attempts per request shape (including the first).
    pub max_attempts: u32,
}

impl Default for DefectRetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Exponential backoff with jitter for HTTP 429 responses.
///
/// The delay after the `n`-th consecutive rate-limited attempt (0-based) is
/// `base_delay_ms * 2^n + uniform(0, max_jitter_ms)`. The jitter spreads
/// concurrent callers that share one per-second quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Total attempts before failing with `MaxRetriesExceeded`.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl RateLimitConfig {
    /// Deterministic part of the delay for the given 0-based retry count,
    /// with saturating arithmetic.
    pub fn base_backoff(&self, retries: u32) -> Duration {
        let factor = 2u64.checked_pow(retries).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Full delay including a uniformly random jitter.
    pub fn get_backoff(&self, retries: u32) -> Duration {
        use rand::Rng;
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.max_jitter_ms)
        };
        self.base_backoff(retries) + Duration::from_millis(jitter)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
            max_jitter_ms: 2000,
        }
    }
}

/// Declarative description of one adapter.
///
/// # Example JSON
///
/// ```json
/// {
///   "alias": "chat/default",
///   "provider": "openai",
///   "model": "gpt-4o-mini",
///   "timeout": 60
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSpec {
    /// Name the runtime serves this adapter under. Must contain a `/`.
    pub alias: String,
    pub provider: ProviderKind,
    pub model: String,
    /// Overrides [`ProviderKind::default_base_url`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Overrides [`ProviderKind::default_key_name`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_name: Option<String>,
    /// Per-attempt timeout in seconds. `None` means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub defect_retry: DefectRetryConfig,
    /// Backoff for HTTP 429. Defaults to [`RateLimitConfig::default`];
    /// `null` disables the rate-limit axis.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Provider-specific extras passed through to the transport. Defaults to `{}`.
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_rate_limit() -> Option<RateLimitConfig> {
    Some(RateLimitConfig::default())
}

impl AdapterSpec {
    /// Minimal spec with defaults for everything but the identity fields.
    pub fn new(alias: impl Into<String>, provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            provider,
            model: model.into(),
            base_url: None,
            api_key_name: None,
            timeout: None,
            defect_retry: DefectRetryConfig::default(),
            rate_limit: default_rate_limit(),
            options: serde_json::Value::Null,
        }
    }

    /// Validate invariants: alias non-empty with a `'/'`, model non-empty,
    /// non-zero timeout and attempt caps, object-or-null options.
    pub fn validate(&self) -> Result<()> {
        if self.alias.is_empty() {
            return Err(RelayError::Config("Alias cannot be empty".to_string()));
        }
        if !self.alias.contains('/') {
            return Err(RelayError::Config(format!(
                "Alias '{}' must be in 'group/name' format",
                self.alias
            )));
        }
        if self.model.trim().is_empty() {
            return Err(RelayError::Config(format!(
                "Alias '{}' has an empty model",
                self.alias
            )));
        }
        if self.timeout == Some(0) {
            return Err(RelayError::Config(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.defect_retry.max_attempts == 0 {
            return Err(RelayError::Config(
                "defect_retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.as_ref().is_some_and(|r| r.max_retries == 0) {
            return Err(RelayError::Config(
                "rate_limit.max_retries must be greater than 0".to_string(),
            ));
        }
        if !matches!(
            self.options,
            serde_json::Value::Null | serde_json::Value::Object(_)
        ) {
            return Err(RelayError::Config(format!(
                "Options for alias '{}' must be a JSON object or null",
                self.alias
            )));
        }
        Ok(())
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Parse a single `AdapterSpec` from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(s)
            .map_err(|e| RelayError::Config(format!("Invalid AdapterSpec JSON: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }
}

/// Parse a catalog (array) of `AdapterSpec` from a JSON string.
pub fn catalog_from_str(s: &str) -> Result<Vec<AdapterSpec>> {
    let specs: Vec<AdapterSpec> = serde_json::from_str(s)
        .map_err(|e| RelayError::Config(format!("Invalid catalog JSON: {}", e)))?;
    for spec in &specs {
        spec.validate()?;
    }
    Ok(specs)
}

/// Read and parse a catalog from a JSON file.
pub fn catalog_from_file(path: impl AsRef<Path>) -> Result<Vec<AdapterSpec>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RelayError::Config(format!(
            "Failed to read catalog file '{}': {}",
            path.display(),
            e
        ))
    })?;
    catalog_from_str(&contents)
}
