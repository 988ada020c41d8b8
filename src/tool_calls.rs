//! Normalization of provider-native tool calls into one canonical envelope.
//!
//! Chat calls return a single string. When the model asks for tools, that
//! string is a JSON object whose `nativeToolCalls` field is `true`:
//!
//! ```json
//! {
//!   "nativeToolCalls": true,
//!   "toolCalls": [
//!     {"id": "call_1", "type": "function",
//!      "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}}
//!   ]
//! }
//! ```
//!
//! Use [`Reply::from_wire`] or [`parse_envelope`] before treating a reply as
//! prose.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The function half of an OpenAI-style native tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeFunction {
    pub name: String,
    /// Usually a JSON-encoded string; some backends send an object.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A tool call in one of the shapes backends return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NativeToolCall {
    /// `{id, function: {name, arguments}}`
    Function {
        #[serde(default)]
        id: Option<String>,
        function: NativeFunction,
    },
    /// `{name, input}` with structured input and possibly no id.
    Input {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
}

impl NativeToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::Function {
            id: Some(id.into()),
            function: NativeFunction {
                name: name.into(),
                arguments: serde_json::Value::String(arguments.into()),
            },
        }
    }

    pub fn input(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::Input {
            id: None,
            name: name.into(),
            input,
        }
    }
}

/// Function name and JSON-string arguments of a canonical tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// One entry of the canonical envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCallResult {
    /// Parse the arguments string back into structured JSON.
    pub fn parsed_arguments(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.function.arguments)
    }
}

/// The canonical "model wants to call tools" reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEnvelope {
    pub native_tool_calls: bool,
    pub tool_calls: Vec<ToolCallResult>,
    /// Prose that accompanied the calls, kept only under
    /// [`ToolProsePolicy::CarryProse`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ToolCallEnvelope {
    pub fn to_wire(&self) -> String {
        // Only strings and string-keyed structs: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What happens to narrative text that arrives alongside tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolProsePolicy {
    /// Tool calls win and the prose is dropped.
    #[default]
    DiscardProse,
    /// Tool calls win; the prose rides along in the envelope's `content`.
    CarryProse,
}

/// Either prose or tool calls, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedResponse {
    Text(String),
    ToolCalls(ToolCallEnvelope),
}

impl NormalizedResponse {
    /// Serialize into the single string channel returned to callers.
    pub fn into_wire(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::ToolCalls(envelope) => envelope.to_wire(),
        }
    }

    pub fn is_tool_calls(&self) -> bool {
        matches!(self, Self::ToolCalls(_))
    }
}

/// Caller-side view of a reply string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    ToolCalls(Vec<ToolCallResult>),
}

impl Reply {
    /// Check the envelope marker first, and only then treat the string as prose.
    pub fn from_wire(wire: &str) -> Self {
        match parse_envelope(wire) {
            Some(envelope) => Self::ToolCalls(envelope.tool_calls),
            None => Self::Text(wire.to_string()),
        }
    }
}

/// Parse `wire` as a tool-call envelope. Returns `None` for prose, including
/// prose that happens to be JSON without the marker set.
pub fn parse_envelope(wire: &str) -> Option<ToolCallEnvelope> {
    if !wire.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str::<ToolCallEnvelope>(wire)
        .ok()
        .filter(|envelope| envelope.native_tool_calls)
}

pub fn is_tool_envelope(wire: &str) -> bool {
    parse_envelope(wire).is_some()
}

/// Converts native tool calls into the canonical envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCallNormalizer {
    pub prose_policy: ToolProsePolicy,
}

impl ToolCallNormalizer {
    pub fn new(prose_policy: ToolProsePolicy) -> Self {
        Self { prose_policy }
    }

    /// Build the envelope. Missing or empty ids become
    /// `call_<unix_millis>_<index>`; structured arguments are JSON-encoded.
    pub fn normalize(&self, calls: &[NativeToolCall], prose: Option<&str>) -> ToolCallEnvelope {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let tool_calls = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let (id, name, arguments) = match call {
                    NativeToolCall::Function { id, function } => {
                        (id, &function.name, &function.arguments)
                    }
                    NativeToolCall::Input { id, name, input } => (id, name, input),
                };
                let id = id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{stamp}_{index}"));
                ToolCallResult {
                    id,
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: stringify_arguments(arguments),
                    },
                }
            })
            .collect();

        let content = match self.prose_policy {
            ToolProsePolicy::DiscardProse => None,
            ToolProsePolicy::CarryProse => prose
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        };

        ToolCallEnvelope {
            native_tool_calls: true,
            tool_calls,
            content,
        }
    }
}

fn stringify_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}
