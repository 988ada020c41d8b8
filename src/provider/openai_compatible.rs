use crate::api::{ContentPart, ProviderKind, Role, TurnContent};
use crate::config::AdapterConfig;
use crate::error::{Result, RelayError};
use crate::provider::remote_common::{check_http_status, transport_error};
use crate::tool_calls::NativeToolCall;
use crate::traits::{NativeRequest, NativeResponse, ProviderTransport, TokenStream};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};

/// HTTP transport for backends that speak the OpenAI chat-completions
/// dialect (`/chat/completions`, `/embeddings`).
///
/// Serves OpenAI itself plus Mistral, Groq, DeepSeek, Ollama, OpenRouter,
/// Hugging Face, Qwen and Grok through their compatible endpoints. The key,
/// when present, is sent as a bearer token.
pub struct OpenAiCompatibleTransport {
    client: Client,
    provider: ProviderKind,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleTransport {
    pub fn new(config: &AdapterConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &AdapterConfig) -> Self {
        Self {
            client,
            provider: config.provider,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn name(&self) -> &'static str {
        self.provider.id()
    }
}

#[async_trait]
impl ProviderTransport for OpenAiCompatibleTransport {
    async fn complete(&self, request: &NativeRequest) -> Result<NativeResponse> {
        let response = self
            .post("/chat/completions")
            .json(&build_chat_payload(request))
            .send()
            .await
            .map_err(transport_error)?;

        let body: Value = check_http_status(self.name(), response)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::ProviderFault(e.to_string()))?;

        parse_chat_response(&body)
    }

    async fn stream(&self, request: &NativeRequest) -> Result<TokenStream> {
        let mut payload = build_chat_payload(request);
        payload["stream"] = json!(true);

        let response = self
            .post("/chat/completions")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(provider = self.name(), error = %e, "Stream request failed");
                transport_error(e)
            })?;
        let response = check_http_status(self.name(), response).await?;

        let frames = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => parse_stream_data(&event.data),
                Err(e) => Frame::Failed(RelayError::ProviderFault(e.to_string())),
            })
            .take_while(|frame| futures::future::ready(!matches!(frame, Frame::Done)))
            .filter_map(|frame| {
                futures::future::ready(match frame {
                    Frame::Text(text) => Some(Ok(text)),
                    Frame::Failed(e) => Some(Err(e)),
                    Frame::Skip | Frame::Done => None,
                })
            });

        Ok(Box::pin(frames))
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let response = self
            .post("/embeddings")
            .json(&json!({ "model": model, "input": text }))
            .send()
            .await
            .map_err(transport_error)?;

        let body: Value = check_http_status(self.name(), response)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::ProviderFault(e.to_string()))?;

        parse_embedding(&body)
    }
}

/// Build the `/chat/completions` request body.
pub(crate) fn build_chat_payload(request: &NativeRequest) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(request.turns.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.extend(request.turns.iter().map(|turn| {
        let role = match turn.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = match &turn.content {
            TurnContent::Text(text) => json!(text),
            TurnContent::Parts(parts) => Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { mime, base64 } => json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{mime};base64,{base64}") }
                        }),
                    })
                    .collect(),
            ),
        };
        json!({ "role": role, "content": content })
    }));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if let Some(stop) = &request.stop {
        body["stop"] = json!(stop.iter().collect::<Vec<_>>());
    }
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect(),
        );
    }
    body
}

/// Extract text, tool calls and finish reason from a completion body.
pub(crate) fn parse_chat_response(body: &Value) -> Result<NativeResponse> {
    if let Some(error) = body.get("error") {
        return Err(RelayError::classify_message(error.to_string()));
    }

    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| RelayError::ProviderFault("response has no choices".to_string()))?;
    let message = &choice["message"];

    let tool_calls = match message.get("tool_calls") {
        Some(Value::Array(calls)) => calls
            .iter()
            .cloned()
            .map(serde_json::from_value::<NativeToolCall>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::ProviderFault(format!("malformed tool call: {}", e)))?,
        _ => Vec::new(),
    };

    Ok(NativeResponse {
        text: message["content"].as_str().map(str::to_string),
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    })
}

/// One decoded server-sent event.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Text(String),
    /// Role-only deltas, keep-alives and unparseable chunks.
    Skip,
    Done,
    Failed(RelayError),
}

pub(crate) fn parse_stream_data(data: &str) -> Frame {
    let data = data.trim();
    if data == "[DONE]" {
        return Frame::Done;
    }
    let chunk: Value = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, data = %data, "Skipping unparseable SSE chunk");
            return Frame::Skip;
        }
    };
    if let Some(error) = chunk.get("error") {
        return Frame::Failed(RelayError::classify_message(error.to_string()));
    }
    match chunk["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Frame::Text(text.to_string()),
        _ => Frame::Skip,
    }
}

pub(crate) fn parse_embedding(body: &Value) -> Result<Vec<f32>> {
    body["data"][0]["embedding"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
        .ok_or_else(|| RelayError::ProviderFault("response has no embedding".to_string()))
}
