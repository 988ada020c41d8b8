//! Resilient request layer over heterogeneous chat-completion and embedding
//! backends.
//!
//! Uni-Relay gives callers one uniform capability set (chat, vision, embed)
//! across a dozen vendors, and absorbs the ways those vendors misbehave:
//! oversized prompts, answers cut off inside a `<think>` block, HTTP 429, and
//! a different tool-call shape per vendor.
//!
//! # Key concepts
//!
//! - **[`ChatAdapter`](traits::ChatAdapter)**: the uniform interface. Chat
//!   and vision calls always resolve to a single string: prose, the canonical
//!   tool-call envelope (see [`tool_calls`]), or one of two fixed fallback
//!   replies. Only capability and configuration errors surface as `Err`.
//! - **[`ProviderAdapter`](adapter::ProviderAdapter)**: the one adapter
//!   implementation, configured per vendor by a
//!   [`ProviderProfile`](adapter::ProviderProfile) and an injected
//!   [`ProviderTransport`](traits::ProviderTransport).
//! - **[`RetryEngine`](reliability::RetryEngine)**: context shrinking,
//!   bounded output-defect retry and jittered rate-limit backoff.
//! - **[`RelayRuntime`](runtime::RelayRuntime)**: builds adapters from a
//!   catalog of [`AdapterSpec`](api::AdapterSpec)s and a
//!   [`KeyStore`](traits::KeyStore).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use uni_relay::api::{Turn, catalog_from_str};
//! use uni_relay::config::EnvKeyStore;
//! use uni_relay::runtime::RelayRuntime;
//! use uni_relay::tool_calls::Reply;
//! use uni_relay::traits::ChatRequest;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = RelayRuntime::builder()
//!     .key_store(EnvKeyStore)
//!     .catalog(catalog_from_str(
//!         r#"[{"alias": "chat/default", "provider": "openai", "model": "gpt-4o-mini"}]"#,
//!     )?)
//!     .build()?;
//!
//! let adapter = runtime.adapter("chat/default").await?;
//! let reply = adapter
//!     .send_request(ChatRequest::new(vec![Turn::user("Hello!")], "Be brief."))
//!     .await?;
//! match Reply::from_wire(&reply) {
//!     Reply::Text(text) => println!("{text}"),
//!     Reply::ToolCalls(calls) => println!("{} tool calls", calls.len()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod api;
pub mod config;
pub mod error;
pub mod format;
pub mod provider;
pub mod reliability;
pub mod runtime;
pub mod stream;
pub mod thinking;
pub mod tool_calls;
pub mod traits;

#[cfg(test)]
mod mock;
