//! Built-in transports.
//!
//! Each sub-module is gated behind a Cargo feature flag. Vendors without a
//! built-in transport are wired in through
//! [`RelayRuntimeBuilder::transport_factory`](crate::runtime::RelayRuntimeBuilder::transport_factory).
//!
//! | Module | Feature | Wire format |
//! |--------|---------|-------------|
//! | `openai_compatible` | `transport-http` | OpenAI chat completions (SSE streaming) |

#[cfg(feature = "transport-http")]
pub(crate) mod remote_common;

#[cfg(feature = "transport-http")]
pub mod openai_compatible;

#[cfg(feature = "transport-http")]
pub use openai_compatible::OpenAiCompatibleTransport;
