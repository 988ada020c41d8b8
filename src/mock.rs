#![allow(dead_code)]

//! Scripted transport for unit tests. Gated with `#[cfg(test)]`.

use crate::error::{Result, RelayError};
use crate::traits::{NativeRequest, NativeResponse, ProviderTransport, TokenStream};
use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(NativeResponse),
    Stream(Vec<String>),
    Fail(RelayError),
}

impl Scripted {
    pub fn text(text: &str) -> Self {
        Self::Respond(NativeResponse::text(text))
    }

    pub fn stream(chunks: &[&str]) -> Self {
        Self::Stream(chunks.iter().map(|c| c.to_string()).collect())
    }
}

/// Replays [`Scripted`] replies in order and records every request.
///
/// Once the script is exhausted the last reply repeats, so a single-entry
/// script behaves like a backend that always answers the same way.
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    requests: Mutex<Vec<NativeRequest>>,
    embedding: Vec<f32>,
    embed_rate_limits: AtomicU32,
    embed_calls: AtomicU32,
}

impl MockTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            embedding: vec![0.1; 4],
            embed_rate_limits: AtomicU32::new(0),
            embed_calls: AtomicU32::new(0),
        }
    }

    pub fn repeating(reply: Scripted) -> Self {
        Self::new(vec![reply])
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// The first `count` embed calls fail with [`RelayError::RateLimited`].
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

    fn next(&self, request: &NativeRequest) -> Scripted {
        self.requests.lock().unwrap().push(request.clone());
        let mut last = self.last.lock().unwrap();
        match self.script.lock().unwrap().pop_front() {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or(Scripted::Fail(RelayError::ProviderFault("script exhausted".into()))),
        }
    }
}

#[async_trait]
impl ProviderTransport for MockTransport {
    async fn complete(&self, request: &NativeRequest) -> Result<NativeResponse> {
        match self.next(request) {
            Scripted::Respond(response) => Ok(response),
            Scripted::Stream(chunks) => Ok(NativeResponse::text(chunks.concat())),
            Scripted::Fail(e) => Err(e),
        }
    }

    async fn stream(&self, request: &NativeRequest) -> Result<TokenStream> {
        let chunks = match self.next(request) {
            Scripted::Stream(chunks) => chunks,
            Scripted::Respond(response) => vec![response.text.unwrap_or_default()],
            Scripted::Fail(e) => return Err(e),
        };
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.embed_rate_limits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.embed_rate_limits.fetch_sub(1, Ordering::SeqCst);
            return Err(RelayError::RateLimited);
        }
        Ok(self.embedding.clone())
    }
}
