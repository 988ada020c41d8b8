//! Reliability primitives: the retry engine (context shrink, output-defect
//! retry, rate-limit backoff), per-attempt timeout and cancellation, and the
//! circuit breaker that guards each transport call.
//!
//! The three retry axes are independent:
//!
//! 1. **Context shrink**: on [`RelayError::ContextLengthExceeded`] the oldest
//!    turn is dropped and the request is re-issued, until one turn is left.
//! 2. **Output defect**: on [`RelayError::TransientOutputDefect`] the same
//!    request is re-issued, up to [`RetryState::max_attempts`] times. A shrink
//!    restarts this counter because the request is a new one.
//! 3. **Rate limit**: on [`RelayError::RateLimited`] the same call is re-issued
//!    after an exponential, jittered delay, up to
//!    [`RateLimitConfig::max_retries`] attempts.
//!
//! Exhausting axes 1 or 2, or any other non-fatal failure, resolves to a fixed
//! [`Fallback`] reply instead of an error.

use crate::api::{ImageInput, RateLimitConfig, StopSequence, ToolSpec, Turn};
use crate::error::{Result, RelayError};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Reply used when every output-defect retry came back truncated.
pub const DEFECT_FALLBACK: &str = "I thought too hard, sorry, try again.";
/// Reply used for hard provider failures and exhausted context shrinking.
pub const DISCONNECT_FALLBACK: &str = "My brain disconnected, try again.";

/// Which fixed reply a request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    OutputDefect,
    Disconnected,
}

impl Fallback {
    pub fn message(&self) -> &'static str {
        match self {
            Self::OutputDefect => DEFECT_FALLBACK,
            Self::Disconnected => DISCONNECT_FALLBACK,
        }
    }
}

/// Terminal outcome of [`RetryEngine::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Answer(T),
    Fallback(Fallback),
}

/// The inputs of one logical request plus the defect-retry counter.
///
/// Owned by a single call and never shared. Moving to the next attempt
/// produces a new value; the only two transitions are [`shrunk`](Self::shrunk)
/// and [`next_attempt`](Self::next_attempt).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// 1-based attempt number for the current request shape.
    pub attempt: u32,
    pub max_attempts: u32,
    pub turns: Vec<Turn>,
    pub system_message: String,
    pub stop: Option<StopSequence>,
    pub tools: Vec<ToolSpec>,
    /// Set for vision requests; re-attached to the last turn on every attempt.
    pub image: Option<ImageInput>,
}

impl RetryState {
    pub fn new(turns: Vec<Turn>, system_message: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            turns,
            system_message: system_message.into(),
            stop: None,
            tools: Vec::new(),
            image: None,
        }
    }

    pub fn with_stop(mut self, stop: Option<StopSequence>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.image = Some(image);
        self
    }

    /// Same request minus its oldest turn, with the defect counter restarted.
    /// `None` once a single turn is left.
    pub fn shrunk(&self) -> Option<Self> {
        if self.turns.len() <= 1 {
            return None;
        }
        Some(Self {
            attempt: 1,
            turns: self.turns[1..].to_vec(),
            ..self.clone()
        })
    }

    /// Same request, next attempt. `None` when the cap is reached.
    pub fn next_attempt(&self) -> Option<Self> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        Some(Self {
            attempt: self.attempt + 1,
            ..self.clone()
        })
    }
}

/// Tunables for [`RetryEngine`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Drop the oldest turn on context overflow. When `false`, overflow
    /// resolves straight to the disconnect fallback.
    pub shrink_on_overflow: bool,
    /// Backoff for HTTP 429. `None` disables the axis.
    pub rate_limit: Option<RateLimitConfig>,
    /// Applied to every individual attempt.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            shrink_on_overflow: true,
            rate_limit: Some(RateLimitConfig::default()),
            timeout: None,
        }
    }
}

/// Drives the retry loops for one adapter.
///
/// Holds configuration only; all per-request state lives in [`RetryState`],
/// so a single engine serves concurrent requests.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    policy: RetryPolicy,
    provider: String,
}

impl RetryEngine {
    pub fn new(provider: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            policy,
            provider: provider.into(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt_fn` until it yields an answer or an axis is exhausted.
    ///
    /// `attempt_fn` performs exactly one provider call for the given state.
    /// Fatal errors ([`RelayError::is_fatal`]) are returned as `Err`;
    /// everything else ends in [`Resolution::Fallback`].
    pub async fn execute<T, F, Fut>(
        &self,
        initial: RetryState,
        cancel: Option<&CancellationToken>,
        mut attempt_fn: F,
    ) -> Result<Resolution<T>>
    where
        F: FnMut(RetryState) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = initial;
        loop {
            let outcome = self
                .with_rate_limit_backoff(cancel, || attempt_fn(state.clone()))
                .await;

            match outcome {
                Ok(value) => return Ok(Resolution::Answer(value)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(RelayError::ContextLengthExceeded(reason)) if self.policy.shrink_on_overflow => {
                    match state.shrunk() {
                        Some(next) => {
                            tracing::warn!(
                                provider = %self.provider,
                                turns = next.turns.len(),
                                reason = %reason,
                                "Context overflow, dropping oldest turn"
                            );
                            self.count_retry("context_shrink");
                            state = next;
                        }
                        None => {
                            tracing::warn!(
                                provider = %self.provider,
                                reason = %reason,
                                "Context overflow with a single turn left"
                            );
                            return Ok(Resolution::Fallback(Fallback::Disconnected));
                        }
                    }
                }
                Err(RelayError::TransientOutputDefect(reason)) => match state.next_attempt() {
                    Some(next) => {
                        tracing::warn!(
                            provider = %self.provider,
                            attempt = next.attempt,
                            max_attempts = next.max_attempts,
                            reason = %reason,
                            "Retrying defective output"
                        );
                        self.count_retry("output_defect");
                        state = next;
                    }
                    None => {
                        tracing::warn!(
                            provider = %self.provider,
                            attempts = state.attempt,
                            "Output defect retries exhausted"
                        );
                        return Ok(Resolution::Fallback(Fallback::OutputDefect));
                    }
                },
                Err(e) => {
                    tracing::warn!(provider = %self.provider, error = %e, "Provider call failed");
                    return Ok(Resolution::Fallback(Fallback::Disconnected));
                }
            }
        }
    }

    /// Run `call` with cancellation and the rate-limit axis.
    ///
    /// After the `n`-th consecutive [`RelayError::RateLimited`] the call is
    /// re-issued after [`RateLimitConfig::get_backoff`]`(n - 1)`; once
    /// `max_retries` attempts were rate limited the result is
    /// [`RelayError::MaxRetriesExceeded`]. The sleep yields to the runtime and
    /// is interrupted by cancellation.
    ///
    /// The per-attempt timeout is not applied here: callers wrap the
    /// transport call in [`RetryEngine::within_timeout`] inside the circuit
    /// breaker.
    pub async fn with_rate_limit_backoff<T, F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut rate_limited = 0u32;
        loop {
            match self.cancellable(cancel, call()).await {
                Err(RelayError::RateLimited) => {
                    let Some(config) = &self.policy.rate_limit else {
                        return Err(RelayError::RateLimited);
                    };
                    rate_limited += 1;
                    if rate_limited >= config.max_retries {
                        tracing::warn!(
                            provider = %self.provider,
                            attempts = rate_limited,
                            "Rate limit retries exhausted"
                        );
                        return Err(RelayError::MaxRetriesExceeded(rate_limited));
                    }
                    let backoff = config.get_backoff(rate_limited - 1);
                    tracing::warn!(
                        provider = %self.provider,
                        attempt = rate_limited,
                        backoff_ms = backoff.as_millis(),
                        "Rate limited, backing off"
                    );
                    self.count_retry("rate_limit");
                    self.pause(backoff, cancel).await?;
                }
                other => return other,
            }
        }
    }

    /// Bound one transport call by [`RetryPolicy::timeout`].
    pub async fn within_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.policy.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .unwrap_or(Err(RelayError::Timeout)),
            None => fut.await,
        }
    }

    async fn cancellable<T>(
        &self,
        cancel: Option<&CancellationToken>,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(RelayError::Cancelled),
                res = fut => res,
            },
            None => fut.await,
        }
    }

    async fn pause(&self, delay: Duration, cancel: Option<&CancellationToken>) -> Result<()> {
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(RelayError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn count_retry(&self, axis: &'static str) {
        metrics::counter!(
            "relay_retry.total",
            "provider" => self.provider.clone(),
            "axis" => axis
        )
        .increment(1);
    }
}

/// Internal circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Tunable parameters for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds to wait in the open state before allowing a probe call.
    pub open_wait_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_wait_seconds: 10,
        }
    }
}

struct Inner {
    state: State,
    failures: u32,
    last_failure: Option<Instant>,
    config: CircuitBreakerConfig,
    half_open_probe_in_flight: bool,
}

/// Thread-safe circuit breaker that short-circuits calls to an unhealthy
/// backend.
///
/// Only failures for which [`RelayError::trips_breaker`] holds are counted;
/// an overflow or a truncated answer proves the backend is up.
///
/// State transitions: **Closed** -> (failures >= threshold) -> **Open** ->
/// (wait period elapsed) -> **HalfOpen** -> (probe succeeds) -> **Closed**
/// (or probe fails -> back to **Open**).
#[derive(Clone)]
pub struct CircuitBreakerWrapper {
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreakerWrapper {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                last_failure: None,
                config,
                half_open_probe_in_flight: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute `f` through the circuit breaker.
    ///
    /// Returns [`RelayError::Unavailable`] immediately when the breaker is
    /// open. In the half-open state only a single probe call is allowed;
    /// concurrent callers receive `Unavailable` until the probe completes.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let is_probe_call;

        {
            let mut inner = self.lock();
            match inner.state {
                State::Open => {
                    let wait = Duration::from_secs(inner.config.open_wait_seconds);
                    match inner.last_failure {
                        Some(last) if last.elapsed() >= wait => inner.state = State::HalfOpen,
                        _ => return Err(RelayError::Unavailable),
                    }
                }
                State::HalfOpen => {
                    if inner.half_open_probe_in_flight {
                        return Err(RelayError::Unavailable);
                    }
                }
                State::Closed => {}
            }
            is_probe_call = inner.state == State::HalfOpen;
            if is_probe_call {
                inner.half_open_probe_in_flight = true;
            }
        }

        let probe = is_probe_call.then(|| ProbeGuard { inner: &*self.inner });
        let result = f().await;
        if let Some(probe) = probe {
            probe.disarm();
        }
        let healthy = match &result {
            Ok(_) => true,
            Err(e) => !e.trips_breaker(),
        };

        let mut inner = self.lock();
        if is_probe_call {
            inner.half_open_probe_in_flight = false;
        }
        if healthy {
            if is_probe_call {
                tracing::info!("Circuit breaker probe succeeded, closing");
                inner.state = State::Closed;
            }
            if inner.state == State::Closed {
                inner.failures = 0;
            }
        } else {
            inner.failures += 1;
            inner.last_failure = Some(Instant::now());

            if is_probe_call
                || (inner.state == State::Closed && inner.failures >= inner.config.failure_threshold)
            {
                tracing::warn!(failures = inner.failures, "Circuit breaker opened");
                inner.state = State::Open;
            }
        }
        result
    }
}

/// Releases the half-open slot when a probe future is dropped before it
/// finished (timeout or cancellation around [`CircuitBreakerWrapper::call`]).
/// The breaker stays half-open so the next caller probes again.
struct ProbeGuard<'a> {
    inner: &'a Mutex<Inner>,
}

impl ProbeGuard<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.half_open_probe_in_flight = false;
        tracing::debug!("Circuit breaker probe abandoned");
    }
}
