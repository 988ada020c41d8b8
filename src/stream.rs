//! Accumulation of incremental token streams with early stop-sequence cut-off.

use crate::api::StopSequence;
use crate::error::Result;
use futures::{Stream, StreamExt};

/// Incremental buffer that stops growing once a stop sequence appears.
///
/// After each [`push`](Self::push) only the tail that could contain a new
/// match is searched, so long streams stay linear.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: String,
    stop: Option<StopSequence>,
    chunks: usize,
    done: bool,
}

impl StreamAccumulator {
    pub fn new(stop: Option<StopSequence>) -> Self {
        Self {
            stop: stop.filter(|s| s.max_len() > 0),
            ..Self::default()
        }
    }

    /// Append a chunk. Returns `true` when the stream should end: a stop
    /// sequence was found (and cut off), or the very first chunk was empty.
    pub fn push(&mut self, chunk: &str) -> bool {
        if self.done {
            return true;
        }
        self.chunks += 1;
        if self.chunks == 1 && chunk.is_empty() {
            self.done = true;
            return true;
        }

        let previous_len = self.buffer.len();
        self.buffer.push_str(chunk);

        if let Some(stop) = &self.stop {
            let mut from = previous_len.saturating_sub(stop.max_len().saturating_sub(1));
            while !self.buffer.is_char_boundary(from) {
                from -= 1;
            }
            if let Some(offset) = stop.find_in(&self.buffer[from..]) {
                self.buffer.truncate(from + offset);
                self.done = true;
            }
        }
        self.done
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

/// Drain `events` into one string, truncating at the first stop sequence.
///
/// The stream is dropped as soon as a stop sequence shows up, without waiting
/// for the source to finish. An empty first chunk ends the stream with an
/// empty result. Errors from the source are returned as-is.
pub async fn accumulate<S>(events: S, stop: Option<&StopSequence>) -> Result<String>
where
    S: Stream<Item = Result<String>>,
{
    let mut events = std::pin::pin!(events);
    let mut acc = StreamAccumulator::new(stop.cloned());

    while let Some(chunk) = events.next().await {
        if acc.push(&chunk?) {
            tracing::debug!(len = acc.as_str().len(), "stream ended early");
            break;
        }
    }
    Ok(acc.into_string())
}
