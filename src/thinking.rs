//! Detection and removal of `<think>...</think>` reasoning spans.
//!
//! Reasoning models emit their deliberation inline, delimited by marker tags.
//! The sanitizer removes every delimited span, repairs output whose opening
//! tag was lost to an upstream token limit, and flags output that was cut off
//! inside a span so the retry engine can ask again.

/// Default opening marker.
pub const THINK_OPEN: &str = "<think>";
/// Default closing marker.
pub const THINK_CLOSE: &str = "</think>";

/// Result of [`ThinkingSanitizer::sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    /// Text with every reasoning span removed.
    pub clean: String,
    /// An opening marker was never closed; the output is unusable.
    pub partial: bool,
    /// A closing marker had no opening marker and was treated as if the text
    /// before it started with one.
    pub reconstructed: bool,
}

/// What to do with output whose opening marker is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanClosePolicy {
    /// Strip everything up to the orphan closing marker and keep the rest.
    #[default]
    Reconstruct,
    /// Treat the output as a defect and spend a retry on it.
    Retry,
}

/// Marker-based reasoning stripper.
#[derive(Debug, Clone)]
pub struct ThinkingSanitizer {
    open: String,
    close: String,
}

impl Default for ThinkingSanitizer {
    fn default() -> Self {
        Self::new(THINK_OPEN, THINK_CLOSE)
    }
}

impl ThinkingSanitizer {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Quick check used before doing any work.
    pub fn has_markers(&self, raw: &str) -> bool {
        raw.contains(&self.open) || raw.contains(&self.close)
    }

    /// Strip reasoning spans from `raw`.
    ///
    /// - no markers: text returned unchanged
    /// - matched pairs: every span removed (non-greedy), result trimmed
    /// - closing marker without an opening one: the text before it is
    ///   treated as reasoning and removed; `reconstructed = true` only when no
    ///   opening marker was seen before it (a nested span's extra close
    ///   extends the span instead)
    /// - opening marker without a closing one: `partial = true`, `clean`
    ///   holds whatever preceded the dangling marker
    pub fn sanitize(&self, raw: &str) -> Sanitized {
        if !self.has_markers(raw) {
            return Sanitized {
                clean: raw.to_string(),
                partial: false,
                reconstructed: false,
            };
        }

        let mut clean = String::with_capacity(raw.len());
        let mut partial = false;
        let mut reconstructed = false;
        let mut seen_open = false;
        let mut rest = raw;

        loop {
            let open_at = rest.find(&self.open);
            let close_at = rest.find(&self.close);

            // Closing marker first: its opening marker was truncated away,
            // unless it closes an outer span of nested markers.
            if let Some(close) = close_at.filter(|&c| open_at.is_none_or(|o| c < o)) {
                reconstructed |= !seen_open;
                rest = &rest[close + self.close.len()..];
                continue;
            }

            let Some(open) = open_at else {
                clean.push_str(rest);
                break;
            };
            seen_open = true;
            clean.push_str(&rest[..open]);
            let body = &rest[open + self.open.len()..];
            match body.find(&self.close) {
                Some(end) => rest = &body[end + self.close.len()..],
                None => {
                    partial = true;
                    break;
                }
            }
        }

        Sanitized {
            clean: clean.trim().to_string(),
            partial,
            reconstructed,
        }
    }
}
