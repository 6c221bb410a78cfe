//! Throttling classification for queued work.
//!
//! Upstream services signal "slow down" in different shapes: an HTTP 429
//! status, a `Too Many Requests` reason phrase, or a provider-specific
//! "rate limit" message. This is the one place that heuristic lives.

use std::fmt::Display;
use std::sync::Arc;

/// How the queue should treat a failed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Upstream asked us to slow down; retry with backoff.
    Throttled,
    /// Anything else; fail the unit.
    Terminal,
}

/// Pluggable classifier used by a queue instance.
pub type Classifier<E> = Arc<dyn Fn(&E) -> ErrorClass + Send + Sync>;

/// Case-insensitive markers that identify a throttling error message.
const THROTTLE_MARKERS: [&str; 3] = ["429", "too many requests", "rate limit"];

/// Classify an error by its rendered message.
pub fn classify_error<E: Display + ?Sized>(err: &E) -> ErrorClass {
    classify_message(&err.to_string())
}

/// Classify a raw error message.
pub fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if THROTTLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorClass::Throttled
    } else {
        ErrorClass::Terminal
    }
}

/// The default message-sniffing classifier, boxed for a queue.
pub fn default_classifier<E: Display>() -> Classifier<E> {
    Arc::new(|err: &E| classify_error(err))
}
