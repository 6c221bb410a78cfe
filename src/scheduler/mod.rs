//! Rate-limited request queue for outbound API calls.
//!
//! Every call to a third-party completion or compiler API goes through a
//! [`RequestQueue`], which provides:
//!
//! - **Serialization**: exactly one unit in flight per queue
//! - **Budget**: at most `requests_per_minute` dispatches in any 60s window
//! - **Spacing**: at least `retry_delay` between consecutive dispatches
//! - **Retry**: throttled units are retried with exponential backoff and
//!   reinserted at the front of the queue
//!
//! # Architecture
//!
//! ```text
//!   submit() ──► ┌──────────────┐      ┌─────────────┐
//!   submit() ──► │ pending FIFO │ ───► │ driver task │ ──► action()
//!                └──────▲───────┘      └──────┬──────┘
//!                       │ push_front          │ throttled
//!                       └──── backoff sleep ◄─┘
//! ```
//!
//! Throttling detection lives in [`classify_error`]; a queue can be built
//! with a service-specific classifier via [`RequestQueue::with_classifier`].

pub mod classify;
pub mod config;
pub mod queue;
pub mod window;

pub use classify::{classify_error, classify_message, default_classifier, Classifier, ErrorClass};
pub use config::{ConfigError, RateLimitConfig};
pub use queue::{DrainState, QueueError, QueueStatus, RequestQueue, UnitHandle};
pub use window::{RateWindow, WINDOW_PERIOD};
