//! Rate-limited, retrying request queue.
//!
//! `RequestQueue` accepts opaque async units of work and runs them one at a
//! time against a per-minute budget and a minimum spacing between
//! dispatches. Units that fail with a throttling error are retried with
//! exponential backoff and reinserted at the front of the queue.
//!
//! # Draining
//!
//! A single driver task drains the queue. It is started by `submit` (or by
//! a delayed retry reinsertion) when the queue is `Idle`, and flips the
//! state back to `Idle` under the same lock that observes the queue empty,
//! so a reinsertion can never land between "queue empty" and "driver gone".
//!
//! ```rust,ignore
//! use stratforge::scheduler::{RateLimitConfig, RequestQueue};
//!
//! let queue: RequestQueue<LlmError> = RequestQueue::new(RateLimitConfig::default())?;
//! let handle = queue.submit(move || {
//!     let provider = provider.clone();
//!     async move { provider.generate(request.clone()).await }
//! });
//! let response = handle.await?;
//! ```

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::classify::{default_classifier, Classifier, ErrorClass};
use super::config::{ConfigError, RateLimitConfig};
use super::window::{RateWindow, WINDOW_PERIOD};

/// Errors raised by the queue itself rather than by a unit's action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The unit was dropped before it produced a result (its action panicked).
    #[error("Queued unit '{id}' was dropped before completing")]
    UnitDropped { id: String },

    /// The unit was submitted outside a Tokio runtime and never enqueued.
    #[error("Queued unit '{id}' was submitted outside a Tokio runtime")]
    NoRuntime { id: String },
}

/// Driver state. Only one driver runs per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

/// Point-in-time snapshot of a queue for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Units waiting to be dispatched.
    pub queue_length: usize,
    /// Whether a driver is currently draining the queue.
    pub is_processing: bool,
    /// Dispatches counted against the current window.
    pub requests_in_window: u32,
    /// Time until the oldest counted dispatch leaves the window.
    pub time_until_window_reset: Duration,
    /// Time since the last dispatch, if there was one.
    pub time_since_last_dispatch: Option<Duration>,
    /// Units sleeping out a retry backoff before reinsertion.
    pub units_in_backoff: usize,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} queued, {} in backoff, {} in window (reset in {}s){}",
            self.queue_length,
            self.units_in_backoff,
            self.requests_in_window,
            self.time_until_window_reset.as_secs(),
            if self.is_processing { ", processing" } else { "" }
        )
    }
}

/// Type-erased unit of work owned by the queue.
#[async_trait]
trait Job<E>: Send {
    /// Runs the action once. On success the submitter has been answered.
    async fn attempt(&mut self) -> Result<(), E>;

    /// Fails the submitter with a terminal error.
    fn reject(&mut self, err: E);
}

struct TypedJob<T, E, F> {
    action: F,
    reply: Option<oneshot::Sender<Result<T, E>>>,
}

#[async_trait]
impl<T, E, F, Fut> Job<E> for TypedJob<T, E, F>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    async fn attempt(&mut self) -> Result<(), E> {
        let value = (self.action)().await?;
        if let Some(reply) = self.reply.take() {
            // Submitter may have stopped listening; nothing to do then.
            let _ = reply.send(Ok(value));
        }
        Ok(())
    }

    fn reject(&mut self, err: E) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(err));
        }
    }
}

/// One pending unit.
struct QueuedUnit<E> {
    id: String,
    retry_count: u32,
    job: Box<dyn Job<E>>,
}

struct QueueState<E> {
    pending: VecDeque<QueuedUnit<E>>,
    drain: DrainState,
    window: RateWindow,
    in_backoff: usize,
}

impl<E> QueueState<E> {
    /// Claims the driver role if nobody holds it.
    fn begin_drain(&mut self) -> bool {
        if self.drain == DrainState::Idle {
            self.drain = DrainState::Draining;
            true
        } else {
            false
        }
    }
}

struct Shared<E> {
    config: RateLimitConfig,
    classifier: Classifier<E>,
    state: Mutex<QueueState<E>>,
    sequence: AtomicU64,
}

impl<E> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
        // Never panics while held, so a poisoned lock still holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Future returned by `RequestQueue::submit`.
///
/// Resolves with the action's result, or its terminal error.
#[must_use = "the unit runs regardless, but its result is lost if the handle is dropped"]
pub struct UnitHandle<T, E> {
    id: String,
    rx: oneshot::Receiver<Result<T, E>>,
    rejected: Option<QueueError>,
}

impl<T, E> UnitHandle<T, E> {
    /// Diagnostic id of the submitted unit.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T, E: From<QueueError>> Future for UnitHandle<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(err) = self.rejected.take() {
            return Poll::Ready(Err(E::from(err)));
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(QueueError::UnitDropped {
                id: self.id.clone(),
            }))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Serializes async work against a per-minute budget with throttling retries.
///
/// Cloning is cheap and yields a handle to the same queue and budget.
/// Separate `RequestQueue::new` instances do not share budget.
pub struct RequestQueue<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for RequestQueue<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> std::fmt::Debug for RequestQueue<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<E: Display + Send + 'static> RequestQueue<E> {
    /// Creates a queue that classifies errors by their message.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if `config` does not validate.
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
        Self::with_classifier(config, default_classifier())
    }
}

impl<E: Send + 'static> RequestQueue<E> {
    /// Creates a queue with a service-specific throttling classifier.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if `config` does not validate.
    pub fn with_classifier(
        config: RateLimitConfig,
        classifier: Classifier<E>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let window = RateWindow::new(config.requests_per_minute, WINDOW_PERIOD);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                classifier,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    drain: DrainState::Idle,
                    window,
                    in_backoff: 0,
                }),
                sequence: AtomicU64::new(0),
            }),
        })
    }

    /// Configuration this queue was built with.
    pub fn config(&self) -> &RateLimitConfig {
        &self.shared.config
    }

    /// Enqueues `action` under a generated id. See [`RequestQueue::submit_with_id`].
    pub fn submit<T, F, Fut>(&self, action: F) -> UnitHandle<T, E>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let seq = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        let id = format!("unit-{}-{}", chrono::Utc::now().timestamp_millis(), seq);
        self.submit_with_id(id, action)
    }

    /// Enqueues `action` and starts the driver if it is idle.
    ///
    /// The action may be invoked more than once if it fails with a
    /// throttling error. Outside a Tokio runtime nothing is enqueued and the
    /// handle resolves to `QueueError::NoRuntime`.
    pub fn submit_with_id<T, F, Fut>(&self, id: impl Into<String>, action: F) -> UnitHandle<T, E>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = id.into();
        let (tx, rx) = oneshot::channel();

        let Ok(runtime) = Handle::try_current() else {
            tracing::error!(unit_id = %id, "Submitted outside a Tokio runtime, rejecting unit");
            return UnitHandle {
                rejected: Some(QueueError::NoRuntime { id: id.clone() }),
                id,
                rx,
            };
        };

        let unit = QueuedUnit {
            id: id.clone(),
            retry_count: 0,
            job: Box::new(TypedJob {
                action,
                reply: Some(tx),
            }),
        };

        let start_driver = {
            let mut state = self.shared.lock();
            state.pending.push_back(unit);
            tracing::debug!(unit_id = %id, queue_length = state.pending.len(), "Unit enqueued");
            state.begin_drain()
        };

        if start_driver {
            runtime.spawn(drain(Arc::clone(&self.shared)));
        }

        UnitHandle {
            id,
            rx,
            rejected: None,
        }
    }

    /// Non-mutating snapshot of the queue.
    pub fn status(&self) -> QueueStatus {
        let now = Instant::now();
        let state = self.shared.lock();
        QueueStatus {
            queue_length: state.pending.len(),
            is_processing: state.drain == DrainState::Draining,
            requests_in_window: state.window.requests_in_window(now),
            time_until_window_reset: state.window.time_until_reset(now),
            time_since_last_dispatch: state.window.time_since_last(now),
            units_in_backoff: state.in_backoff,
        }
    }

    /// Rough wait for a newly submitted unit: queue length times the spacing.
    ///
    /// Ignores window exhaustion and backoff, so it is a lower bound in practice.
    pub fn estimated_wait_time(&self) -> Duration {
        let queued = self.shared.lock().pending.len() as u32;
        self.shared.config.retry_delay.saturating_mul(queued)
    }
}

/// Hands the driver role back if the driver exits without observing an
/// empty queue (a panic outside the action, or task cancellation).
struct DriverGuard<E: Send + 'static> {
    shared: Arc<Shared<E>>,
    finished: bool,
}

impl<E: Send + 'static> Drop for DriverGuard<E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let restart = {
            let mut state = self.shared.lock();
            state.drain = DrainState::Idle;
            !state.pending.is_empty() && state.begin_drain()
        };
        tracing::error!(restart, "Queue driver exited abnormally");

        if restart {
            match Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(drain(Arc::clone(&self.shared)));
                }
                Err(_) => self.shared.lock().drain = DrainState::Idle,
            }
        }
    }
}

/// The driver loop. Exits when the queue is observed empty.
async fn drain<E: Send + 'static>(shared: Arc<Shared<E>>) {
    tracing::debug!("Queue driver started");
    let mut guard = DriverGuard {
        shared: Arc::clone(&shared),
        finished: false,
    };

    loop {
        let mut unit = {
            let mut state = shared.lock();
            match state.pending.pop_front() {
                Some(unit) => unit,
                None => {
                    state.drain = DrainState::Idle;
                    guard.finished = true;
                    tracing::debug!("Queue drained, driver going idle");
                    return;
                }
            }
        };

        wait_for_slot(&shared, &unit.id).await;

        let dispatched_at = Instant::now();
        tracing::debug!(
            unit_id = %unit.id,
            attempt = unit.retry_count + 1,
            "Dispatching unit"
        );

        let outcome = AssertUnwindSafe(unit.job.attempt()).catch_unwind().await;

        match outcome {
            Ok(Ok(())) => {
                // Only successful dispatches count against the budget and spacing.
                shared.lock().window.record(dispatched_at);
                tracing::debug!(unit_id = %unit.id, "Unit completed");
            }
            Ok(Err(err)) => {
                let class = (shared.classifier)(&err);
                if class == ErrorClass::Throttled && unit.retry_count < shared.config.max_retries {
                    unit.retry_count += 1;
                    let delay = shared.config.backoff_for(unit.retry_count);
                    tracing::warn!(
                        unit_id = %unit.id,
                        attempt = unit.retry_count,
                        max_retries = shared.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Throttled, scheduling retry"
                    );
                    schedule_retry(Arc::clone(&shared), unit, delay);
                } else {
                    tracing::warn!(
                        unit_id = %unit.id,
                        retries = unit.retry_count,
                        throttled = class == ErrorClass::Throttled,
                        "Unit failed"
                    );
                    unit.job.reject(err);
                }
            }
            Err(_) => {
                tracing::error!(unit_id = %unit.id, "Unit action panicked, dropping unit");
            }
        }
    }
}

/// Suspends until the budget has headroom, then until the spacing has elapsed.
async fn wait_for_slot<E>(shared: &Shared<E>, unit_id: &str) {
    let headroom_wait = {
        let mut state = shared.lock();
        let now = Instant::now();
        state.window.prune(now);
        state.window.time_until_headroom(now)
    };

    if let Some(wait) = headroom_wait {
        tracing::info!(
            unit_id = %unit_id,
            wait_ms = wait.as_millis() as u64,
            "Per-minute budget exhausted, waiting for window"
        );
        tokio::time::sleep(wait).await;
        shared.lock().window.prune(Instant::now());
    }

    let spacing_wait = {
        let state = shared.lock();
        state
            .window
            .time_until_spacing(Instant::now(), shared.config.retry_delay)
    };

    if let Some(wait) = spacing_wait {
        tracing::debug!(
            unit_id = %unit_id,
            wait_ms = wait.as_millis() as u64,
            "Waiting for minimum spacing"
        );
        tokio::time::sleep(wait).await;
    }
}

/// Reinserts `unit` at the front after `delay`, restarting the driver if idle.
fn schedule_retry<E: Send + 'static>(shared: Arc<Shared<E>>, unit: QueuedUnit<E>, delay: Duration) {
    shared.lock().in_backoff += 1;

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let start_driver = {
            let mut state = shared.lock();
            state.in_backoff -= 1;
            tracing::debug!(unit_id = %unit.id, "Reinserting unit at queue front");
            state.pending.push_front(unit);
            state.begin_drain()
        };

        if start_driver {
            tokio::spawn(drain(shared));
        }
    });
}
