//! Per-minute request accounting.
//!
//! `RateWindow` keeps the instants of recent dispatches. Entries older than
//! the window period are dropped lazily on each dispatch attempt; there is
//! no background timer. Keeping instants rather than a bare counter makes
//! the budget hold over any rolling window, not only aligned ones.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Length of one accounting window.
pub const WINDOW_PERIOD: Duration = Duration::from_secs(60);

/// Dispatch history for one queue instance.
#[derive(Debug)]
pub struct RateWindow {
    budget: u32,
    period: Duration,
    dispatches: VecDeque<Instant>,
    last_request: Option<Instant>,
}

impl RateWindow {
    /// Creates an empty window with the given per-period budget.
    pub fn new(budget: u32, period: Duration) -> Self {
        Self {
            budget,
            period,
            dispatches: VecDeque::with_capacity(budget as usize),
            last_request: None,
        }
    }

    /// Drops dispatches that fell out of the window.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.dispatches.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                self.dispatches.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of dispatches inside the window ending at `now`.
    pub fn requests_in_window(&self, now: Instant) -> u32 {
        self.dispatches
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < self.period)
            .count() as u32
    }

    /// Start of the current window: the oldest dispatch still counted.
    pub fn window_start(&self, now: Instant) -> Option<Instant> {
        self.dispatches
            .iter()
            .copied()
            .find(|&t| now.saturating_duration_since(t) < self.period)
    }

    /// How long until one more dispatch fits in the budget, or `None` if it fits now.
    pub fn time_until_headroom(&self, now: Instant) -> Option<Duration> {
        let live: Vec<Instant> = self
            .dispatches
            .iter()
            .copied()
            .filter(|&t| now.saturating_duration_since(t) < self.period)
            .collect();

        if (live.len() as u32) < self.budget {
            return None;
        }

        // The dispatch that must expire before we are back under budget.
        // A zero budget has none, so it never has headroom.
        let blocking = live
            .len()
            .checked_sub(self.budget as usize)
            .and_then(|idx| live.get(idx));
        match blocking {
            Some(&blocking) => Some((blocking + self.period).saturating_duration_since(now)),
            None => Some(self.period),
        }
    }

    /// How long until `spacing` has passed since the last dispatch, or `None` if it has.
    pub fn time_until_spacing(&self, now: Instant, spacing: Duration) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_request?);
        if elapsed >= spacing {
            None
        } else {
            Some(spacing - elapsed)
        }
    }

    /// Time until the oldest counted dispatch leaves the window.
    pub fn time_until_reset(&self, now: Instant) -> Duration {
        self.window_start(now)
            .map(|start| (start + self.period).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Time since the most recent dispatch, if any.
    pub fn time_since_last(&self, now: Instant) -> Option<Duration> {
        self.last_request
            .map(|last| now.saturating_duration_since(last))
    }

    /// Records a dispatch at `now`.
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.dispatches.push_back(now);
        self.last_request = Some(now);
    }
}
