//! Timing properties of the request queue, run on a paused Tokio clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stratforge::scheduler::{RateLimitConfig, RequestQueue};
use stratforge::LlmError;
use tokio::time::Instant;

type Log = Arc<Mutex<Vec<(String, Instant)>>>;

fn config(rpm: u32, delay_secs: u64, retries: u32) -> RateLimitConfig {
    RateLimitConfig::new()
        .with_requests_per_minute(rpm)
        .with_retry_delay(Duration::from_secs(delay_secs))
        .with_max_retries(retries)
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, label: &str) {
    log.lock().unwrap().push((label.to_string(), Instant::now()));
}

fn offsets(log: &Log, origin: Instant) -> Vec<Duration> {
    log.lock()
        .unwrap()
        .iter()
        .map(|(_, at)| at.duration_since(origin))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_budget_holds_over_every_rolling_window() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(3, 1, 3)).unwrap();
    let log = new_log();
    let origin = Instant::now();

    let handles: Vec<_> = (0..7)
        .map(|i| {
            let log = Arc::clone(&log);
            queue.submit(move || {
                record(&log, &format!("unit-{}", i));
                async move { Ok::<_, LlmError>(i) }
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), i);
    }

    let times = offsets(&log, origin);
    assert_eq!(times.len(), 7);
    for i in 3..times.len() {
        assert!(
            times[i] - times[i - 3] >= Duration::from_secs(60),
            "dispatch {} came {:?} after dispatch {}",
            i,
            times[i] - times[i - 3],
            i - 3
        );
    }
    // The fourth dispatch waits for the first to leave the window.
    assert!(times[3] >= Duration::from_secs(60));
    assert!(times[6] >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_minimum_spacing_between_dispatches() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(100, 2, 0)).unwrap();
    let log = new_log();
    let origin = Instant::now();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let log = Arc::clone(&log);
            queue.submit(move || {
                record(&log, "unit");
                async { Ok::<_, LlmError>(()) }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let times = offsets(&log, origin);
    assert_eq!(times[0], Duration::ZERO);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(2));
    }
}

#[tokio::test(start_paused = true)]
async fn test_always_throttled_unit_retries_with_doubling_backoff() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(100, 1, 2)).unwrap();
    let log = new_log();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let attempts = Arc::clone(&log);
    let result = queue
        .submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            record(&attempts, "throttled");
            async { Err::<(), _>(LlmError::RateLimited("slow down".to_string())) }
        })
        .await;

    assert!(matches!(result, Err(LlmError::RateLimited(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let first = log.lock().unwrap()[0].1;
    let times = offsets(&log, first);
    assert!(times[1] - times[0] >= Duration::from_secs(1));
    assert!(times[2] - times[1] >= Duration::from_secs(2));
    assert_eq!(queue.status().units_in_backoff, 0);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_fails_immediately() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(10, 1, 3)).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let result = queue
        .submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(LlmError::ApiError {
                    code: 401,
                    message: "invalid key".to_string(),
                })
            }
        })
        .await;

    assert!(matches!(result, Err(LlmError::ApiError { code: 401, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_throttling_recovers() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(10, 1, 3)).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let result = queue
        .submit(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::ApiError {
                        code: 429,
                        message: "Too Many Requests".to_string(),
                    })
                } else {
                    Ok("strategy text")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "strategy text");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retried_unit_overtakes_later_submissions() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(100, 1, 2)).unwrap();
    let log = new_log();
    let a_calls = Arc::new(AtomicU32::new(0));

    let a = {
        let log = Arc::clone(&log);
        let calls = Arc::clone(&a_calls);
        queue.submit_with_id("a", move || {
            record(&log, "a");
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LlmError::RateLimited("429".to_string()))
                } else {
                    Ok("a")
                }
            }
        })
    };
    let b = {
        let log = Arc::clone(&log);
        queue.submit_with_id("b", move || {
            record(&log, "b");
            async {
                // Still running when a's backoff ends at 1s.
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok::<_, LlmError>("b")
            }
        })
    };
    let c = {
        let log = Arc::clone(&log);
        queue.submit_with_id("c", move || {
            record(&log, "c");
            async { Ok::<_, LlmError>("c") }
        })
    };

    assert_eq!(a.await.unwrap(), "a");
    assert_eq!(b.await.unwrap(), "b");
    assert_eq!(c.await.unwrap(), "c");

    let order: Vec<String> = log.lock().unwrap().iter().map(|(l, _)| l.clone()).collect();
    assert_eq!(order, vec!["a", "b", "a", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_retried_unit_is_charged_once() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(2, 1, 3)).unwrap();
    let origin = Instant::now();
    let a_calls = Arc::new(AtomicU32::new(0));

    let calls = Arc::clone(&a_calls);
    let a = queue
        .submit(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LlmError::RateLimited("slow down".to_string()))
                } else {
                    Ok("a")
                }
            }
        })
        .await;
    assert_eq!(a.unwrap(), "a");
    assert_eq!(a_calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.status().requests_in_window, 1);

    let log = new_log();
    let b_log = Arc::clone(&log);
    queue
        .submit(move || {
            record(&b_log, "b");
            async { Ok::<_, LlmError>(()) }
        })
        .await
        .unwrap();

    // Only a's successful attempt counts, so b fits in the same window.
    let times = offsets(&log, origin);
    assert!(times[0] < Duration::from_secs(60), "b waited {:?}", times[0]);
    assert!(times[0] >= Duration::from_secs(2));
    assert_eq!(queue.status().requests_in_window, 2);
}

#[tokio::test(start_paused = true)]
async fn test_third_dispatch_waits_for_window_with_two_rpm() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(2, 1, 0)).unwrap();
    let log = new_log();
    let origin = Instant::now();

    let handles: Vec<_> = ["strategy", "architecture", "implementation"]
        .into_iter()
        .map(|label| {
            let log = Arc::clone(&log);
            queue.submit(move || {
                record(&log, label);
                async { Ok::<_, LlmError>(()) }
            })
        })
        .collect();

    // Two dispatches land immediately; the third is held by the budget.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = queue.status();
    assert_eq!(status.requests_in_window, 2);
    assert!(status.is_processing);

    for handle in handles {
        handle.await.unwrap();
    }

    let times = offsets(&log, origin);
    assert!(times[1] < Duration::from_secs(60));
    assert!(times[2] >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_separate_queues_have_separate_budgets() {
    let first: RequestQueue<LlmError> = RequestQueue::new(config(1, 1, 0)).unwrap();
    let second: RequestQueue<LlmError> = RequestQueue::new(config(1, 1, 0)).unwrap();
    let origin = Instant::now();

    first.submit(|| async { Ok::<_, LlmError>(()) }).await.unwrap();
    second.submit(|| async { Ok::<_, LlmError>(()) }).await.unwrap();

    assert!(origin.elapsed() < Duration::from_secs(1));
    assert_eq!(first.status().requests_in_window, 1);
    assert_eq!(second.status().requests_in_window, 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_returns_to_idle() {
    let queue: RequestQueue<LlmError> = RequestQueue::new(config(10, 1, 0)).unwrap();
    queue.submit(|| async { Ok::<_, LlmError>(()) }).await.unwrap();
    tokio::task::yield_now().await;

    let status = queue.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.units_in_backoff, 0);
    assert!(status.time_since_last_dispatch.is_some());
}
