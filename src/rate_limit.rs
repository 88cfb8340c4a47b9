// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-client request rate limiting.
//!
//! Fixed window algorithm: each client identity gets a counter and a window
//! reset time. The first request from an unseen (or expired) identity opens
//! a fresh 60 second window; every request inside the window increments the
//! counter and is admitted while the counter stays within the limit.
//!
//! Rejected requests still consume a slot: the counter is incremented before
//! the limit check and never rolled back, so `retry_after` always reports
//! the time until the window clears naturally.
//!
//! A background sweep removes expired records so memory stays bounded by the
//! set of recently-active clients.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Window length for the fixed window algorithm.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Maximum admitted (or attempted) requests per client per window.
const DEFAULT_MAX_REQUESTS: u32 = 10;

/// Interval between background sweeps of expired records.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of an admission check. Rejection is a normal outcome, not an
/// error: the caller maps it to a 429 response with the retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after_secs: u64 },
}

struct ClientRecord {
    count: u32,
    reset_at: Instant,
}

/// Process-wide request rate limiter keyed by client identity.
///
/// All reads and updates go through one `RwLock`; the write lock serializes
/// the read-modify-write of a client's counter. The lock is only held for
/// the in-memory update, never across await points, which is more than
/// enough at the target scale of tens of requests per minute.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    store: RwLock<HashMap<String, ClientRecord>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }

    pub fn with_limits(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether a request from `client_id` is admitted right now.
    pub fn admit(&self, client_id: &str) -> Admission {
        self.admit_at(client_id, Instant::now())
    }

    /// Admission check against an explicit clock reading.
    ///
    /// Tests drive this directly with fabricated instants; `admit` passes
    /// the real time.
    fn admit_at(&self, client_id: &str, now: Instant) -> Admission {
        let mut store = self
            .store
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(record) = store.get_mut(client_id) {
            if now <= record.reset_at {
                record.count += 1;
                if record.count <= self.max_requests {
                    return Admission::Allowed;
                }
                let remaining = record.reset_at.saturating_duration_since(now);
                return Admission::Rejected {
                    retry_after_secs: ceil_secs(remaining),
                };
            }

            // Window elapsed: this request opens a fresh one.
            record.count = 1;
            record.reset_at = now + self.window;
            return Admission::Allowed;
        }

        // Never-seen client: first request of a fresh window.
        store.insert(
            client_id.to_string(),
            ClientRecord {
                count: 1,
                reset_at: now + self.window,
            },
        );
        Admission::Allowed
    }

    /// Remove every record whose window has already elapsed.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut store = self
            .store
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = store.len();
        store.retain(|_, record| record.reset_at >= now);
        let removed = before - store.len();
        if removed > 0 {
            debug!(removed, remaining = store.len(), "rate limiter sweep");
        }
    }

    /// Number of client identities currently tracked.
    pub fn tracked_clients(&self) -> usize {
        let store = self
            .store
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        store.len()
    }

    /// Run the periodic sweep until the cancellation token is triggered.
    ///
    /// Spawned as a background task at startup:
    /// ```rust,ignore
    /// tokio::spawn(Arc::clone(&limiter).run_sweeper(shutdown.clone()));
    /// ```
    pub async fn run_sweeper(self: std::sync::Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = SWEEP_INTERVAL.as_secs(),
            "rate limiter sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {},
                _ = shutdown.cancelled() => {
                    info!("rate limiter sweeper shutting down");
                    return;
                }
            }

            self.sweep();
        }
    }
}

/// Seconds until `remaining` elapses, rounded up.
fn ceil_secs(remaining: Duration) -> u64 {
    ((remaining.as_millis() + 999) / 1000) as u64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn first_ten_requests_admitted_eleventh_rejected() {
        let limiter = RateLimiter::new();
        let base = Instant::now();

        for i in 0..10 {
            assert_eq!(
                limiter.admit_at("10.0.0.1", base + Duration::from_secs(i)),
                Admission::Allowed,
                "request {} should be admitted",
                i + 1
            );
        }

        match limiter.admit_at("10.0.0.1", base + Duration::from_secs(10)) {
            Admission::Rejected { retry_after_secs } => {
                assert!(retry_after_secs > 0);
                assert!(retry_after_secs <= 60);
            }
            Admission::Allowed => panic!("11th request should be rejected"),
        }
    }

    #[test]
    fn rejected_requests_still_consume_slots() {
        let limiter = RateLimiter::with_limits(2, Duration::from_secs(60));
        let base = Instant::now();

        assert_eq!(limiter.admit_at("client", base), Admission::Allowed);
        assert_eq!(limiter.admit_at("client", base), Admission::Allowed);

        // Both of these are rejected, and both keep counting toward the same
        // window, so the reported delay stays anchored to the original reset
        // time rather than shrinking per attempt.
        let first = limiter.admit_at("client", base + Duration::from_secs(10));
        let second = limiter.admit_at("client", base + Duration::from_secs(10));
        assert_eq!(first, Admission::Rejected { retry_after_secs: 50 });
        assert_eq!(second, Admission::Rejected { retry_after_secs: 50 });
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        let limiter = RateLimiter::with_limits(1, Duration::from_secs(60));
        let base = Instant::now();

        assert_eq!(limiter.admit_at("client", base), Admission::Allowed);

        let admission = limiter.admit_at("client", base + Duration::from_millis(59_500));
        assert_eq!(admission, Admission::Rejected { retry_after_secs: 1 });
    }

    #[test]
    fn window_elapse_resets_the_count() {
        let limiter = RateLimiter::new();
        let base = Instant::now();

        for _ in 0..10 {
            assert_eq!(limiter.admit_at("client", base), Admission::Allowed);
        }
        assert!(matches!(
            limiter.admit_at("client", base),
            Admission::Rejected { .. }
        ));

        // One second past the reset time: fresh window, count back to 1, so
        // another full burst is admitted.
        let later = base + Duration::from_secs(61);
        for i in 0..10 {
            assert_eq!(
                limiter.admit_at("client", later + Duration::from_millis(i)),
                Admission::Allowed
            );
        }
    }

    #[test]
    fn identities_are_tracked_independently() {
        let limiter = RateLimiter::with_limits(1, Duration::from_secs(60));
        let base = Instant::now();

        assert_eq!(limiter.admit_at("a", base), Admission::Allowed);
        assert!(matches!(
            limiter.admit_at("a", base),
            Admission::Rejected { .. }
        ));

        assert_eq!(limiter.admit_at("b", base), Admission::Allowed);
    }

    #[test]
    fn sweep_removes_expired_records_only() {
        let limiter = RateLimiter::new();
        let base = Instant::now();

        limiter.admit_at("old", base);
        limiter.admit_at("fresh", base + Duration::from_secs(30));
        assert_eq!(limiter.tracked_clients(), 2);

        // "old" expired at base + 60s; "fresh" is still inside its window.
        limiter.sweep_at(base + Duration::from_secs(61));
        assert_eq!(limiter.tracked_clients(), 1);

        // A sweep cycle later, "fresh" has expired too.
        limiter.sweep_at(base + Duration::from_secs(121));
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn concurrent_admissions_are_serialized() {
        let limiter = Arc::new(RateLimiter::with_limits(100, Duration::from_secs(60)));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    for _ in 0..10 {
                        assert_eq!(limiter.admit("shared"), Admission::Allowed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("admission thread panicked");
        }

        // Exactly 100 slots were consumed; the next request is over budget.
        assert!(matches!(
            limiter.admit("shared"),
            Admission::Rejected { .. }
        ));
    }
}
