//! Fixed-window admission control keyed by client identity
//!
//! Gates access to the metered upstream pipeline. Counting is fixed-window
//! (not sliding, not token-bucket): the first request from an identity opens
//! a window, subsequent requests increment the window's count until either
//! the quota is exhausted or the window expires, at which point the next
//! request opens a fresh window.
//!
//! State is process-local and never persisted; quotas reset on restart.
//! Stale entries are kept for the life of the process (accepted growth
//! bound: one entry per distinct identity seen).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Per-identity window record
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Admission decision for one request
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// When the current window expires (set on denial)
    pub reset_at: Option<DateTime<Utc>>,
}

/// In-memory per-identity rate limiter with fixed-window counters.
///
/// Constructed once at startup and injected through `AppState`; the window
/// map is owned exclusively by this type. The read-modify-write of an
/// identity's window happens under the map lock, so concurrent requests
/// from one identity can never jointly exceed the quota.
pub struct RateLimiter {
    max_requests: u32,
    window: chrono::Duration,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window: chrono::Duration::from_std(window)
                .expect("rate limit window out of range"),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Charge one request against `identity` and decide admission.
    ///
    /// Never fails; fully deterministic given the clock and stored window.
    pub fn check(&self, identity: &str) -> RateDecision {
        self.check_at(identity, Utc::now())
    }

    /// Clock-explicit variant of [`check`](Self::check).
    pub fn check_at(&self, identity: &str, now: DateTime<Utc>) -> RateDecision {
        let mut windows = self.windows.lock().expect("rate limit map poisoned");

        match windows.entry(identity.to_string()) {
            // First request from this identity: open a window
            Entry::Vacant(entry) => {
                entry.insert(RateWindow {
                    count: 1,
                    reset_at: now + self.window,
                });
                RateDecision {
                    allowed: true,
                    remaining: self.max_requests - 1,
                    reset_at: None,
                }
            }
            Entry::Occupied(mut entry) => {
                let window = entry.get_mut();

                // Stored window expired: replace it, do not increment
                if now >= window.reset_at {
                    *window = RateWindow {
                        count: 1,
                        reset_at: now + self.window,
                    };
                    return RateDecision {
                        allowed: true,
                        remaining: self.max_requests - 1,
                        reset_at: None,
                    };
                }

                // Quota exhausted: deny, surfacing when the window resets
                if window.count >= self.max_requests {
                    return RateDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at: Some(window.reset_at),
                    };
                }

                window.count += 1;
                RateDecision {
                    allowed: true,
                    remaining: self.max_requests - window.count,
                    reset_at: None,
                }
            }
        }
    }
}
