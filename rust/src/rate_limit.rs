use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use parley_store_traits::Clock;

use crate::config::{RateLimitConfig, RateWindow};
use crate::error::SyncError;

/// External admission control consulted before quota-bound operations.
pub trait AdmissionControl: Send + Sync {
    /// Records an attempt for `key` and reports whether it must be rejected.
    /// Rejected attempts are not recorded.
    fn is_rate_limited(&self, key: &str) -> bool;

    /// Seconds until `key` admits another attempt; 0 when it already would.
    fn remaining_time(&self, key: &str) -> u64;
}

/// Rejects `key` with [`SyncError::RateLimited`] if `limiter` is saturated.
pub fn admit(limiter: &dyn AdmissionControl, key: &str) -> Result<(), SyncError> {
    if limiter.is_rate_limited(key) {
        let retry_after_secs = limiter.remaining_time(key).max(1);
        tracing::debug!(key, retry_after_secs, "rate limited");
        return Err(SyncError::RateLimited { retry_after_secs });
    }
    Ok(())
}

/// At most `max` admitted attempts per key in any trailing `window_ms`.
pub struct SlidingWindowLimiter {
    clock: Arc<dyn Clock>,
    window: RateWindow,
    hits: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl SlidingWindowLimiter {
    pub fn new(clock: Arc<dyn Clock>, window: RateWindow) -> Self {
        Self {
            clock,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, hits: &mut VecDeque<i64>, now: i64) {
        while hits
            .front()
            .is_some_and(|t| now - t >= self.window.window_ms)
        {
            hits.pop_front();
        }
    }
}

impl AdmissionControl for SlidingWindowLimiter {
    fn is_rate_limited(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let mut all = self.hits.lock();
        let hits = all.entry(key.to_string()).or_default();
        self.prune(hits, now);
        if hits.len() >= self.window.max {
            return true;
        }
        hits.push_back(now);
        false
    }

    fn remaining_time(&self, key: &str) -> u64 {
        let now = self.clock.now_millis();
        let mut all = self.hits.lock();
        let Some(hits) = all.get_mut(key) else {
            return 0;
        };
        self.prune(hits, now);
        if hits.len() < self.window.max {
            return 0;
        }
        let Some(oldest) = hits.front() else {
            return 0;
        };
        let wait_ms = (oldest + self.window.window_ms - now).max(0);
        u64::try_from((wait_ms + 999) / 1000).unwrap_or(0)
    }
}

/// The three quotas the app enforces.
#[derive(Clone)]
pub struct RateLimiters {
    pub message: Arc<dyn AdmissionControl>,
    pub friend_request: Arc<dyn AdmissionControl>,
    pub search: Arc<dyn AdmissionControl>,
}

impl RateLimiters {
    pub fn from_config(clock: Arc<dyn Clock>, config: &RateLimitConfig) -> Self {
        Self {
            message: Arc::new(SlidingWindowLimiter::new(clock.clone(), config.message)),
            friend_request: Arc::new(SlidingWindowLimiter::new(
                clock.clone(),
                config.friend_request,
            )),
            search: Arc::new(SlidingWindowLimiter::new(clock, config.search)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store_traits::ManualClock;
    use std::time::Duration;

    #[test]
    fn rejects_past_quota_with_retry_after() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = SlidingWindowLimiter::new(
            clock.clone(),
            RateWindow {
                max: 3,
                window_ms: 60_000,
            },
        );
        for _ in 0..3 {
            assert!(admit(&limiter, "u1").is_ok());
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(
            admit(&limiter, "u1"),
            Err(SyncError::RateLimited {
                retry_after_secs: 57
            })
        );
        assert!(admit(&limiter, "u2").is_ok());
    }

    #[test]
    fn window_slides() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = SlidingWindowLimiter::new(
            clock.clone(),
            RateWindow {
                max: 1,
                window_ms: 1_000,
            },
        );
        assert!(!limiter.is_rate_limited("k"));
        assert!(limiter.is_rate_limited("k"));
        assert_eq!(limiter.remaining_time("k"), 1);
        clock.advance(Duration::from_millis(1_000));
        assert_eq!(limiter.remaining_time("k"), 0);
        assert!(!limiter.is_rate_limited("k"));
    }
}
