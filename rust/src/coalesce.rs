//! Clock-driven coalescing of bursty callbacks.
//!
//! Neither type owns a timer. Callers feed events in, and poll with the
//! current time from an injected [`Clock`], so simulated time drives them in tests.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parley_store_traits::Clock;

/// Trailing debounce: calls arriving within `window_ms` of the previous call
/// collapse into one invocation carrying the latest value.
pub struct Debouncer<T> {
    clock: Arc<dyn Clock>,
    window_ms: i64,
    pending: Option<(T, i64)>,
}

impl<T> Debouncer<T> {
    pub fn new(clock: Arc<dyn Clock>, window_ms: i64) -> Self {
        Self {
            clock,
            window_ms: window_ms.max(0),
            pending: None,
        }
    }

    /// Replaces any pending value and pushes the deadline out by a full window.
    pub fn call(&mut self, value: T) {
        let deadline = self.clock.now_millis() + self.window_ms;
        self.pending = Some((value, deadline));
    }

    /// Returns the pending value once its window has elapsed without new calls.
    pub fn poll(&mut self) -> Option<T> {
        let now = self.clock.now_millis();
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => self.pending.take().map(|(v, _)| v),
            _ => None,
        }
    }

    /// Takes the pending value regardless of its deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(v, _)| v)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn deadline(&self) -> Option<i64> {
        self.pending.as_ref().map(|(_, d)| *d)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Answers "is it time to recompute `key` again?" at most once per `ttl_ms`.
pub struct FreshnessCache<K> {
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    last: HashMap<K, i64>,
}

impl<K: Eq + Hash> FreshnessCache<K> {
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            clock,
            ttl_ms,
            last: HashMap::new(),
        }
    }

    /// True when `key` was never checked, was reset, or was last granted at
    /// least `ttl_ms` ago. A `true` answer starts a new window.
    pub fn check(&mut self, key: K) -> bool {
        let now = self.clock.now_millis();
        match self.last.get(&key) {
            Some(at) if now - at < self.ttl_ms => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }

    /// Forces the next `check` for `key` to pass.
    pub fn reset<Q>(&mut self, key: &Q)
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.last.remove(key);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store_traits::ManualClock;
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(1_000))
    }

    #[test]
    fn burst_collapses_into_latest_value() {
        let clock = clock();
        let mut d = Debouncer::new(clock.clone(), 700);
        d.call(1);
        clock.advance(Duration::from_millis(300));
        d.call(2);
        clock.advance(Duration::from_millis(300));
        d.call(3);
        clock.advance(Duration::from_millis(699));
        assert_eq!(d.poll(), None);
        clock.advance(Duration::from_millis(1));
        assert_eq!(d.poll(), Some(3));
        assert_eq!(d.poll(), None);
        assert!(!d.is_pending());
    }

    #[test]
    fn cancel_and_flush() {
        let clock = clock();
        let mut d = Debouncer::new(clock.clone(), 700);
        d.call("a");
        assert_eq!(d.deadline(), Some(1_700));
        d.cancel();
        clock.advance(Duration::from_secs(1));
        assert_eq!(d.poll(), None);
        d.call("b");
        assert_eq!(d.flush(), Some("b"));
    }

    #[test]
    fn freshness_grants_once_per_ttl() {
        let clock = clock();
        let mut f = FreshnessCache::new(clock.clone(), 5_000);
        assert!(f.check("friends".to_string()));
        assert!(!f.check("friends".to_string()));
        assert!(f.check("a1_b1".to_string()));
        clock.advance(Duration::from_millis(4_999));
        assert!(!f.check("friends".to_string()));
        clock.advance(Duration::from_millis(1));
        assert!(f.check("friends".to_string()));
    }

    #[test]
    fn reset_forces_next_check() {
        let clock = clock();
        let mut f = FreshnessCache::new(clock, 5_000);
        assert!(f.check("k".to_string()));
        f.reset("k");
        assert!(f.check("k".to_string()));
        f.clear();
        assert!(f.check("k".to_string()));
    }
}
