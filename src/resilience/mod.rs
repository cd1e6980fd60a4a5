/*
 * Rate limiting, circuit breaking, backoff and TTL caching primitives
 */

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket limiter. `acquire` waits until a token is available; waiters
/// queue on the internal lock in arrival order. Cancellation is handled at
/// the call site by racing `acquire` against a cancellation token.
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    state: tokio::sync::Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            rate_per_sec,
            burst: f64::from(burst),
            state: tokio::sync::Mutex::new(BucketState {
                tokens: f64::from(burst),
                refilled_at: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
            state.refilled_at = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let wait = (1.0 - state.tokens) / self.rate_per_sec;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Take a token only if one is immediately available.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.refilled_at = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure-counting gate. Opens once consecutive failures exceed the
/// threshold; while open every `check` fails immediately. After `open_for`
/// elapses a single probe is admitted (half-open); its outcome decides the
/// next state.
pub struct CircuitBreaker {
    threshold: u32,
    open_for: Duration,
    inner: Mutex<BreakerInner>,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, open_for: Duration) -> Self {
        Self {
            threshold,
            open_for,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a request. `Ok` admits it; `Err` means the breaker is open (or a
    /// half-open probe is already in flight) and the caller must fail fast.
    pub fn check(&self) -> std::result::Result<(), ()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Err(()),
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.open_for);
                if expired {
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures += 1;
        if inner.state == BreakerState::HalfOpen || inner.consecutive_failures > self.threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// Exponential reconnect delay: starts at `initial`, doubles per failure,
/// capped at `max`. `reset` returns it to the initial delay.
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to sleep for this failure; doubles the next one.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Single-slot TTL cache. The first caller after expiry performs the fetch
/// while holding the lock; concurrent callers wait and then read the fresh
/// value.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: tokio::sync::Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TtlCache<T> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn get_or_try_insert_with<F, Fut, E>(&self, fetch: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((value, fetched_at)) = slot.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = fetch().await?;
        *slot = Some((value.clone(), Instant::now()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn bucket_grants_burst_then_refuses() {
        let bucket = TokenBucket::new(20.0, 5);
        for _ in 0..5 {
            assert!(bucket.try_acquire().await);
        }
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_at_rate() {
        let bucket = TokenBucket::new(20.0, 5);
        for _ in 0..5 {
            assert!(bucket.try_acquire().await);
        }
        // 50 ms buys back one token at 20 rps
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_acquire_waits_for_token() {
        let bucket = TokenBucket::new(20.0, 1);
        bucket.acquire().await;
        let before = Instant::now();
        bucket.acquire().await;
        assert!(before.elapsed() >= Duration::from_millis(49));
    }

    #[test]
    fn breaker_opens_only_above_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.check().is_ok(), "3 failures must not open");
        cb.record_failure();
        assert!(cb.check().is_err(), "4th failure must open");
    }

    #[test]
    fn breaker_success_resets_count() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            cb.record_failure();
        }
        cb.record_success();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.check().is_ok());
    }

    #[test]
    fn breaker_half_open_admits_single_probe() {
        let cb = CircuitBreaker::new(3, Duration::ZERO);
        for _ in 0..4 {
            cb.record_failure();
        }
        // Expired open window: first check transitions to half-open.
        assert!(cb.check().is_ok());
        // Probe in flight: concurrent calls still rejected.
        assert!(cb.check().is_err());
        cb.record_success();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn breaker_failed_probe_reopens() {
        let cb = CircuitBreaker::new(3, Duration::ZERO);
        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(cb.check().is_ok());
        cb.record_failure();
        // Window is zero so it immediately re-admits one probe, not more.
        assert!(cb.check().is_ok());
        assert!(cb.check().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(b.next(), Duration::from_secs(1));
        assert_eq!(b.next(), Duration::from_secs(2));
        assert_eq!(b.next(), Duration::from_secs(4));
        for _ in 0..10 {
            b.next();
        }
        assert_eq!(b.next(), Duration::from_secs(30));
    }

    #[test]
    fn backoff_resets_to_initial() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        b.next();
        b.next();
        b.next();
        b.reset();
        assert_eq!(b.next(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_cache_fetches_once_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(15));
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let v: std::result::Result<u64, ()> = cache
                .get_or_try_insert_with(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(v.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(16)).await;
        let v: std::result::Result<u64, ()> = cache
            .get_or_try_insert_with(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(43)
            })
            .await;
        assert_eq!(v.unwrap(), 43);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_cache_error_leaves_slot_empty() {
        let cache: TtlCache<u64> = TtlCache::new(Duration::from_secs(15));
        let v: std::result::Result<u64, &str> = cache
            .get_or_try_insert_with(|| async { Err("boom") })
            .await;
        assert!(v.is_err());

        let v: std::result::Result<u64, &str> = cache
            .get_or_try_insert_with(|| async { Ok(7) })
            .await;
        assert_eq!(v.unwrap(), 7);
    }
}
