//! Per-host rate limiting and transient-failure retry.
//!
//! Each host gets a governor instance enforcing the minimum inter-arrival
//! delay; requests wait on `until_ready()` before hitting the wire. On a
//! 429 the governor is atomically swapped to a slower rate, restored after
//! a quiet period. Retryable failures (429, 5xx, timeouts) back off
//! exponentially with jitter, capped at a fixed attempt count.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP statuses retried with backoff.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Exponential backoff with jitter for transient failures.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    /// Fractional jitter, e.g. 0.2 for ±20%.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            jitter: 0.2,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * (self.factor as f64).powi(attempt as i32);
        let jitter = 1.0 + self.jitter * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_secs_f64((exp * jitter).max(0.0))
    }
}

/// Per-host rate limiter with adaptive slowdown.
///
/// A 429 doubles the inter-arrival period (capped at 16x). After 30
/// seconds without another 429, the base period is restored.
pub struct HostLimiter {
    limiter: ArcSwap<DirectLimiter>,
    base_period: Duration,
    current_factor: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl HostLimiter {
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let quota = Quota::with_period(period).expect("period is nonzero");
        Self {
            limiter: ArcSwap::from(Arc::new(DirectLimiter::direct(quota))),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Wait until this host admits another request.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Called on a 429: double the slowdown factor and swap the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| Some((f * 2).min(16)));

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor)
            && let Some(quota) = Quota::with_period(scaled)
        {
            self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
        }
    }

    pub fn slowdown_factor(&self) -> u32 {
        self.current_factor.load(Ordering::Relaxed)
    }

    /// Restore the base rate after 30s without a 429.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= 30))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            let quota = Quota::with_period(self.base_period).expect("base period valid");
            self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
        }
    }
}

/// One limiter per host, built from the enabled adapter set at dispatcher
/// construction. Hosts are never added afterwards.
pub struct HostLimiters {
    limiters: HashMap<&'static str, Arc<HostLimiter>>,
}

impl HostLimiters {
    pub fn new(hosts: impl IntoIterator<Item = &'static str>, period: Duration) -> Self {
        let mut limiters = HashMap::new();
        for host in hosts {
            limiters
                .entry(host)
                .or_insert_with(|| Arc::new(HostLimiter::new(period)));
        }
        Self { limiters }
    }

    pub fn get(&self, host: &str) -> Option<Arc<HostLimiter>> {
        self.limiters.get(host).cloned()
    }
}

/// Parse a Retry-After header value (integer seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date: fall back to a conservative fixed wait
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Terminal failure of a request after retries are exhausted.
#[derive(Debug, Clone)]
pub enum SendError {
    Timeout,
    Net(String),
    Cancelled,
}

/// Send a request, waiting on the host governor before each attempt and
/// retrying transient failures per `policy`.
///
/// The returned response may still carry a non-retryable error status;
/// interpreting those (404-as-no-results etc.) is the caller's business.
pub async fn send_with_backoff(
    build: impl Fn() -> reqwest::RequestBuilder,
    limiter: Option<&HostLimiter>,
    policy: &BackoffPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, SendError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }
        if let Some(lim) = limiter {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SendError::Cancelled),
                _ = lim.acquire() => {}
            }
        }

        let send = build().send();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(SendError::Cancelled),
            r = send => r,
        };

        match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if !RETRYABLE_STATUSES.contains(&status) {
                    return Ok(resp);
                }
                attempt += 1;
                if attempt >= max_attempts {
                    return Ok(resp);
                }
                let wait = if status == 429 {
                    if let Some(lim) = limiter {
                        lim.on_rate_limited();
                    }
                    // Honor Retry-After, capped at the request timeout.
                    resp.headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after)
                        .unwrap_or_else(|| policy.delay(attempt - 1))
                        .min(timeout)
                } else {
                    policy.delay(attempt - 1)
                };
                tracing::debug!(status, wait_ms = wait.as_millis() as u64, "retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SendError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(err) => {
                let timed_out = err.is_timeout() || err.is_connect();
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(if err.is_timeout() {
                        SendError::Timeout
                    } else {
                        SendError::Net(err.to_string())
                    });
                }
                let wait = policy.delay(attempt - 1);
                tracing::debug!(error = %err, timed_out, wait_ms = wait.as_millis() as u64, "retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SendError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("0"), Some(Duration::from_secs(0)));
    }

    #[test]
    fn parse_http_date_is_conservative() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn parse_garbage_is_none() {
        assert_eq!(parse_retry_after("xyz"), None);
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter() {
        let policy = BackoffPolicy::default();
        for attempt in 0..3u32 {
            let nominal = 0.5 * 2f64.powi(attempt as i32);
            let d = policy.delay(attempt).as_secs_f64();
            assert!(d >= nominal * 0.79 && d <= nominal * 1.21, "attempt {attempt}: {d}");
        }
    }

    #[test]
    fn limiter_starts_at_factor_1_and_doubles() {
        let limiter = HostLimiter::new(Duration::from_millis(100));
        assert_eq!(limiter.slowdown_factor(), 1);
        limiter.on_rate_limited();
        assert_eq!(limiter.slowdown_factor(), 2);
        limiter.on_rate_limited();
        assert_eq!(limiter.slowdown_factor(), 4);
    }

    #[test]
    fn limiter_factor_caps_at_16() {
        let limiter = HostLimiter::new(Duration::from_millis(100));
        for _ in 0..10 {
            limiter.on_rate_limited();
        }
        assert_eq!(limiter.slowdown_factor(), 16);
    }

    #[tokio::test]
    async fn first_acquire_is_immediate() {
        let limiter = HostLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;
    }

    #[tokio::test]
    async fn decay_restores_after_quiet_period() {
        let limiter = HostLimiter::new(Duration::from_millis(100));
        limiter.on_rate_limited();
        assert_eq!(limiter.slowdown_factor(), 2);
        {
            let mut last = limiter.last_429.lock().unwrap();
            *last = Some(Instant::now() - Duration::from_secs(31));
        }
        limiter.acquire().await;
        assert_eq!(limiter.slowdown_factor(), 1);
    }

    #[test]
    fn limiters_table_is_per_host() {
        let table = HostLimiters::new(
            ["api.crossref.org", "dblp.org", "api.crossref.org"],
            Duration::from_millis(100),
        );
        assert!(table.get("api.crossref.org").is_some());
        assert!(table.get("dblp.org").is_some());
        assert!(table.get("unknown.example").is_none());
    }
}
