use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use osce_core::errors::GatewayError;

/// Limits for calls to the generative service, shared across all sessions.
#[derive(Clone, Debug)]
pub struct LimiterConfig {
    /// Calls allowed in flight at once.
    pub max_concurrent: usize,
    /// Minimum gap between the starts of two calls.
    pub min_spacing: Duration,
    /// Calls allowed per refill window.
    pub quota: u32,
    pub refill_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            min_spacing: Duration::from_millis(200),
            quota: 60,
            refill_interval: Duration::from_secs(60),
        }
    }
}

struct Schedule {
    remaining: u32,
    window_start: Instant,
    last_start: Option<Instant>,
}

/// Concurrency cap, start spacing and a refillable quota in one gate.
///
/// `acquire` never fails because of load: callers over capacity wait in
/// line until a slot, the spacing gap and a quota token are all available.
pub struct RateLimiter {
    config: LimiterConfig,
    permits: Arc<Semaphore>,
    schedule: Mutex<Schedule>,
}

/// Held for the duration of one upstream call.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let quota = config.quota.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            schedule: Mutex::new(Schedule {
                remaining: quota,
                window_start: Instant::now(),
                last_start: None,
            }),
            config: LimiterConfig {
                max_concurrent,
                quota,
                ..config
            },
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn remaining_quota(&self) -> u32 {
        self.schedule.lock().remaining
    }

    pub async fn acquire(&self) -> Result<LimiterPermit, GatewayError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Cancelled)?;

        loop {
            let wait = self.try_start(Instant::now());
            match wait {
                None => break,
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "generative call queued by limiter");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(LimiterPermit { _permit: permit })
    }

    /// Claim a start slot at `now`, or report how long to wait before retrying.
    fn try_start(&self, now: Instant) -> Option<Duration> {
        let mut schedule = self.schedule.lock();

        let window_end = schedule.window_start + self.config.refill_interval;
        if now >= window_end {
            schedule.window_start = now;
            schedule.remaining = self.config.quota;
        }
        if schedule.remaining == 0 {
            return Some(window_end.saturating_duration_since(now));
        }

        if let Some(last) = schedule.last_start {
            let gap = (last + self.config.min_spacing).saturating_duration_since(now);
            if !gap.is_zero() {
                return Some(gap);
            }
        }

        schedule.remaining -= 1;
        schedule.last_start = Some(now);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_concurrent: usize, spacing_ms: u64, quota: u32) -> RateLimiter {
        RateLimiter::new(LimiterConfig {
            max_concurrent,
            min_spacing: Duration::from_millis(spacing_ms),
            quota,
            refill_interval: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_capped() {
        let limiter = limiter(2, 0, 100);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);

        let blocked = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(blocked.is_err(), "third caller should queue");

        drop(a);
        let c = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(c.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn starts_are_spaced() {
        let limiter = limiter(5, 200, 100);
        let start = Instant::now();
        drop(limiter.acquire().await.unwrap());
        drop(limiter.acquire().await.unwrap());
        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_refills_after_window() {
        let limiter = limiter(5, 0, 2);
        let start = Instant::now();
        drop(limiter.acquire().await.unwrap());
        drop(limiter.acquire().await.unwrap());
        assert_eq!(limiter.remaining_quota(), 0);

        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(limiter.remaining_quota(), 1);
    }

    #[tokio::test]
    async fn zero_limits_are_raised_to_one() {
        let limiter = RateLimiter::new(LimiterConfig {
            max_concurrent: 0,
            quota: 0,
            ..LimiterConfig::default()
        });
        assert_eq!(limiter.config().max_concurrent, 1);
        assert_eq!(limiter.config().quota, 1);
    }
}
