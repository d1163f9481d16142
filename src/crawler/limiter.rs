//! Process-wide request pacing
//!
//! Every network request, including robots.txt, passes through one
//! [`RateLimiter`]. A grant requires both:
//! - at least the minimum interval since the previous grant
//! - a free concurrency slot
//!
//! Waiters are served in arrival order. The slot is held by the returned
//! [`RatePermit`] and released when it is dropped, whether the request
//! finished, failed, panicked or was cancelled. Requests run under the client
//! timeout, so a slot is never held longer than one request timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Upper bound on the interval a robots.txt `Crawl-delay` can impose
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Returned when the limiter has been closed and grants no more permits
#[derive(Debug, Error)]
#[error("rate limiter closed")]
pub struct LimiterClosed;

/// A granted request slot
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
    granted_at: Instant,
}

impl RatePermit {
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

/// Minimum spacing plus bounded concurrency, FIFO
#[derive(Debug)]
pub struct RateLimiter {
    slots: Arc<Semaphore>,
    /// Time of the previous grant; the lock doubles as the arrival queue
    last_grant: Mutex<Option<Instant>>,
    configured_interval: Duration,
    interval_ms: AtomicU64,
    max_concurrent: usize,
}

impl RateLimiter {
    /// Creates a limiter
    ///
    /// # Arguments
    ///
    /// * `min_interval` - Minimum time between two grants
    /// * `max_concurrent` - Maximum permits outstanding at once (at least 1)
    pub fn new(min_interval: Duration, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            last_grant: Mutex::new(None),
            configured_interval: min_interval,
            interval_ms: AtomicU64::new(duration_to_ms(min_interval)),
            max_concurrent,
        }
    }

    /// Waits for a request slot
    ///
    /// Returns once a slot is free and the minimum interval since the
    /// previous grant has passed.
    pub async fn acquire(&self) -> Result<RatePermit, LimiterClosed> {
        // Tokio's mutex queues waiters fairly, which gives FIFO grants
        let mut last_grant = self.last_grant.lock().await;

        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;

        if let Some(previous) = *last_grant {
            tokio::time::sleep_until(previous + self.min_interval()).await;
        }

        let granted_at = Instant::now();
        *last_grant = Some(granted_at);

        Ok(RatePermit {
            _permit: permit,
            granted_at,
        })
    }

    /// Raises the interval to honour a robots.txt `Crawl-delay`
    ///
    /// The interval never drops below the configured minimum, and the delay
    /// is capped at [`MAX_CRAWL_DELAY`].
    pub fn respect_crawl_delay(&self, delay: Duration) {
        if delay > MAX_CRAWL_DELAY {
            tracing::warn!(
                "Crawl-delay of {:?} capped at {:?}",
                delay,
                MAX_CRAWL_DELAY
            );
        }
        let delay = delay.min(MAX_CRAWL_DELAY);
        let previous = self
            .interval_ms
            .fetch_max(duration_to_ms(delay), Ordering::SeqCst);
        if duration_to_ms(delay) > previous {
            tracing::info!(
                "Crawl-delay raises request interval from {}ms to {}ms",
                previous,
                duration_to_ms(delay)
            );
        }
    }

    /// Current minimum interval between grants
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    pub fn configured_interval(&self) -> Duration {
        self.configured_interval
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of permits currently held
    pub fn outstanding(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Stops granting permits; pending and future `acquire` calls fail
    pub fn close(&self) {
        self.slots.close();
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[tokio::test(start_paused = true)]
    async fn test_grants_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(1000), 4);
        let mut grants = Vec::new();

        for _ in 0..5 {
            let permit = limiter.acquire().await.unwrap();
            grants.push(permit.granted_at());
        }

        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_grant_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5), 1);
        let start = Instant::now();
        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.granted_at(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_and_spaced_under_load() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(200), 2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let grants = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let grants = Arc::clone(&grants);
            handles.push(tokio::spawn(async move {
                let permit = limiter.acquire().await.unwrap();
                grants.lock().unwrap().push(permit.granted_at());
                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_active, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.outstanding(), 0);

        let mut grants = grants.lock().unwrap().clone();
        grants.sort();
        assert_eq!(grants.len(), 8);
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_follow_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100), 1));
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
            // Let the task reach the queue before the next one arrives
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_released_on_drop() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 1);
        let permit = limiter.acquire().await.unwrap();
        assert_eq!(limiter.outstanding(), 1);
        drop(permit);
        assert_eq!(limiter.outstanding(), 0);
        let _again = limiter.acquire().await.unwrap();
    }

    #[test]
    fn test_crawl_delay_only_raises_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(3000), 2);
        limiter.respect_crawl_delay(Duration::from_secs(1));
        assert_eq!(limiter.min_interval(), Duration::from_millis(3000));
        limiter.respect_crawl_delay(Duration::from_secs(10));
        assert_eq!(limiter.min_interval(), Duration::from_secs(10));
        assert_eq!(limiter.configured_interval(), Duration::from_millis(3000));
    }

    #[test]
    fn test_crawl_delay_capped() {
        let limiter = RateLimiter::new(Duration::from_millis(500), 1);
        limiter.respect_crawl_delay(Duration::from_secs(86_400));
        assert_eq!(limiter.min_interval(), MAX_CRAWL_DELAY);
    }

    #[tokio::test]
    async fn test_closed_limiter_refuses() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 1);
        limiter.close();
        assert!(limiter.acquire().await.is_err());
    }
}
