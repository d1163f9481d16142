//! Robots.txt caching implementation
//!
//! A cached policy remembers where it came from and when, and expires after a
//! configurable TTL measured on an injectable [`Clock`].

use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of the current time for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How a cached policy was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOrigin {
    /// robots.txt was fetched and decoded
    Fetched,
    /// The server answered 4xx: no policy exists, everything is allowed
    Absent,
    /// robots.txt could not be fetched or decoded
    Unavailable,
}

/// Cached robots.txt data for a site
#[derive(Debug, Clone)]
pub struct CachedPolicy {
    pub robots: ParsedRobots,
    pub origin: PolicyOrigin,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedPolicy {
    pub fn new(
        robots: ParsedRobots,
        origin: PolicyOrigin,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            robots,
            origin,
            fetched_at,
            ttl,
        }
    }

    /// True once `ttl` has elapsed since the policy was fetched
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at >= self.ttl
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at + self.ttl
    }

    /// A policy built without a usable robots.txt
    pub fn is_degraded(&self) -> bool {
        self.origin == PolicyOrigin::Unavailable
    }
}
