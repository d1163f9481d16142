//! Crawl permission gate
//!
//! The gate owns the per-site robots.txt cache. Each site's policy is fetched
//! at most once per TTL; concurrent checks against a site whose policy is
//! still being fetched wait on that same fetch.

use crate::robots::{CachedPolicy, Clock, ParsedRobots, PolicyOrigin, SystemClock};
use crate::url::{robots_url, site_key};
use crate::{UrlError, UrlResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use url::Url;

/// Outcome of fetching a robots.txt resource
#[derive(Debug, Clone)]
pub enum PolicyFetch {
    /// 2xx with a body
    Body(Vec<u8>),
    /// 4xx: the site publishes no policy
    Absent(u16),
    /// 5xx, network failure or timeout
    Unavailable(String),
}

/// Where robots.txt bodies come from
///
/// The production source goes through the rate-limited HTTP fetcher; tests
/// plug in counting fakes.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch_policy(&self, robots_url: &Url) -> PolicyFetch;
}

/// Result of a permission check for one URL
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionDecision {
    /// Site the decision applies to (host, plus port when explicit)
    pub domain: String,
    pub path: String,
    pub allowed: bool,
    /// Set when robots.txt could not be obtained and the configured default applied
    pub degraded: bool,
    /// When the governing policy was fetched
    pub checked_at: DateTime<Utc>,
    pub ttl: Duration,
    pub crawl_delay: Option<std::time::Duration>,
}

impl PermissionDecision {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.checked_at + self.ttl
    }
}

/// Per-site robots.txt gate
pub struct PermissionGate {
    source: Arc<dyn PolicySource>,
    user_agent: String,
    ttl: Duration,
    fail_closed: bool,
    clock: Arc<dyn Clock>,
    policies: Mutex<HashMap<String, Arc<OnceCell<CachedPolicy>>>>,
}

impl PermissionGate {
    /// Creates a gate
    ///
    /// # Arguments
    ///
    /// * `source` - Where robots.txt is fetched from
    /// * `user_agent` - Product token matched against `User-agent` groups
    /// * `ttl` - How long a fetched policy stays valid
    /// * `fail_closed` - Deny instead of allow when robots.txt is unavailable
    pub fn new(
        source: Arc<dyn PolicySource>,
        user_agent: impl Into<String>,
        ttl: Duration,
        fail_closed: bool,
    ) -> Self {
        Self {
            source,
            user_agent: user_agent.into(),
            ttl,
            fail_closed,
            clock: Arc::new(SystemClock),
            policies: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the clock used for TTL expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decides whether `url` may be fetched
    ///
    /// Never fails on robots.txt problems; those produce a degraded decision.
    /// Fails only when the URL has no host.
    pub async fn check(&self, url: &Url) -> UrlResult<PermissionDecision> {
        let key = site_key(url).ok_or(UrlError::MissingDomain)?;
        let location = robots_url(url).ok_or(UrlError::MissingDomain)?;

        let cell = self.policy_cell(&key);
        let policy = cell.get_or_init(|| self.load_policy(&location)).await;

        let allowed = match policy.origin {
            PolicyOrigin::Unavailable => !self.fail_closed,
            PolicyOrigin::Absent | PolicyOrigin::Fetched => {
                policy.robots.is_allowed(url.as_str(), &self.user_agent)
            }
        };

        if !allowed {
            tracing::info!("URL {} disallowed for {}", url, self.user_agent);
        }

        Ok(PermissionDecision {
            domain: key,
            path: url.path().to_string(),
            allowed,
            degraded: policy.is_degraded(),
            checked_at: policy.fetched_at,
            ttl: policy.ttl,
            crawl_delay: policy.robots.crawl_delay(&self.user_agent),
        })
    }

    /// Returns the cell holding the site's policy, replacing an expired one
    ///
    /// A cell whose fetch is still in flight is never replaced, so concurrent
    /// callers share one fetch.
    fn policy_cell(&self, key: &str) -> Arc<OnceCell<CachedPolicy>> {
        let now = self.clock.now();
        let mut policies = self.policies.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cell) = policies.get(key) {
            let fresh = cell.get().map_or(true, |policy| !policy.is_stale(now));
            if fresh {
                return Arc::clone(cell);
            }
            tracing::debug!("robots.txt for {} expired, refetching", key);
        }

        let cell = Arc::new(OnceCell::new());
        policies.insert(key.to_string(), Arc::clone(&cell));
        cell
    }

    async fn load_policy(&self, location: &Url) -> CachedPolicy {
        tracing::debug!("Fetching robots.txt: {}", location);
        let fetched = self.source.fetch_policy(location).await;
        let fetched_at = self.clock.now();

        let (robots, origin) = match fetched {
            PolicyFetch::Body(body) => match ParsedRobots::from_bytes(&body) {
                Some(robots) => (robots, PolicyOrigin::Fetched),
                None => {
                    tracing::warn!("robots.txt at {} is not valid UTF-8", location);
                    (ParsedRobots::allow_all(), PolicyOrigin::Unavailable)
                }
            },
            PolicyFetch::Absent(status) => {
                tracing::debug!("No robots.txt at {} (HTTP {})", location, status);
                (ParsedRobots::allow_all(), PolicyOrigin::Absent)
            }
            PolicyFetch::Unavailable(reason) => {
                tracing::warn!(
                    "robots.txt at {} unavailable ({}); {}",
                    location,
                    reason,
                    if self.fail_closed {
                        "denying all paths"
                    } else {
                        "allowing all paths"
                    }
                );
                (ParsedRobots::allow_all(), PolicyOrigin::Unavailable)
            }
        };

        CachedPolicy::new(robots, origin, fetched_at, self.ttl)
    }
}
