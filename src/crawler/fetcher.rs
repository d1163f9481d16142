//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests, including:
//! - Building the HTTP client with a polite, contactable user agent
//! - Passing every attempt through the shared [`RateLimiter`]
//! - Status interpretation and retry with backoff, driven by [`RetryPolicy`]
//! - Following redirects one rate-limited hop at a time
//! - Bounding response bodies by target kind
//! - Reporting every attempt to an [`AuditSink`]

use crate::config::{Config, HarvesterConfig, UserAgentConfig};
use crate::crawler::limiter::RateLimiter;
use crate::robots::{PermissionGate, PolicyFetch, PolicySource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::{redirect::Policy, Client};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// robots.txt bodies beyond this size are not read
const MAX_POLICY_BYTES: u64 = 512 * 1024;

/// Redirect hops followed before giving up
const MAX_REDIRECTS: usize = 10;

/// What a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Page,
    Pdf,
    /// robots.txt
    Policy,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Page => "page",
            TargetKind::Pdf => "pdf",
            TargetKind::Policy => "robots",
        })
    }
}

/// A resource to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub url: Url,
    pub kind: TargetKind,
}

impl FetchTarget {
    pub fn page(url: Url) -> Self {
        Self {
            url,
            kind: TargetKind::Page,
        }
    }

    pub fn pdf(url: Url) -> Self {
        Self {
            url,
            kind: TargetKind::Pdf,
        }
    }

    pub fn policy(url: Url) -> Self {
        Self {
            url,
            kind: TargetKind::Policy,
        }
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: Url,
    /// URL after redirects
    pub final_url: Url,
    pub status_code: u16,
    pub body: Vec<u8>,
    /// Raw Content-Type header, if any
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl FetchResult {
    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Content-Type without parameters, lowercased
    pub fn mime_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Why a fetch failed after retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Timeout,
    ConnectionRefused,
    TooManyRequests,
    ServerError,
    ClientError,
    Malformed,
}

impl FetchErrorKind {
    /// Kinds worth retrying on a later run
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::Timeout | FetchErrorKind::TooManyRequests | FetchErrorKind::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::ConnectionRefused => "connection_refused",
            FetchErrorKind::TooManyRequests => "too_many_requests",
            FetchErrorKind::ServerError => "server_error",
            FetchErrorKind::ClientError => "client_error",
            FetchErrorKind::Malformed => "malformed",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed fetch
#[derive(Debug, Clone, Error)]
#[error("{kind} for {url} after {attempts} attempt(s): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    /// Last HTTP status seen, if any
    pub status: Option<u16>,
    pub attempts: u32,
    pub message: String,
    /// Set when the body was rejected for exceeding this many bytes
    pub size_limit: Option<u64>,
    /// Set when a redirect pointed at a location robots.txt disallows
    pub denied_redirect: Option<String>,
}

/// What a single attempt produced, as far as retrying is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Status {
        code: u16,
        retry_after: Option<Duration>,
    },
    Timeout,
    ConnectFailed,
    /// Connection dropped or body could not be read
    Transport,
    /// Response unusable (oversized, redirect loop)
    Malformed,
}

/// What to do after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Success,
    Retry(Duration),
    Fail(FetchErrorKind),
}

/// Retry and backoff rules
///
/// | Outcome | Action |
/// |---------|--------|
/// | 2xx | success |
/// | 429 | backoff, up to `max_retries`, then `TooManyRequests` |
/// | 503 | backoff, up to `max_retries`, then `ServerError` |
/// | other 5xx | one retry after `server_error_delay`, then `ServerError` |
/// | other 4xx | `ClientError`, no retry |
/// | timeout | backoff, up to `max_retries`, then `Timeout` |
/// | connect / transport | backoff, up to `max_retries`, then `ConnectionRefused` |
/// | malformed | `Malformed`, no retry |
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub server_error_delay: Duration,
    /// Fraction of the delay applied as random jitter in either direction
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            server_error_delay: Duration::from_secs(2),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            server_error_delay: Duration::from_millis(config.server_error_retry_delay_ms),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, jittered, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponential = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.backoff_cap);

        let spread = exponential.as_secs_f64() * self.jitter.clamp(0.0, 1.0);
        if spread <= 0.0 {
            return exponential;
        }

        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((exponential.as_secs_f64() + offset).max(0.0)).min(self.backoff_cap)
    }

    /// Decides how to proceed after an attempt
    ///
    /// # Arguments
    ///
    /// * `outcome` - What the attempt produced
    /// * `retries` - Retries already performed for this fetch
    pub fn decide(&self, outcome: &AttemptOutcome, retries: u32) -> RetryDecision {
        let can_retry = retries < self.max_retries;

        match *outcome {
            AttemptOutcome::Status { code, .. } if (200..300).contains(&code) => {
                RetryDecision::Success
            }
            AttemptOutcome::Status {
                code: code @ (429 | 503),
                retry_after,
            } => {
                if can_retry {
                    let delay = self.backoff(retries);
                    let delay = retry_after.map_or(delay, |ra| ra.max(delay).min(self.backoff_cap));
                    RetryDecision::Retry(delay)
                } else if code == 429 {
                    RetryDecision::Fail(FetchErrorKind::TooManyRequests)
                } else {
                    RetryDecision::Fail(FetchErrorKind::ServerError)
                }
            }
            AttemptOutcome::Status { code, .. } if code >= 500 => {
                if retries == 0 && self.max_retries > 0 {
                    RetryDecision::Retry(self.server_error_delay)
                } else {
                    RetryDecision::Fail(FetchErrorKind::ServerError)
                }
            }
            AttemptOutcome::Status { code, .. } if code >= 400 => {
                RetryDecision::Fail(FetchErrorKind::ClientError)
            }
            AttemptOutcome::Status { .. } | AttemptOutcome::Malformed => {
                RetryDecision::Fail(FetchErrorKind::Malformed)
            }
            AttemptOutcome::Timeout => {
                if can_retry {
                    RetryDecision::Retry(self.backoff(retries))
                } else {
                    RetryDecision::Fail(FetchErrorKind::Timeout)
                }
            }
            AttemptOutcome::ConnectFailed | AttemptOutcome::Transport => {
                if can_retry {
                    RetryDecision::Retry(self.backoff(retries))
                } else {
                    RetryDecision::Fail(FetchErrorKind::ConnectionRefused)
                }
            }
        }
    }
}

/// One request attempt, as reported to the audit sink
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub url: String,
    pub kind: TargetKind,
    /// 1-based attempt number
    pub attempt: u32,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub decision: RetryDecision,
}

/// Receives every fetch attempt
pub trait AuditSink: Send + Sync {
    fn record(&self, attempt: &FetchAttempt);
}

/// Logs attempts through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, attempt: &FetchAttempt) {
        let status = attempt
            .status
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        match attempt.decision {
            RetryDecision::Success => tracing::debug!(
                "GET {} [{}] #{} -> {} in {}ms",
                attempt.url,
                attempt.kind,
                attempt.attempt,
                status,
                attempt.elapsed_ms
            ),
            RetryDecision::Retry(delay) => tracing::warn!(
                "GET {} [{}] #{} -> {} {}; retrying in {:?}",
                attempt.url,
                attempt.kind,
                attempt.attempt,
                status,
                attempt.error.as_deref().unwrap_or_default(),
                delay
            ),
            RetryDecision::Fail(kind) => tracing::warn!(
                "GET {} [{}] #{} -> {} {}; giving up ({})",
                attempt.url,
                attempt.kind,
                attempt.attempt,
                status,
                attempt.error.as_deref().unwrap_or_default(),
                kind
            ),
        }
    }
}

/// Keeps attempts in memory
#[derive(Debug, Default)]
pub struct RecordingAudit {
    attempts: Mutex<Vec<FetchAttempt>>,
}

impl RecordingAudit {
    pub fn attempts(&self) -> Vec<FetchAttempt> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attempts made against one URL
    pub fn count_for(&self, url: &str) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.url == url)
            .count()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, attempt: &FetchAttempt) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(attempt.clone());
    }
}

/// Body size limits per target kind
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    pub page: u64,
    pub pdf: u64,
}

impl BodyLimits {
    fn for_kind(&self, kind: TargetKind) -> u64 {
        match kind {
            TargetKind::Page => self.page,
            TargetKind::Pdf => self.pdf,
            TargetKind::Policy => MAX_POLICY_BYTES,
        }
    }
}

/// Formats the User-Agent header
///
/// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Total time allowed for one request
///
/// # Example
///
/// ```no_run
/// use regdoc_harvester::config::UserAgentConfig;
/// use regdoc_harvester::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "RegdocHarvester".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: "https://example.org/about".to_string(),
///     contact_email: "research@example.org".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(config))
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Rate-limited HTTP GET with retries
pub struct HttpFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    limits: BodyLimits,
    timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl HttpFetcher {
    pub fn new(
        client: Client,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        limits: BodyLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            limits,
            timeout,
            audit: Arc::new(TracingAudit),
        }
    }

    /// Builds a fetcher from configuration, sharing `limiter`
    pub fn from_config(config: &Config, limiter: Arc<RateLimiter>) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.harvester.request_timeout_secs);
        let client = build_http_client(&config.user_agent, timeout)?;
        Ok(Self::new(
            client,
            limiter,
            RetryPolicy::from_config(&config.harvester),
            BodyLimits {
                page: config.harvester.max_page_bytes,
                pdf: config.pdf.max_bytes,
            },
            timeout,
        ))
    }

    /// Replaces the audit sink
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetches a target, retrying per the [`RetryPolicy`]
    ///
    /// Each attempt waits for its own rate limiter grant; backoff sleeps
    /// happen without holding a slot. Redirects are followed hop by hop, each
    /// hop under a fresh grant, without any permission check. Use
    /// [`fetch_permitted`](Self::fetch_permitted) for pages and PDFs.
    pub async fn fetch(&self, target: &FetchTarget) -> Result<FetchResult, FetchError> {
        self.fetch_following(target, None).await
    }

    /// Like [`fetch`](Self::fetch), but every redirect target must pass `gate`
    ///
    /// A redirect into a disallowed path is never requested; the error carries
    /// the refused location in `denied_redirect`.
    pub async fn fetch_permitted(
        &self,
        target: &FetchTarget,
        gate: &PermissionGate,
    ) -> Result<FetchResult, FetchError> {
        self.fetch_following(target, Some(gate)).await
    }

    async fn fetch_following(
        &self,
        target: &FetchTarget,
        gate: Option<&PermissionGate>,
    ) -> Result<FetchResult, FetchError> {
        let mut current = target.url.clone();
        let mut visited = HashSet::from([current.to_string()]);
        let mut attempts = 0u32;

        loop {
            let next = match self.fetch_hop(target, &current, &mut attempts).await? {
                Reply::Body(mut fetched) => {
                    fetched.url = target.url.clone();
                    fetched.final_url = current;
                    return Ok(fetched);
                }
                Reply::Redirect(next) => next,
            };

            let hop_error = |message: String| FetchError {
                kind: FetchErrorKind::Malformed,
                url: target.url.to_string(),
                status: None,
                attempts,
                message,
                size_limit: None,
                denied_redirect: None,
            };

            if visited.len() > MAX_REDIRECTS {
                return Err(hop_error(format!("more than {} redirects", MAX_REDIRECTS)));
            }
            if !visited.insert(next.to_string()) {
                return Err(hop_error(format!("redirect loop at {}", next)));
            }

            if let Some(gate) = gate {
                let decision = gate
                    .check(&next)
                    .await
                    .map_err(|e| hop_error(format!("redirect to {}: {}", next, e)))?;
                if !decision.allowed {
                    tracing::info!("Not following redirect from {} to {}", current, next);
                    return Err(FetchError {
                        kind: FetchErrorKind::ClientError,
                        message: format!("redirect to {} disallowed by robots.txt", next),
                        denied_redirect: Some(next.to_string()),
                        ..hop_error(String::new())
                    });
                }
                if let Some(delay) = decision.crawl_delay {
                    self.limiter.respect_crawl_delay(delay);
                }
            }

            tracing::debug!("Following redirect {} -> {}", current, next);
            current = next;
        }
    }

    /// Requests one URL until it answers, redirects or retries run out
    async fn fetch_hop(
        &self,
        target: &FetchTarget,
        url: &Url,
        attempts: &mut u32,
    ) -> Result<Reply, FetchError> {
        let mut retries = 0u32;

        loop {
            *attempts += 1;
            let permit = self.limiter.acquire().await.map_err(|e| FetchError {
                kind: FetchErrorKind::ConnectionRefused,
                url: url.to_string(),
                status: None,
                attempts: *attempts - 1,
                message: e.to_string(),
                size_limit: None,
                denied_redirect: None,
            })?;

            let started = Instant::now();
            let result = self.attempt(target.kind, url).await;
            drop(permit);
            let elapsed_ms = elapsed_ms(started);

            let (outcome, message, size_limit) = match result {
                Ok((status, mut reply)) => {
                    if let Reply::Body(fetched) = &mut reply {
                        fetched.elapsed_ms = elapsed_ms;
                    }
                    self.audit.record(&FetchAttempt {
                        url: url.to_string(),
                        kind: target.kind,
                        attempt: *attempts,
                        status: Some(status),
                        error: None,
                        elapsed_ms,
                        decision: RetryDecision::Success,
                    });
                    return Ok(reply);
                }
                Err(failure) => failure,
            };

            let status = match outcome {
                AttemptOutcome::Status { code, .. } => Some(code),
                _ => None,
            };
            let decision = self.retry.decide(&outcome, retries);

            self.audit.record(&FetchAttempt {
                url: url.to_string(),
                kind: target.kind,
                attempt: *attempts,
                status,
                error: Some(message.clone()),
                elapsed_ms,
                decision,
            });

            let fail = |kind| FetchError {
                kind,
                url: url.to_string(),
                status,
                attempts: *attempts,
                message: message.clone(),
                size_limit,
                denied_redirect: None,
            };

            match decision {
                RetryDecision::Retry(delay) => {
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                RetryDecision::Fail(kind) => return Err(fail(kind)),
                // Non-2xx responses never reach here
                RetryDecision::Success => return Err(fail(FetchErrorKind::Malformed)),
            }
        }
    }

    /// One GET; 3xx with a usable `Location` is a redirect, other non-2xx
    /// responses come back as failures
    async fn attempt(
        &self,
        kind: TargetKind,
        url: &Url,
    ) -> Result<(u16, Reply), (AttemptOutcome, String, Option<u64>)> {
        let timeout = match kind {
            TargetKind::Pdf => self.timeout * 2,
            _ => self.timeout,
        };

        let mut response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_redirection() {
            if let Some(next) = redirect_location(url, response.headers()) {
                return Ok((status.as_u16(), Reply::Redirect(next)));
            }
        }
        if !status.is_success() {
            return Err((
                AttemptOutcome::Status {
                    code: status.as_u16(),
                    retry_after: retry_after(response.headers()),
                },
                format!("HTTP {}", status),
                None,
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let limit = self.limits.for_kind(kind);
        let too_large = |size: u64| {
            (
                AttemptOutcome::Malformed,
                format!("body of {} bytes exceeds limit of {} bytes", size, limit),
                Some(limit),
            )
        };

        if let Some(length) = response.content_length() {
            if length > limit {
                return Err(too_large(length));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_transport)? {
            let size = (body.len() + chunk.len()) as u64;
            if size > limit {
                return Err(too_large(size));
            }
            body.extend_from_slice(&chunk);
        }

        Ok((
            status.as_u16(),
            Reply::Body(FetchResult {
                url: url.clone(),
                final_url: url.clone(),
                status_code: status.as_u16(),
                body,
                content_type,
                fetched_at: Utc::now(),
                elapsed_ms: 0,
            }),
        ))
    }
}

/// What one answered request produced
enum Reply {
    Body(FetchResult),
    Redirect(Url),
}

/// Resolves a redirect's `Location` against the URL that returned it
///
/// Only http(s) targets are followed; the fragment is dropped.
fn redirect_location(base: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let mut next = base.join(location.trim()).ok()?;
    if !matches!(next.scheme(), "http" | "https") {
        return None;
    }
    next.set_fragment(None);
    Some(next)
}

#[async_trait]
impl PolicySource for HttpFetcher {
    async fn fetch_policy(&self, robots_url: &Url) -> PolicyFetch {
        match self.fetch(&FetchTarget::policy(robots_url.clone())).await {
            Ok(result) => PolicyFetch::Body(result.body),
            Err(err) if err.kind == FetchErrorKind::ClientError => {
                PolicyFetch::Absent(err.status.unwrap_or(404))
            }
            Err(err) => PolicyFetch::Unavailable(err.to_string()),
        }
    }
}

fn classify_transport(e: reqwest::Error) -> (AttemptOutcome, String, Option<u64>) {
    let outcome = if e.is_timeout() {
        AttemptOutcome::Timeout
    } else if e.is_connect() {
        AttemptOutcome::ConnectFailed
    } else if e.is_redirect() {
        AttemptOutcome::Malformed
    } else {
        AttemptOutcome::Transport
    };
    (outcome, e.to_string(), None)
}

/// Parses `Retry-After` given in seconds; HTTP-date values are ignored
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
