//! Shared wiring for integration tests
//!
//! Components are built by hand with millisecond pacing and backoff so the
//! tests run against a local wiremock server in real time.

#![allow(dead_code)]

use regdoc_harvester::config::UserAgentConfig;
use regdoc_harvester::crawler::{
    build_http_client, BodyLimits, HttpFetcher, RateLimiter, RecordingAudit, RetryPolicy,
    ScrapePipeline,
};
use regdoc_harvester::robots::{PermissionGate, PolicySource};
use regdoc_harvester::storage::{DocumentStore, SqliteDocumentStore};
use regdoc_harvester::QueryPolicy;
use std::sync::Arc;
use std::time::Duration;

pub const AGENT: &str = "TestBot";

pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

pub fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: AGENT.to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

pub fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: Duration::from_millis(5),
        backoff_cap: Duration::from_millis(20),
        server_error_delay: Duration::from_millis(5),
        jitter: 0.0,
    }
}

pub fn fetcher(max_retries: u32, limits: BodyLimits) -> (Arc<HttpFetcher>, Arc<RecordingAudit>) {
    let timeout = Duration::from_secs(5);
    let client = build_http_client(&user_agent(), timeout).unwrap();
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(10), 2));
    let audit = Arc::new(RecordingAudit::default());
    let fetcher = HttpFetcher::new(client, limiter, fast_retries(max_retries), limits, timeout)
        .with_audit(audit.clone());
    (Arc::new(fetcher), audit)
}

pub fn default_limits() -> BodyLimits {
    BodyLimits {
        page: 1024 * 1024,
        pdf: 1024 * 1024,
    }
}

pub fn gate(fetcher: &Arc<HttpFetcher>, fail_closed: bool) -> Arc<PermissionGate> {
    let source: Arc<dyn PolicySource> = fetcher.clone();
    Arc::new(PermissionGate::new(
        source,
        AGENT,
        chrono::Duration::hours(24),
        fail_closed,
    ))
}

/// A pipeline over an in-memory store
pub struct Harness {
    pub pipeline: ScrapePipeline,
    pub store: Arc<SqliteDocumentStore>,
    pub audit: Arc<RecordingAudit>,
}

impl Harness {
    pub fn new(policy: QueryPolicy) -> Self {
        Self::with_store(policy, Arc::new(SqliteDocumentStore::open_in_memory().unwrap()))
    }

    pub fn with_store(policy: QueryPolicy, store: Arc<SqliteDocumentStore>) -> Self {
        let (fetcher, audit) = fetcher(3, default_limits());
        let gate = gate(&fetcher, false);
        let shared: Arc<dyn DocumentStore> = store.clone();
        let pipeline =
            ScrapePipeline::new(gate, fetcher, shared, 1024 * 1024).with_query_policy(policy);

        Self {
            pipeline,
            store,
            audit,
        }
    }
}
