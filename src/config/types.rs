use crate::url::QueryPolicy;
use serde::Deserialize;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvester: HarvesterConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    pub output: OutputConfig,
    /// Pages to harvest, all on the same site
    #[serde(default)]
    pub seeds: Vec<String>,
}

/// Request pacing and retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarvesterConfig {
    /// Minimum time between any two requests (milliseconds)
    #[serde(rename = "min-interval-ms", default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Maximum number of requests outstanding at once
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Retries for 429, 503 and network errors
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay (milliseconds)
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on any backoff delay (milliseconds)
    #[serde(rename = "backoff-cap-ms", default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Fixed delay before the single retry of other 5xx responses (milliseconds)
    #[serde(
        rename = "server-error-retry-delay-ms",
        default = "default_server_error_retry_delay_ms"
    )]
    pub server_error_retry_delay_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest HTML page body accepted (bytes)
    #[serde(rename = "max-page-bytes", default = "default_max_page_bytes")]
    pub max_page_bytes: u64,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            server_error_retry_delay_ms: default_server_error_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_page_bytes: default_max_page_bytes(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the harvester
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the harvester
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the harvester
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for harvester-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// robots.txt handling
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsConfig {
    /// How long a fetched robots.txt stays valid (hours)
    #[serde(rename = "ttl-hours", default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Deny everything when robots.txt cannot be fetched or decoded
    #[serde(rename = "fail-closed", default)]
    pub fail_closed: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            fail_closed: false,
        }
    }
}

/// PDF discovery and download limits
#[derive(Debug, Clone, Deserialize)]
pub struct PdfConfig {
    /// Largest PDF accepted (bytes)
    #[serde(rename = "max-bytes", default = "default_max_pdf_bytes")]
    pub max_bytes: u64,

    /// How query strings take part in PDF URL deduplication
    #[serde(rename = "query-policy", default)]
    pub query_policy: QueryPolicy,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_pdf_bytes(),
            query_policy: QueryPolicy::default(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_min_interval_ms() -> u64 {
    3000
}

fn default_max_concurrent() -> u32 {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_server_error_retry_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_page_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_max_pdf_bytes() -> u64 {
    100 * 1024 * 1024
}
