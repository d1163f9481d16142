//! regdoc-harvester: a polite fetch-and-persist pipeline for regulatory documents
//!
//! This crate retrieves public HTML pages and the PDFs they link to from a
//! single site, respecting robots.txt, request pacing and bounded concurrency,
//! and persists pages and PDFs to a SQLite document store with content-addressed
//! attachments.

pub mod config;
pub mod crawler;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: state::JobState,
        to: state::JobState,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{HttpFetcher, PdfDownloader, RateLimiter, ScrapePipeline};
pub use robots::PermissionGate;
pub use state::{FailureReason, JobState};
pub use storage::{DocumentStore, SqliteDocumentStore};
pub use url::{extract_domain, normalize_url, QueryPolicy};
