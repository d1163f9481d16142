//! Crawler module for fetching pages and harvesting their PDFs
//!
//! This module contains the core harvesting logic, including:
//! - Request pacing shared by every outgoing request
//! - HTTP fetching with retry logic
//! - Page text extraction and PDF link discovery
//! - PDF download, validation and persistence
//! - Page job orchestration

mod analyzer;
mod downloader;
mod fetcher;
mod limiter;
mod parser;
mod pipeline;

pub use analyzer::{ContentAnalyzer, Metadata, MetadataValue, NullAnalyzer};
pub use downloader::{DownloadError, PdfDownload, PdfDownloader};
pub use fetcher::{
    build_http_client, user_agent_string, AttemptOutcome, AuditSink, BodyLimits, FetchAttempt,
    FetchError, FetchErrorKind, FetchResult, FetchTarget, HttpFetcher, RecordingAudit,
    RetryDecision, RetryPolicy, TargetKind, TracingAudit,
};
pub use limiter::{LimiterClosed, RateLimiter, RatePermit};
pub use parser::{discover_pdfs, extract_page_content, PageContent, PdfCandidate};
pub use pipeline::{PageJobReport, ResourceOutcome, ResourceStatus, ScrapePipeline};

