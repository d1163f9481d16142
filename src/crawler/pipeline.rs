//! Page job orchestration
//!
//! A page job takes one seed through the permission gate, fetches it,
//! extracts its text, discovers PDF links, downloads them concurrently and
//! finally persists the page record. Progress is tracked with [`JobState`];
//! every resource touched ends up as one [`ResourceOutcome`] in the
//! [`PageJobReport`].

use crate::config::Config;
use crate::crawler::analyzer::{ContentAnalyzer, Metadata, NullAnalyzer};
use crate::crawler::downloader::{DownloadError, PdfDownload, PdfDownloader};
use crate::crawler::fetcher::{FetchResult, FetchTarget, HttpFetcher};
use crate::crawler::limiter::RateLimiter;
use crate::crawler::parser::{discover_pdfs, extract_page_content, PageContent, PdfCandidate};
use crate::robots::{PermissionGate, PolicySource};
use crate::state::{FailureReason, JobState};
use crate::storage::{
    content_fingerprint, DocumentKind, DocumentStore, JobRecord, NewDocument, StorageError,
    StoredDocument,
};
use crate::url::{normalize_url, QueryPolicy};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a single resource ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
    Stored { id: String, version: u32 },
    Unchanged { id: String },
    /// Not fetched because permission was refused
    Skipped { reason: String },
    Cancelled,
    Failed { reason: String },
}

/// Outcome for one page or PDF
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceOutcome {
    pub url: String,
    pub kind: DocumentKind,
    /// Permission came from a fail-open decision
    pub degraded: bool,
    #[serde(flatten)]
    pub status: ResourceStatus,
}

impl ResourceOutcome {
    fn page(url: &str, degraded: bool, status: ResourceStatus) -> Self {
        Self {
            url: url.to_string(),
            kind: DocumentKind::Page,
            degraded,
            status,
        }
    }

    /// `None` means the download was cancelled before it finished
    fn pdf(candidate: &PdfCandidate, result: Option<Result<PdfDownload, DownloadError>>) -> Self {
        let url = candidate.absolute_url.to_string();
        let (degraded, status) = match result {
            None => (false, ResourceStatus::Cancelled),
            Some(Ok(download)) if download.unchanged => (
                download.degraded,
                ResourceStatus::Unchanged {
                    id: download.document.id,
                },
            ),
            Some(Ok(download)) => (
                download.degraded,
                ResourceStatus::Stored {
                    id: download.document.id,
                    version: download.document.version,
                },
            ),
            Some(Err(e @ DownloadError::PermissionDenied { .. })) => {
                tracing::info!("{}", e);
                (false, ResourceStatus::Skipped { reason: e.reason() })
            }
            Some(Err(e)) => {
                tracing::warn!("PDF {} failed: {}", url, e);
                (false, ResourceStatus::Failed { reason: e.reason() })
            }
        };

        Self {
            url,
            kind: DocumentKind::Pdf,
            degraded,
            status,
        }
    }
}

/// Result of one page job
#[derive(Debug, Clone)]
pub struct PageJobReport {
    pub seed: String,
    pub state: JobState,
    /// Every state the job passed through, starting with `Pending`
    pub transitions: Vec<JobState>,
    pub outcomes: Vec<ResourceOutcome>,
    /// The persisted page record, once the job reaches `Persisted`
    pub page: Option<StoredDocument>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PageJobReport {
    fn new(seed: &str) -> Self {
        Self {
            seed: seed.to_string(),
            state: JobState::Pending,
            transitions: vec![JobState::Pending],
            outcomes: Vec::new(),
            page: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn advance(&mut self, next: JobState) -> Result<(), HarvestError> {
        self.state.advance(next)?;
        self.transitions.push(next);
        Ok(())
    }

    fn fail(&mut self, reason: FailureReason) {
        let next = JobState::Failed(reason);
        if self.state.advance(next).is_ok() {
            self.transitions.push(next);
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    fn count(&self, pred: impl Fn(&ResourceStatus) -> bool) -> u32 {
        self.outcomes.iter().filter(|o| pred(&o.status)).count() as u32
    }

    pub fn stored(&self) -> u32 {
        self.count(|s| matches!(s, ResourceStatus::Stored { .. }))
    }

    pub fn unchanged(&self) -> u32 {
        self.count(|s| matches!(s, ResourceStatus::Unchanged { .. }))
    }

    pub fn skipped(&self) -> u32 {
        self.count(|s| matches!(s, ResourceStatus::Skipped { .. }))
    }

    pub fn cancelled(&self) -> u32 {
        self.count(|s| matches!(s, ResourceStatus::Cancelled))
    }

    pub fn failed(&self) -> u32 {
        self.count(|s| matches!(s, ResourceStatus::Failed { .. }))
    }

    /// Outcomes of the given kind
    pub fn outcomes_of(&self, kind: DocumentKind) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes.iter().filter(move |o| o.kind == kind)
    }

    fn to_job_record(&self, config_hash: Option<String>) -> Result<JobRecord, StorageError> {
        Ok(JobRecord {
            seed_url: self.seed.clone(),
            state: self.state.to_db_string(),
            config_hash,
            started_at: self.started_at,
            finished_at: self.finished_at.unwrap_or_else(Utc::now),
            stored: self.stored(),
            unchanged: self.unchanged(),
            failed: self.failed(),
            cancelled: self.cancelled(),
            outcomes: serde_json::to_string(&self.outcomes)?,
        })
    }
}

/// Drives page jobs through gate, fetcher, downloader and store
pub struct ScrapePipeline {
    gate: Arc<PermissionGate>,
    fetcher: Arc<HttpFetcher>,
    downloader: PdfDownloader,
    store: Arc<dyn DocumentStore>,
    analyzer: Arc<dyn ContentAnalyzer>,
    query_policy: QueryPolicy,
    max_concurrent: usize,
    config_hash: Option<String>,
}

impl ScrapePipeline {
    /// Creates a pipeline from shared components
    ///
    /// PDF downloads per page run at most as concurrently as the fetcher's
    /// rate limiter allows.
    pub fn new(
        gate: Arc<PermissionGate>,
        fetcher: Arc<HttpFetcher>,
        store: Arc<dyn DocumentStore>,
        max_pdf_bytes: u64,
    ) -> Self {
        let downloader = PdfDownloader::new(
            Arc::clone(&gate),
            Arc::clone(&fetcher),
            Arc::clone(&store),
            max_pdf_bytes,
        );
        let max_concurrent = fetcher.limiter().max_concurrent().max(1);

        Self {
            gate,
            fetcher,
            downloader,
            store,
            analyzer: Arc::new(NullAnalyzer),
            query_policy: QueryPolicy::default(),
            max_concurrent,
            config_hash: None,
        }
    }

    /// Wires a pipeline from configuration around an opened store
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `store` - The document store every job writes to
    ///
    /// # Returns
    ///
    /// * `Ok(ScrapePipeline)` - Ready to run
    /// * `Err(HarvestError)` - The HTTP client could not be built
    pub fn from_config(config: &Config, store: Arc<dyn DocumentStore>) -> Result<Self, HarvestError> {
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_millis(config.harvester.min_interval_ms),
            config.harvester.max_concurrent as usize,
        ));
        let fetcher = Arc::new(HttpFetcher::from_config(config, limiter)?);
        let source: Arc<dyn PolicySource> = fetcher.clone();
        let gate = Arc::new(PermissionGate::new(
            source,
            config.user_agent.crawler_name.clone(),
            chrono::Duration::hours(config.permissions.ttl_hours as i64),
            config.permissions.fail_closed,
        ));

        Ok(Self::new(gate, fetcher, store, config.pdf.max_bytes)
            .with_query_policy(config.pdf.query_policy))
    }

    /// Sets how PDF link query strings are treated
    pub fn with_query_policy(mut self, policy: QueryPolicy) -> Self {
        self.query_policy = policy;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ContentAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Tags job records with the configuration they ran under
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    pub fn fetcher(&self) -> &Arc<HttpFetcher> {
        &self.fetcher
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Runs one job per seed, in order
    ///
    /// Per-resource failures are recorded in each report. Only a storage
    /// failure stops the run.
    pub async fn run(
        &self,
        seeds: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<PageJobReport>, HarvestError> {
        let mut reports = Vec::with_capacity(seeds.len());
        for seed in seeds {
            reports.push(self.run_page(seed, cancel).await?);
        }
        Ok(reports)
    }

    /// Runs the job for a single seed
    ///
    /// Cancellation before the page is fetched ends the job `Failed(Cancelled)`
    /// with nothing persisted. Once the page is fetched, unfinished PDFs are
    /// reported cancelled and the page record is still written.
    pub async fn run_page(
        &self,
        seed: &str,
        cancel: &CancellationToken,
    ) -> Result<PageJobReport, HarvestError> {
        let mut report = PageJobReport::new(seed);
        tracing::info!("Processing seed: {}", seed);

        let url = match normalize_url(seed, QueryPolicy::Preserve) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Skipping invalid seed {}: {}", seed, e);
                report.fail(FailureReason::InvalidUrl);
                return self.finish(report);
            }
        };

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            decision = self.gate.check(&url) => Some(decision),
        };
        let decision = match decision {
            None => {
                report.fail(FailureReason::Cancelled);
                return self.finish(report);
            }
            Some(Err(e)) => {
                tracing::warn!("Cannot check permission for {}: {}", url, e);
                report.fail(FailureReason::InvalidUrl);
                return self.finish(report);
            }
            Some(Ok(decision)) => decision,
        };

        if !decision.allowed {
            report.outcomes.push(ResourceOutcome::page(
                url.as_str(),
                decision.degraded,
                ResourceStatus::Skipped {
                    reason: FailureReason::PermissionDenied.to_db_string(),
                },
            ));
            report.fail(FailureReason::PermissionDenied);
            return self.finish(report);
        }
        report.advance(JobState::PermissionChecked)?;

        if let Some(delay) = decision.crawl_delay {
            self.fetcher.limiter().respect_crawl_delay(delay);
        }

        let page_target = FetchTarget::page(url.clone());
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.fetcher.fetch_permitted(&page_target, &self.gate) => Some(result),
        };
        let fetched = match fetched {
            None => {
                report.fail(FailureReason::Cancelled);
                return self.finish(report);
            }
            Some(Err(e)) if e.denied_redirect.is_some() => {
                report.outcomes.push(ResourceOutcome::page(
                    url.as_str(),
                    decision.degraded,
                    ResourceStatus::Skipped {
                        reason: FailureReason::PermissionDenied.to_db_string(),
                    },
                ));
                report.fail(FailureReason::PermissionDenied);
                return self.finish(report);
            }
            Some(Err(e)) => {
                tracing::warn!("Failed to fetch page {}: {}", url, e);
                report.outcomes.push(ResourceOutcome::page(
                    url.as_str(),
                    decision.degraded,
                    ResourceStatus::Failed {
                        reason: format!("fetch:{}", e.kind),
                    },
                ));
                report.fail(FailureReason::Fetch(e.kind));
                return self.finish(report);
            }
            Some(Ok(fetched)) => fetched,
        };
        report.advance(JobState::PageFetched)?;

        let content = extract_page_content(&fetched.text());
        let analysis = self.analyzer.analyze(&content.text, url.as_str());
        report.advance(JobState::ContentExtracted)?;

        let candidates = discover_pdfs(&fetched, self.query_policy);
        tracing::info!("Found {} PDF link(s) on {}", candidates.len(), url);
        report.advance(JobState::PdfsDiscovered)?;

        let pdf_outcomes = self.download_all(&candidates, cancel).await;
        report.advance(JobState::PdfsDownloaded)?;

        let record = NewDocument {
            url: url.to_string(),
            kind: DocumentKind::Page,
            metadata: page_metadata(&content, &fetched, candidates.len(), analysis),
            content_fingerprint: content_fingerprint(&fetched.body),
            fetched_at: fetched.fetched_at,
        };
        let page = match self.store.upsert(record, None) {
            Ok(page) => page,
            Err(e) => {
                tracing::error!("Failed to persist page {}: {}", url, e);
                report.outcomes.push(ResourceOutcome::page(
                    url.as_str(),
                    decision.degraded,
                    ResourceStatus::Failed {
                        reason: FailureReason::Storage.to_db_string(),
                    },
                ));
                report.outcomes.extend(pdf_outcomes);
                report.fail(FailureReason::Storage);
                report.finished_at = Some(Utc::now());
                return Err(e.into());
            }
        };

        report.outcomes.push(ResourceOutcome::page(
            url.as_str(),
            decision.degraded,
            ResourceStatus::Stored {
                id: page.id.clone(),
                version: page.version,
            },
        ));
        report.outcomes.extend(pdf_outcomes);
        report.page = Some(page);
        report.advance(JobState::Persisted)?;
        report.advance(JobState::Done)?;

        self.finish(report)
    }

    /// Downloads every candidate, at most `max_concurrent` at a time
    ///
    /// Outcomes come back in candidate order.
    async fn download_all(
        &self,
        candidates: &[PdfCandidate],
        cancel: &CancellationToken,
    ) -> Vec<ResourceOutcome> {
        stream::iter(candidates)
            .map(|candidate| async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.downloader.download(candidate) => Some(result),
                };
                ResourceOutcome::pdf(candidate, result)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    fn finish(&self, mut report: PageJobReport) -> Result<PageJobReport, HarvestError> {
        report.finished_at = Some(Utc::now());
        self.store
            .record_job(&report.to_job_record(self.config_hash.clone())?)?;

        tracing::info!(
            "Job for {} ended {}: {} stored, {} unchanged, {} skipped, {} failed, {} cancelled",
            report.seed,
            report.state,
            report.stored(),
            report.unchanged(),
            report.skipped(),
            report.failed(),
            report.cancelled()
        );

        Ok(report)
    }
}

/// Page record metadata; analyzer keys never override the fixed fields
fn page_metadata(
    content: &PageContent,
    fetched: &FetchResult,
    pdf_links: usize,
    analysis: Metadata,
) -> Metadata {
    let mut metadata = analysis;
    if let Some(title) = &content.title {
        metadata.insert("title".into(), title.as_str().into());
    }
    metadata.insert("text_length".into(), content.text.chars().count().into());
    metadata.insert("status_code".into(), i64::from(fetched.status_code).into());
    if let Some(content_type) = &fetched.content_type {
        metadata.insert("content_type".into(), content_type.as_str().into());
    }
    if fetched.final_url != fetched.url {
        metadata.insert("final_url".into(), fetched.final_url.as_str().into());
    }
    metadata.insert("pdf_links".into(), pdf_links.into());
    metadata
}
