//! PDF download and persistence
//!
//! Each candidate goes through the permission gate, is fetched as a PDF
//! target, validated, fingerprinted and upserted together with its bytes.
//! Nothing is written for a candidate that fails any step.

use crate::crawler::fetcher::{FetchError, FetchResult, FetchTarget, HttpFetcher};
use crate::crawler::parser::PdfCandidate;
use crate::crawler::Metadata;
use crate::robots::PermissionGate;
use crate::storage::{
    content_fingerprint, document_id, DocumentKind, DocumentStore, NewDocument, StorageError,
    StoredDocument,
};
use crate::url::filename_from_url;
use crate::UrlError;
use std::sync::Arc;
use thiserror::Error;

const PDF_MAGIC: &[u8] = b"%PDF";

const PDF_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/x-pdf",
    "application/acrobat",
    "applications/vnd.pdf",
    "text/pdf",
    "text/x-pdf",
];

/// Why a PDF candidate was not stored
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("PDF disallowed by robots.txt: {url}")]
    PermissionDenied { url: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Not a PDF: {0}")]
    InvalidContent(String),

    #[error("PDF exceeds limit of {limit} bytes")]
    SizeExceeded { limit: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid PDF URL: {0}")]
    InvalidUrl(#[from] UrlError),
}

impl DownloadError {
    /// Short machine-readable label used in job summaries
    pub fn reason(&self) -> String {
        match self {
            DownloadError::PermissionDenied { .. } => "permission_denied".to_string(),
            DownloadError::Fetch(e) => format!("fetch:{}", e.kind),
            DownloadError::InvalidContent(_) => "invalid_content".to_string(),
            DownloadError::SizeExceeded { .. } => "size_exceeded".to_string(),
            DownloadError::Storage(_) => "storage".to_string(),
            DownloadError::InvalidUrl(_) => "invalid_url".to_string(),
        }
    }
}

/// A successfully resolved candidate
#[derive(Debug, Clone)]
pub struct PdfDownload {
    pub document: StoredDocument,
    /// The stored record already carried identical content; nothing written
    pub unchanged: bool,
    /// Permission came from a fail-open decision
    pub degraded: bool,
}

/// Fetches, validates and stores PDFs
pub struct PdfDownloader {
    gate: Arc<PermissionGate>,
    fetcher: Arc<HttpFetcher>,
    store: Arc<dyn DocumentStore>,
    max_bytes: u64,
}

impl PdfDownloader {
    pub fn new(
        gate: Arc<PermissionGate>,
        fetcher: Arc<HttpFetcher>,
        store: Arc<dyn DocumentStore>,
        max_bytes: u64,
    ) -> Self {
        Self {
            gate,
            fetcher,
            store,
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Downloads and persists one candidate
    ///
    /// # Arguments
    ///
    /// * `candidate` - A PDF link discovered on a page
    ///
    /// # Returns
    ///
    /// * `Ok(PdfDownload)` - Stored, or left untouched when unchanged
    /// * `Err(DownloadError)` - Denied, unreachable, invalid, oversized or unstorable
    pub async fn download(&self, candidate: &PdfCandidate) -> Result<PdfDownload, DownloadError> {
        let url = &candidate.absolute_url;

        let decision = self.gate.check(url).await?;
        if !decision.allowed {
            return Err(DownloadError::PermissionDenied {
                url: url.to_string(),
            });
        }
        if let Some(delay) = decision.crawl_delay {
            self.fetcher.limiter().respect_crawl_delay(delay);
        }

        let fetched = self
            .fetcher
            .fetch_permitted(&FetchTarget::pdf(url.clone()), &self.gate)
            .await
            .map_err(|e| {
                if let Some(location) = e.denied_redirect.clone() {
                    DownloadError::PermissionDenied { url: location }
                } else if let Some(limit) = e.size_limit {
                    DownloadError::SizeExceeded { limit }
                } else {
                    DownloadError::Fetch(e)
                }
            })?;

        validate_pdf(&fetched, self.max_bytes)?;

        let fingerprint = content_fingerprint(&fetched.body);
        let id = document_id(url.as_str(), DocumentKind::Pdf);
        match self.store.get(&id) {
            Ok(existing) if existing.content_fingerprint == fingerprint => {
                tracing::debug!("PDF unchanged, skipping write: {}", url);
                return Ok(PdfDownload {
                    document: existing,
                    unchanged: true,
                    degraded: decision.degraded,
                });
            }
            Ok(_) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let record = NewDocument {
            url: url.to_string(),
            kind: DocumentKind::Pdf,
            metadata: pdf_metadata(candidate, &fetched),
            content_fingerprint: fingerprint,
            fetched_at: fetched.fetched_at,
        };
        let document = self.store.upsert(record, Some(&fetched.body))?;

        tracing::info!(
            "Stored PDF {} ({} bytes, version {})",
            url,
            fetched.body.len(),
            document.version
        );

        Ok(PdfDownload {
            document,
            unchanged: false,
            degraded: decision.degraded,
        })
    }
}

fn is_pdf_mime(mime: &str) -> bool {
    PDF_MIME_TYPES.contains(&mime)
}

/// Checks that a fetched body is a PDF within size bounds
fn validate_pdf(fetched: &FetchResult, max_bytes: u64) -> Result<(), DownloadError> {
    let size = fetched.body.len() as u64;
    if size == 0 {
        return Err(DownloadError::InvalidContent("empty body".to_string()));
    }
    if size > max_bytes {
        return Err(DownloadError::SizeExceeded { limit: max_bytes });
    }

    let mime = fetched.mime_type();
    let declared_pdf = mime.as_deref().map_or(false, is_pdf_mime);
    if !declared_pdf && !fetched.body.starts_with(PDF_MAGIC) {
        return Err(DownloadError::InvalidContent(format!(
            "content type {} and no PDF signature",
            mime.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(())
}

fn pdf_metadata(candidate: &PdfCandidate, fetched: &FetchResult) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "filename".into(),
        filename_from_url(&candidate.absolute_url, fetched.fetched_at).into(),
    );
    metadata.insert(
        "source_page_url".into(),
        candidate.source_page_url.as_str().into(),
    );
    metadata.insert("anchor_text".into(), candidate.anchor_text.as_str().into());
    metadata.insert("size_bytes".into(), fetched.body.len().into());
    metadata.insert(
        "content_type".into(),
        fetched
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string())
            .into(),
    );
    metadata
}
