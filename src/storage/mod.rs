//! Storage module for persisting harvested documents
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Document upserts keyed by a stable url + kind identifier
//! - Content-addressed attachment blobs
//! - Per-seed job summaries

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteDocumentStore;
pub use traits::{DocumentStore, StorageError, StorageResult};

use crate::crawler::Metadata;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// What a stored document represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Page,
    Pdf,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Page => "page",
            DocumentKind::Pdf => "pdf",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "page" => Some(DocumentKind::Page),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable document identifier for a url + kind pair
pub fn document_id(url: &str, kind: DocumentKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of raw content
pub fn content_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed reference for an attachment payload
pub fn attachment_ref(bytes: &[u8]) -> String {
    format!("sha256:{}", content_fingerprint(bytes))
}

/// A document about to be written
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub url: String,
    pub kind: DocumentKind,
    pub metadata: Metadata,
    pub content_fingerprint: String,
    pub fetched_at: DateTime<Utc>,
}

impl NewDocument {
    pub fn id(&self) -> String {
        document_id(&self.url, self.kind)
    }
}

/// A document as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub url: String,
    pub kind: DocumentKind,
    pub metadata: Metadata,
    pub content_fingerprint: String,
    pub attachment_ref: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
    pub version: u32,
}

/// Summary row for one page job
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub seed_url: String,
    pub state: String,
    pub config_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stored: u32,
    pub unchanged: u32,
    pub failed: u32,
    pub cancelled: u32,
    /// JSON array of per-resource outcomes
    pub outcomes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_stable() {
        let a = document_id("https://example.gov.co/a.pdf", DocumentKind::Pdf);
        let b = document_id("https://example.gov.co/a.pdf", DocumentKind::Pdf);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_document_id_depends_on_kind() {
        let url = "https://example.gov.co/a";
        assert_ne!(
            document_id(url, DocumentKind::Page),
            document_id(url, DocumentKind::Pdf)
        );
    }

    #[test]
    fn test_attachment_ref_format() {
        let r = attachment_ref(b"%PDF-1.4");
        assert!(r.starts_with("sha256:"));
        assert_eq!(r.len(), "sha256:".len() + 64);
        assert_eq!(&r[7..], content_fingerprint(b"%PDF-1.4"));
    }

    #[test]
    fn test_document_kind_db_strings() {
        assert_eq!(DocumentKind::Pdf.as_str(), "pdf");
        assert_eq!(DocumentKind::from_db_string("page"), Some(DocumentKind::Page));
        assert_eq!(DocumentKind::from_db_string("image"), None);
    }
}
