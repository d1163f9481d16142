//! Storage traits and error types
//!
//! This module defines the trait interface for document stores and
//! associated error types.

use crate::storage::{DocumentKind, JobRecord, NewDocument, StoredDocument};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for document store implementations
///
/// Implementations must be safe to share between tasks; every write is
/// atomic with respect to concurrent readers.
pub trait DocumentStore: Send + Sync {
    // ===== Documents =====

    /// Inserts or replaces the document for `doc.url` + `doc.kind`
    ///
    /// # Arguments
    ///
    /// * `doc` - The record to persist
    /// * `attachment` - Raw bytes stored alongside, content-addressed
    ///
    /// # Returns
    ///
    /// The stored document. `version` starts at 1 and increments on every
    /// replacement of the same id.
    fn upsert(&self, doc: NewDocument, attachment: Option<&[u8]>) -> StorageResult<StoredDocument>;

    /// Gets a document by id, `NotFound` if absent
    fn get(&self, id: &str) -> StorageResult<StoredDocument>;

    /// Returns true if any document carries this content fingerprint
    fn exists(&self, fingerprint: &str) -> StorageResult<bool>;

    /// Loads attachment bytes by reference
    fn attachment(&self, attachment_ref: &str) -> StorageResult<Vec<u8>>;

    /// Counts stored documents, optionally filtered by kind
    fn count_documents(&self, kind: Option<DocumentKind>) -> StorageResult<u64>;

    // ===== Jobs =====

    /// Persists a per-seed job summary
    fn record_job(&self, job: &JobRecord) -> StorageResult<i64>;

    /// Number of job summaries recorded
    fn job_count(&self) -> StorageResult<u64>;
}
