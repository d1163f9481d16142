//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the DocumentStore
//! trait.

use crate::crawler::Metadata;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DocumentStore, StorageError, StorageResult};
use crate::storage::{attachment_ref, DocumentKind, JobRecord, NewDocument, StoredDocument};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SELECT_DOCUMENT: &str = "SELECT id, url, kind, metadata, content_fingerprint, attachment_ref,
        fetched_at, stored_at, version
     FROM documents WHERE id = ?1";

/// SQLite document store
///
/// A single connection behind a mutex; every upsert runs in its own
/// transaction so readers never observe a record without its attachment.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteDocumentStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database or apply the schema
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }
}

/// Raw column values of a document row
struct DocumentRow {
    id: String,
    url: String,
    kind: String,
    metadata: String,
    content_fingerprint: String,
    attachment_ref: Option<String>,
    fetched_at: String,
    stored_at: String,
    version: u32,
}

impl DocumentRow {
    fn into_document(self) -> StorageResult<StoredDocument> {
        let kind = DocumentKind::from_db_string(&self.kind).ok_or_else(|| {
            StorageError::Serialization(format!("unknown document kind '{}'", self.kind))
        })?;
        let metadata: Metadata = serde_json::from_str(&self.metadata)?;

        Ok(StoredDocument {
            id: self.id,
            url: self.url,
            kind,
            metadata,
            content_fingerprint: self.content_fingerprint,
            attachment_ref: self.attachment_ref,
            fetched_at: parse_timestamp(&self.fetched_at)?,
            stored_at: parse_timestamp(&self.stored_at)?,
            version: self.version,
        })
    }
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", value, e)))
}

fn read_document(conn: &Connection, id: &str) -> StorageResult<Option<StoredDocument>> {
    let row = conn
        .query_row(SELECT_DOCUMENT, params![id], |row| {
            Ok(DocumentRow {
                id: row.get(0)?,
                url: row.get(1)?,
                kind: row.get(2)?,
                metadata: row.get(3)?,
                content_fingerprint: row.get(4)?,
                attachment_ref: row.get(5)?,
                fetched_at: row.get(6)?,
                stored_at: row.get(7)?,
                version: row.get(8)?,
            })
        })
        .optional()?;

    row.map(DocumentRow::into_document).transpose()
}

fn count_to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

impl DocumentStore for SqliteDocumentStore {
    // ===== Documents =====

    fn upsert(&self, doc: NewDocument, attachment: Option<&[u8]>) -> StorageResult<StoredDocument> {
        let id = doc.id();
        let metadata = serde_json::to_string(&doc.metadata)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let reference = match attachment {
            Some(bytes) => {
                let reference = attachment_ref(bytes);
                tx.execute(
                    "INSERT OR IGNORE INTO attachments (ref, size, data, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![reference, bytes.len() as i64, bytes, now],
                )?;
                Some(reference)
            }
            None => None,
        };

        tx.execute(
            "INSERT INTO documents
                (id, url, kind, metadata, content_fingerprint, attachment_ref,
                 fetched_at, stored_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
             ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                metadata = excluded.metadata,
                content_fingerprint = excluded.content_fingerprint,
                attachment_ref = excluded.attachment_ref,
                fetched_at = excluded.fetched_at,
                stored_at = excluded.stored_at,
                version = documents.version + 1",
            params![
                id,
                doc.url,
                doc.kind.as_str(),
                metadata,
                doc.content_fingerprint,
                reference,
                doc.fetched_at.to_rfc3339(),
                now,
            ],
        )?;

        let stored = read_document(&tx, &id)?
            .ok_or_else(|| StorageError::Database(format!("document {} vanished", id)))?;
        tx.commit()?;

        Ok(stored)
    }

    fn get(&self, id: &str) -> StorageResult<StoredDocument> {
        let conn = self.lock()?;
        read_document(&conn, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn exists(&self, fingerprint: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM documents WHERE content_fingerprint = ?1 LIMIT 1",
                params![fingerprint],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn attachment(&self, reference: &str) -> StorageResult<Vec<u8>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT data FROM attachments WHERE ref = ?1",
            params![reference],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }

    fn count_documents(&self, kind: Option<DocumentKind>) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = match kind {
            Some(kind) => conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?,
        };
        Ok(count_to_u64(count))
    }

    // ===== Jobs =====

    fn record_job(&self, job: &JobRecord) -> StorageResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO jobs
                (seed_url, state, config_hash, started_at, finished_at,
                 stored, unchanged, failed, cancelled, outcomes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.seed_url,
                job.state,
                job.config_hash,
                job.started_at.to_rfc3339(),
                job.finished_at.to_rfc3339(),
                job.stored,
                job.unchanged,
                job.failed,
                job.cancelled,
                job.outcomes,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn job_count(&self) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(count_to_u64(count))
    }
}
