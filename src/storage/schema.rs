//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the document store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Content-addressed binary payloads
CREATE TABLE IF NOT EXISTS attachments (
    ref TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL
);

-- One row per url + kind
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    metadata TEXT NOT NULL,
    content_fingerprint TEXT NOT NULL,
    attachment_ref TEXT REFERENCES attachments(ref),
    fetched_at TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_documents_kind ON documents(kind);
CREATE INDEX IF NOT EXISTS idx_documents_fingerprint ON documents(content_fingerprint);

-- Per-seed job summaries
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    seed_url TEXT NOT NULL,
    state TEXT NOT NULL,
    config_hash TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    stored INTEGER NOT NULL DEFAULT 0,
    unchanged INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    cancelled INTEGER NOT NULL DEFAULT 0,
    outcomes TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_seed ON jobs(seed_url);
"#;

/// Initializes the database schema
///
/// Creates all tables and indexes if they don't exist.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
