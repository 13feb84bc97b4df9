//! Connection handling for the `SQLite` store.
//!
//! Mutex acquisition with poison recovery, pragma configuration and schema
//! creation.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Schema of the item and catalog tables.
///
/// Timestamps are Unix seconds. `item_filters` keeps one row per
/// `(item, filter, fingerprint)`; only rows whose fingerprint matches the
/// current `filters` row count as checked.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    link TEXT NOT NULL UNIQUE,
    item_type TEXT,
    source_name TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    content TEXT,
    date_published INTEGER,
    date_added INTEGER NOT NULL,
    image_link TEXT,
    number_of_words INTEGER,
    likes INTEGER,
    comments_link TEXT,
    seen INTEGER NOT NULL DEFAULT 0,
    saved INTEGER NOT NULL DEFAULT 0,
    read_later INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS item_authors (
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (item_id, position)
);
CREATE TABLE IF NOT EXISTS filters (
    title TEXT PRIMARY KEY,
    implementation TEXT NOT NULL,
    args TEXT NOT NULL,
    fingerprint TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS item_filters (
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    filter_title TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    passed INTEGER NOT NULL,
    PRIMARY KEY (item_id, filter_title, fingerprint)
);
CREATE TABLE IF NOT EXISTS blocks (
    title TEXT PRIMARY KEY,
    implementation TEXT NOT NULL,
    definition TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS feeds (
    title TEXT PRIMARY KEY,
    position INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS feed_blocks (
    feed_title TEXT NOT NULL REFERENCES feeds(title) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    block_title TEXT NOT NULL,
    PRIMARY KEY (feed_title, position)
);
CREATE INDEX IF NOT EXISTS idx_items_date_published ON items(date_published);
CREATE INDEX IF NOT EXISTS idx_items_date_added ON items(date_added);
CREATE INDEX IF NOT EXISTS idx_items_source_name ON items(source_name);
CREATE INDEX IF NOT EXISTS idx_item_authors_name ON item_authors(name);
CREATE INDEX IF NOT EXISTS idx_item_filters_title ON item_filters(filter_title, fingerprint);
";

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("store mutex was poisoned, recovering");
            metrics::counter!("store_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**
/// - **`busy_timeout`** of 5 seconds
/// - **foreign keys** enforced, so deleting an item removes its relations
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if foreign keys cannot be enabled.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row ("wal" or "memory"), which execute_batch rejects
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(operation_failed("enable_foreign_keys"))
}

/// Creates the tables and indexes if they do not exist.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if a statement fails.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .map_err(operation_failed("create_schema"))
}

/// Maps a `rusqlite` error into [`Error::OperationFailed`] for `operation`.
pub fn operation_failed(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}
