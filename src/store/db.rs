//! Shared SQLite handle for the engine's stores.
//!
//! One connection behind a parking_lot mutex, WAL mode for concurrent reads
//! during writes. The dispatch run holds the lock only for individual
//! statements, never across a mail send.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

-- Populated by the ingestion pipeline; read-only for this engine.
CREATE TABLE IF NOT EXISTS fines (
    id TEXT PRIMARY KEY,
    firm_name TEXT NOT NULL,
    amount REAL NOT NULL,
    date_issued TEXT NOT NULL,
    breach_type TEXT,
    breach_categories_json TEXT NOT NULL DEFAULT '[]',
    final_notice_url TEXT,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_fines_created_at ON fines(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_fines_date_issued ON fines(date_issued DESC);

-- Managed by the sign-up flow; this engine reads criteria and writes
-- last_notified_at only.
CREATE TABLE IF NOT EXISTS alert_subscriptions (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    min_amount REAL,
    breach_types_json TEXT NOT NULL DEFAULT '[]',
    frequency TEXT NOT NULL DEFAULT 'immediate',
    status TEXT NOT NULL DEFAULT 'pending',
    last_notified_at TEXT,
    unsubscribe_token TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_alert_subs_status ON alert_subscriptions(status, frequency);

CREATE TABLE IF NOT EXISTS firm_watchlist (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    firm_name TEXT NOT NULL,
    firm_name_normalized TEXT NOT NULL,
    notify_threshold REAL,
    status TEXT NOT NULL DEFAULT 'pending',
    last_notified_at TEXT,
    unsubscribe_token TEXT NOT NULL,
    UNIQUE(email, firm_name_normalized)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_watchlist_status ON firm_watchlist(status);

CREATE TABLE IF NOT EXISTS digest_subscriptions (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    frequency TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    last_sent_at TEXT,
    unsubscribe_token TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_digest_subs_status ON digest_subscriptions(status, frequency);

-- Append-only dedup ledger. Never updated, never deleted by the engine.
CREATE TABLE IF NOT EXISTS notification_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL,
    kind TEXT NOT NULL,
    fine_ids_json TEXT NOT NULL,
    sent_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notification_log_lookup
    ON notification_log(email, kind, sent_at DESC);
"#;

/// Cheaply cloneable handle shared by the per-concern stores.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Database initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the shared connection. Keeps lock scopes at
    /// statement granularity in the calling stores.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}
