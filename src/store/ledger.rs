//! Notification ledger: append-only log of past sends.
//!
//! The dedup key is (email, kind, fine id) within the lookback window. Rows
//! are never updated or deleted by the engine; a later run simply stops
//! finding old rows inside its window.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use tracing::warn;

use crate::models::NotificationKind;
use crate::store::Db;

pub struct NotificationLedger {
    db: Db,
}

impl NotificationLedger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// All fine ids already notified to this subscriber for this kind within
    /// the lookback window ending at `now`.
    pub fn notified_fine_ids(
        &self,
        email: &str,
        kind: NotificationKind,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<HashSet<String>> {
        // The sent_at comparison below is lexicographic on RFC3339 text.
        // That relies on every row being written via `to_rfc3339()` with a
        // +00:00 offset (`record` is the sole writer); timestamps of mixed
        // sub-second precision would compare wrongly at the exact boundary.
        let cutoff = (now - lookback).to_rfc3339();

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT fine_ids_json FROM notification_log
                     WHERE email = ?1 AND kind = ?2 AND sent_at >= ?3",
                )
                .context("Failed to prepare ledger lookup")?;

            let rows = stmt.query_map(params![email, kind.as_str(), cutoff], |row| {
                row.get::<_, String>(0)
            })?;

            let mut ids = HashSet::new();
            for row in rows {
                let json = row?;
                match serde_json::from_str::<Vec<String>>(&json) {
                    Ok(entry_ids) => ids.extend(entry_ids),
                    Err(e) => warn!(email, error = %e, "Skipping malformed ledger entry"),
                }
            }
            Ok(ids)
        })
    }

    /// Has this exact (email, kind, fine) been notified within the window?
    pub fn has_been_notified(
        &self,
        email: &str,
        kind: NotificationKind,
        fine_id: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<bool> {
        Ok(self
            .notified_fine_ids(email, kind, now, lookback)?
            .contains(fine_id))
    }

    /// Append one entry. Called only after a successful mail send.
    pub fn record(
        &self,
        email: &str,
        kind: NotificationKind,
        fine_ids: &[String],
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let fine_ids_json = serde_json::to_string(fine_ids)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notification_log (email, kind, fine_ids_json, sent_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![email, kind.as_str(), fine_ids_json, sent_at.to_rfc3339()],
            )
            .context("Failed to append ledger entry")?;
            Ok(())
        })
    }

    /// Total entries for a subscriber/kind, window-independent. Test hook for
    /// idempotency assertions.
    pub fn entry_count(&self, email: &str, kind: NotificationKind) -> Result<i64> {
        self.db.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notification_log WHERE email = ?1 AND kind = ?2",
                params![email, kind.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}
