//! Subscription store: the three subscriber tables plus bookkeeping writes.
//!
//! Status transitions belong to the external sign-up/unsubscribe flow. The
//! engine reads active rows and writes `last_notified_at` / `last_sent_at`
//! only. Rows that fail the validating parse are logged and skipped, never
//! propagated as half-formed records into matcher logic.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::warn;

use crate::models::{
    AlertFrequency, AlertSubscription, DigestFrequency, DigestSubscription, SubscriptionStatus,
    WatchlistEntry,
};
use crate::store::Db;

pub struct SubscriptionStore {
    db: Db,
}

impl SubscriptionStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Active alert subscriptions on the immediate cadence.
    pub fn active_immediate_alerts(&self) -> Result<Vec<AlertSubscription>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, email, min_amount, breach_types_json, frequency,
                            status, last_notified_at, unsubscribe_token
                     FROM alert_subscriptions
                     WHERE status = 'active' AND frequency = 'immediate'",
                )
                .context("Failed to prepare alert subscriptions query")?;

            let mut subs = Vec::new();
            let rows = stmt.query_map([], |row| parse_alert_row_raw(row))?;
            for row in rows {
                let raw = row?;
                match parse_alert(raw) {
                    Ok(sub) => subs.push(sub),
                    Err(e) => warn!(error = %e, "Skipping malformed alert subscription row"),
                }
            }
            Ok(subs)
        })
    }

    /// Active firm watchlist entries.
    pub fn active_watchlist_entries(&self) -> Result<Vec<WatchlistEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, email, firm_name, firm_name_normalized, notify_threshold,
                            status, last_notified_at, unsubscribe_token
                     FROM firm_watchlist
                     WHERE status = 'active'",
                )
                .context("Failed to prepare watchlist query")?;

            let mut entries = Vec::new();
            let rows = stmt.query_map([], |row| parse_watchlist_row_raw(row))?;
            for row in rows {
                let raw = row?;
                match parse_watchlist(raw) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(error = %e, "Skipping malformed watchlist row"),
                }
            }
            Ok(entries)
        })
    }

    /// Active digest subscriptions on the requested cadence.
    pub fn active_digest_subscriptions(
        &self,
        frequency: DigestFrequency,
    ) -> Result<Vec<DigestSubscription>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, email, frequency, status, last_sent_at, unsubscribe_token
                     FROM digest_subscriptions
                     WHERE status = 'active' AND frequency = ?1",
                )
                .context("Failed to prepare digest subscriptions query")?;

            let mut subs = Vec::new();
            let rows = stmt.query_map(params![frequency.as_str()], |row| {
                parse_digest_row_raw(row)
            })?;
            for row in rows {
                let raw = row?;
                match parse_digest(raw) {
                    Ok(sub) => subs.push(sub),
                    Err(e) => warn!(error = %e, "Skipping malformed digest subscription row"),
                }
            }
            Ok(subs)
        })
    }

    pub fn set_alert_last_notified(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE alert_subscriptions SET last_notified_at = ?1 WHERE id = ?2",
                params![at.to_rfc3339(), id],
            )
            .context("Failed to update alert last_notified_at")?;
            Ok(())
        })
    }

    pub fn set_watchlist_last_notified(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE firm_watchlist SET last_notified_at = ?1 WHERE id = ?2",
                params![at.to_rfc3339(), id],
            )
            .context("Failed to update watchlist last_notified_at")?;
            Ok(())
        })
    }

    pub fn set_digest_last_sent(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE digest_subscriptions SET last_sent_at = ?1 WHERE id = ?2",
                params![at.to_rfc3339(), id],
            )
            .context("Failed to update digest last_sent_at")?;
            Ok(())
        })
    }

    /// Fixture/backfill insert, mirroring the sign-up flow's writes.
    pub fn insert_alert(&self, sub: &AlertSubscription) -> Result<()> {
        let breach_types_json = serde_json::to_string(&sub.breach_types)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO alert_subscriptions
                 (id, email, min_amount, breach_types_json, frequency, status,
                  last_notified_at, unsubscribe_token)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &sub.id,
                    &sub.email,
                    sub.min_amount,
                    &breach_types_json,
                    sub.frequency.as_str(),
                    sub.status.as_str(),
                    sub.last_notified_at.map(|t| t.to_rfc3339()),
                    &sub.unsubscribe_token,
                ],
            )
            .context("Failed to insert alert subscription")?;
            Ok(())
        })
    }

    /// Fixture/backfill insert. Enforces one entry per (email, firm).
    pub fn insert_watchlist(&self, entry: &WatchlistEntry) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO firm_watchlist
                 (id, email, firm_name, firm_name_normalized, notify_threshold,
                  status, last_notified_at, unsubscribe_token)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &entry.id,
                    &entry.email,
                    &entry.firm_name,
                    &entry.firm_name_normalized,
                    entry.notify_threshold,
                    entry.status.as_str(),
                    entry.last_notified_at.map(|t| t.to_rfc3339()),
                    &entry.unsubscribe_token,
                ],
            )
            .context("Failed to insert watchlist entry")?;
            Ok(())
        })
    }

    /// Fixture/backfill insert.
    pub fn insert_digest(&self, sub: &DigestSubscription) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO digest_subscriptions
                 (id, email, frequency, status, last_sent_at, unsubscribe_token)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    &sub.id,
                    &sub.email,
                    sub.frequency.as_str(),
                    sub.status.as_str(),
                    sub.last_sent_at.map(|t| t.to_rfc3339()),
                    &sub.unsubscribe_token,
                ],
            )
            .context("Failed to insert digest subscription")?;
            Ok(())
        })
    }

    /// Read back one alert subscription, for bookkeeping assertions.
    pub fn alert_by_id(&self, id: &str) -> Result<Option<AlertSubscription>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, min_amount, breach_types_json, frequency,
                        status, last_notified_at, unsubscribe_token
                 FROM alert_subscriptions WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map(params![id], |row| parse_alert_row_raw(row))?;
            match rows.next() {
                Some(raw) => Ok(Some(parse_alert(raw?)?)),
                None => Ok(None),
            }
        })
    }

    /// Read back one digest subscription, for bookkeeping assertions.
    pub fn digest_by_id(&self, id: &str) -> Result<Option<DigestSubscription>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, frequency, status, last_sent_at, unsubscribe_token
                 FROM digest_subscriptions WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map(params![id], |row| parse_digest_row_raw(row))?;
            match rows.next() {
                Some(raw) => Ok(Some(parse_digest(raw?)?)),
                None => Ok(None),
            }
        })
    }
}

// Raw row tuples come straight off rusqlite; the validating parse into domain
// types happens in a second step so a bad row yields a loggable error instead
// of poisoning the whole query.

type RawAlertRow = (
    String,
    String,
    Option<f64>,
    String,
    String,
    String,
    Option<String>,
    String,
);

fn parse_alert_row_raw(row: &Row<'_>) -> rusqlite::Result<RawAlertRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn parse_alert(raw: RawAlertRow) -> Result<AlertSubscription> {
    let (id, email, min_amount, breach_types_json, frequency, status, last_notified_at, token) =
        raw;

    let breach_types: Vec<String> = serde_json::from_str(&breach_types_json)
        .with_context(|| format!("bad breach_types for subscription {id}"))?;

    Ok(AlertSubscription {
        frequency: AlertFrequency::parse(&frequency)?,
        status: SubscriptionStatus::parse(&status)?,
        last_notified_at: parse_timestamp(last_notified_at.as_deref())?,
        id,
        email,
        min_amount,
        breach_types,
        unsubscribe_token: token,
    })
}

type RawWatchlistRow = (
    String,
    String,
    String,
    String,
    Option<f64>,
    String,
    Option<String>,
    String,
);

fn parse_watchlist_row_raw(row: &Row<'_>) -> rusqlite::Result<RawWatchlistRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn parse_watchlist(raw: RawWatchlistRow) -> Result<WatchlistEntry> {
    let (id, email, firm_name, firm_name_normalized, notify_threshold, status, last, token) = raw;

    Ok(WatchlistEntry {
        status: SubscriptionStatus::parse(&status)?,
        last_notified_at: parse_timestamp(last.as_deref())?,
        id,
        email,
        firm_name,
        firm_name_normalized,
        notify_threshold,
        unsubscribe_token: token,
    })
}

type RawDigestRow = (String, String, String, String, Option<String>, String);

fn parse_digest_row_raw(row: &Row<'_>) -> rusqlite::Result<RawDigestRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn parse_digest(raw: RawDigestRow) -> Result<DigestSubscription> {
    let (id, email, frequency, status, last_sent_at, token) = raw;

    Ok(DigestSubscription {
        frequency: DigestFrequency::parse(&frequency)?,
        status: SubscriptionStatus::parse(&status)?,
        last_sent_at: parse_timestamp(last_sent_at.as_deref())?,
        id,
        email,
        unsubscribe_token: token,
    })
}

fn parse_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(s) => {
            let parsed = DateTime::parse_from_rfc3339(s)
                .with_context(|| format!("bad timestamp: {s:?}"))?;
            Ok(Some(parsed.with_timezone(&Utc)))
        }
    }
}
