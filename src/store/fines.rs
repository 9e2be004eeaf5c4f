//! Fine feed query contract.
//!
//! The ingestion pipeline owns the `fines` table; this store only reads it.
//! `insert` exists for fixtures and backfill tooling, mirroring what the
//! ingester writes.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};
use tracing::warn;

use crate::models::Fine;
use crate::store::Db;

pub struct FineStore {
    db: Db,
}

impl FineStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Fines ingested at or after the watermark, newest first.
    pub fn recent_fines(&self, since: DateTime<Utc>) -> Result<Vec<Fine>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, firm_name, amount, date_issued, breach_type,
                            breach_categories_json, final_notice_url
                     FROM fines
                     WHERE created_at >= ?1
                     ORDER BY created_at DESC",
                )
                .context("Failed to prepare recent fines query")?;

            let rows = stmt.query_map(params![since.to_rfc3339()], parse_fine_row)?;
            Ok(collect_valid(rows))
        })
    }

    /// Fines issued within `[start, end]` inclusive, for digest periods.
    pub fn fines_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Fine>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, firm_name, amount, date_issued, breach_type,
                            breach_categories_json, final_notice_url
                     FROM fines
                     WHERE date_issued >= ?1 AND date_issued <= ?2
                     ORDER BY date_issued DESC",
                )
                .context("Failed to prepare period fines query")?;

            let rows = stmt.query_map(
                params![start.to_string(), end.to_string()],
                parse_fine_row,
            )?;
            Ok(collect_valid(rows))
        })
    }

    /// Insert one fine the way the ingester does. Idempotent on `id`.
    pub fn insert(&self, fine: &Fine, created_at: DateTime<Utc>) -> Result<()> {
        let categories_json = serde_json::to_string(&fine.breach_categories)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO fines
                 (id, firm_name, amount, date_issued, breach_type,
                  breach_categories_json, final_notice_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &fine.id,
                    &fine.firm_name,
                    fine.amount,
                    fine.date_issued.to_string(),
                    &fine.breach_type,
                    &categories_json,
                    &fine.final_notice_url,
                    created_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert fine")?;
            Ok(())
        })
    }
}

fn parse_fine_row(row: &Row<'_>) -> rusqlite::Result<Fine> {
    let date_issued: String = row.get(3)?;
    let categories_json: String = row.get(5)?;

    // Null/garbage categories degrade to "no categories" rather than failing
    // the whole batch; a category-filtered subscription then simply never
    // matches this fine.
    let breach_categories: Vec<String> = serde_json::from_str(&categories_json).unwrap_or_default();

    let date_issued = date_issued.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Fine {
        id: row.get(0)?,
        firm_name: row.get(1)?,
        amount: row.get(2)?,
        date_issued,
        breach_type: row.get(4)?,
        breach_categories,
        final_notice_url: row.get(6)?,
    })
}

/// Collect parsed rows, logging and skipping the malformed ones.
fn collect_valid(
    rows: impl Iterator<Item = rusqlite::Result<Fine>>,
) -> Vec<Fine> {
    let mut fines = Vec::new();
    for row in rows {
        match row {
            Ok(fine) => fines.push(fine),
            Err(e) => warn!(error = %e, "Skipping malformed fine row"),
        }
    }
    fines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn test_store() -> (FineStore, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let db = Db::new(temp.path().to_str().unwrap()).unwrap();
        (FineStore::new(db), temp)
    }

    fn fine(id: &str, amount: f64, date: &str) -> Fine {
        Fine {
            id: id.to_string(),
            firm_name: format!("Firm {id}"),
            amount,
            date_issued: date.parse().unwrap(),
            breach_type: Some("AML".to_string()),
            breach_categories: vec!["AML".to_string(), "GOVERNANCE".to_string()],
            final_notice_url: Some(format!("https://fca.org.uk/{id}.pdf")),
        }
    }

    #[test]
    fn recent_fines_respects_watermark() {
        let (store, _temp) = test_store();
        let old = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();

        store.insert(&fine("old", 100.0, "2024-02-28"), old).unwrap();
        store.insert(&fine("new", 200.0, "2024-03-14"), new).unwrap();

        let since = Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap();
        let recent = store.recent_fines(since).unwrap();

        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");
        assert_eq!(recent[0].breach_categories.len(), 2);
    }

    #[test]
    fn insert_is_idempotent_on_id() {
        let (store, _temp) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();

        store.insert(&fine("dup", 100.0, "2024-03-14"), now).unwrap();
        store.insert(&fine("dup", 999.0, "2024-03-14"), now).unwrap();

        let all = store.recent_fines(now - chrono::Duration::days(1)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].amount, 100.0);
    }

    #[test]
    fn garbage_category_json_degrades_to_no_categories() {
        let (store, _temp) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();

        // Simulate a row the ingester should never have written.
        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO fines
                     (id, firm_name, amount, date_issued, breach_categories_json, created_at)
                     VALUES ('bad-cats', 'Acme Capital', 5000000.0, '2024-03-14',
                             'not json', ?1)",
                    rusqlite::params![now.to_rfc3339()],
                )?;
                Ok(())
            })
            .unwrap();

        let recent = store.recent_fines(now - chrono::Duration::hours(1)).unwrap();

        // The fine still flows through the batch; it just carries no
        // categories, so category-filtered subscriptions never match it.
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "bad-cats");
        assert!(recent[0].breach_categories.is_empty());
    }

    #[test]
    fn fines_between_is_inclusive_of_boundaries() {
        let (store, _temp) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();

        store.insert(&fine("a", 100.0, "2024-03-01"), now).unwrap();
        store.insert(&fine("b", 200.0, "2024-03-08"), now).unwrap();
        store.insert(&fine("c", 300.0, "2024-02-29"), now).unwrap();

        let period = store
            .fines_between("2024-03-01".parse().unwrap(), "2024-03-08".parse().unwrap())
            .unwrap();

        let mut ids: Vec<&str> = period.iter().map(|f| f.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
