//! Domain types for the notification matching & dispatch engine.
//!
//! Fines are produced by the external ingestion pipeline; subscriptions are
//! created and verified by the external sign-up flow. This engine only reads
//! them, so the types here are plain records with a validating parse at the
//! store boundary.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single regulatory-enforcement record. Immutable as far as this engine
/// is concerned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fine {
    /// Stable across re-ingestion; used as the ledger dedup key.
    pub id: String,
    pub firm_name: String,
    pub amount: f64,
    pub date_issued: NaiveDate,
    pub breach_type: Option<String>,
    pub breach_categories: Vec<String>,
    pub final_notice_url: Option<String>,
}

/// Subscription lifecycle. Only `Active` rows are eligible for matching;
/// transitions are driven entirely by the external sign-up/unsubscribe flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Unsubscribed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Unsubscribed => "unsubscribed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => SubscriptionStatus::Pending,
            "active" => SubscriptionStatus::Active,
            "paused" => SubscriptionStatus::Paused,
            "unsubscribed" => SubscriptionStatus::Unsubscribed,
            other => bail!("unknown subscription status: {other:?}"),
        })
    }
}

/// Delivery cadence on an alert subscription. Only `Immediate` is handled by
/// the immediate-alert flow; daily/weekly subscribers are served by digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFrequency {
    Immediate,
    Daily,
    Weekly,
}

impl AlertFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertFrequency::Immediate => "immediate",
            AlertFrequency::Daily => "daily",
            AlertFrequency::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "immediate" => AlertFrequency::Immediate,
            "daily" => AlertFrequency::Daily,
            "weekly" => AlertFrequency::Weekly,
            other => bail!("unknown alert frequency: {other:?}"),
        })
    }
}

/// Digest cadence. Weekly covers the trailing 7 days, monthly the trailing 30.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    Weekly,
    Monthly,
}

impl DigestFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestFrequency::Weekly => "weekly",
            DigestFrequency::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "weekly" => DigestFrequency::Weekly,
            "monthly" => DigestFrequency::Monthly,
            other => bail!("unknown digest frequency: {other:?}"),
        })
    }

    /// Length of the covered period in days.
    pub fn period_days(&self) -> i64 {
        match self {
            DigestFrequency::Weekly => 7,
            DigestFrequency::Monthly => 30,
        }
    }
}

/// Which flow produced a notification. Stable string forms are the ledger
/// dedup key alongside email + fine ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Watchlist,
    Digest,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Alert => "alert",
            NotificationKind::Watchlist => "watchlist",
            NotificationKind::Digest => "digest",
        }
    }
}

/// A subscriber request for immediate notification of fines matching
/// amount/category criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSubscription {
    pub id: String,
    pub email: String,
    /// Absent = no floor.
    pub min_amount: Option<f64>,
    /// Empty = match all categories.
    pub breach_types: Vec<String>,
    pub frequency: AlertFrequency,
    pub status: SubscriptionStatus,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub unsubscribe_token: String,
}

/// A subscriber request for notification whenever a specific named firm
/// appears in a new fine. At most one entry per (email, firm_name_normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub id: String,
    pub email: String,
    /// Display form, as the subscriber typed it.
    pub firm_name: String,
    /// Lower-cased and trimmed; the canonical matching key.
    pub firm_name_normalized: String,
    pub notify_threshold: Option<f64>,
    pub status: SubscriptionStatus,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub unsubscribe_token: String,
}

/// A subscriber request for a periodic summary of all fines in the period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSubscription {
    pub id: String,
    pub email: String,
    pub frequency: DigestFrequency,
    pub status: SubscriptionStatus,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub unsubscribe_token: String,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub resend_api_key: Option<String>,
    pub mail_from: String,
    pub public_base_url: String,
    pub lookback_hours: i64,
    pub dispatch_workers: usize,
    pub send_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./finewatch.db".to_string());

        let resend_api_key = std::env::var("RESEND_API_KEY").ok();

        let mail_from = std::env::var("MAIL_FROM")
            .unwrap_or_else(|_| "FineWatch Alerts <alerts@finewatch.co.uk>".to_string());

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "https://finewatch.co.uk".to_string());

        let lookback_hours = std::env::var("LOOKBACK_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);

        let dispatch_workers = std::env::var("DISPATCH_WORKERS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .unwrap_or(4);

        let send_timeout_secs = std::env::var("SEND_TIMEOUT_SECS")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .unwrap_or(8);

        Ok(Self {
            database_path,
            resend_api_key,
            mail_from,
            public_base_url,
            lookback_hours,
            dispatch_workers,
            send_timeout_secs,
        })
    }
}
