//! Dispatch orchestrator: the scheduled batch runs.
//!
//! One invocation loads a read-only snapshot of recent fines plus the active
//! subscriber lists, then processes each subscriber independently under a
//! bounded worker pool. Per-subscriber outcomes are explicit variants
//! collected into a run report; one subscriber failing never cancels the
//! others. Only the initial snapshot loads are fatal.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::digest::{aggregate, period_for};
use crate::mailer::MailTransport;
use crate::matchers::{alert_matches, watchlist_matches};
use crate::models::{
    AlertSubscription, Config, DigestFrequency, DigestSubscription, Fine, NotificationKind,
    WatchlistEntry,
};
use crate::render::{self, RenderedEmail};
use crate::store::{Db, FineStore, NotificationLedger, SubscriptionStore};

/// Knobs for one dispatcher instance, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub base_url: String,
    pub lookback: chrono::Duration,
    pub workers: usize,
    pub send_timeout: std::time::Duration,
}

impl DispatchConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.public_base_url.clone(),
            lookback: chrono::Duration::hours(config.lookback_hours),
            workers: config.dispatch_workers.max(1),
            send_timeout: std::time::Duration::from_secs(config.send_timeout_secs),
        }
    }
}

/// Caller-supplied run parameters. `now` is injected so dedup windows and
/// digest periods are deterministic under test; the deadline comes from the
/// external scheduler.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub now: DateTime<Utc>,
    pub deadline: Option<tokio::time::Instant>,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Past the deadline: in-flight work may finish, nothing new starts.
    fn expired(&self) -> bool {
        self.deadline
            .map(|d| tokio::time::Instant::now() >= d)
            .unwrap_or(false)
    }
}

/// Per-subscriber outcome for one run.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// No new matches after ledger subtraction (or deadline hit before start).
    Skipped,
    /// Mail accepted, ledger row appended, bookkeeping updated.
    Notified { message_id: String, fine_count: usize },
    /// Something went wrong for this subscriber only; no ledger row written
    /// unless the send itself already succeeded.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct SubscriberResult {
    pub email: String,
    pub outcome: Outcome,
}

/// Collected outcomes for one flow invocation.
#[derive(Debug)]
pub struct RunReport {
    pub flow: &'static str,
    pub results: Vec<SubscriberResult>,
}

impl RunReport {
    pub fn notified(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Notified { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
            .count()
    }

    fn log_summary(&self) {
        info!(
            flow = self.flow,
            notified = self.notified(),
            skipped = self.skipped(),
            failed = self.failed(),
            "📬 Run complete"
        );
    }
}

pub struct Dispatcher {
    fines: FineStore,
    subs: SubscriptionStore,
    ledger: NotificationLedger,
    mailer: Arc<dyn MailTransport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(db: Db, mailer: Arc<dyn MailTransport>, config: DispatchConfig) -> Self {
        Self {
            fines: FineStore::new(db.clone()),
            subs: SubscriptionStore::new(db.clone()),
            ledger: NotificationLedger::new(db),
            mailer,
            config,
        }
    }

    /// Immediate flows: amount/category alerts and firm watchlists, both over
    /// one snapshot of fines ingested within the lookback window.
    pub async fn run_immediate(&self, ctx: &RunContext) -> Result<RunReport> {
        let since = ctx.now - self.config.lookback;
        let fines = self
            .fines
            .recent_fines(since)
            .context("Failed to load recent fine batch")?;
        let alerts = self
            .subs
            .active_immediate_alerts()
            .context("Failed to load alert subscriptions")?;
        let watchers = self
            .subs
            .active_watchlist_entries()
            .context("Failed to load watchlist entries")?;

        info!(
            fines = fines.len(),
            alert_subs = alerts.len(),
            watchlist_entries = watchers.len(),
            "🔔 Starting immediate-alert run"
        );

        let mut results: Vec<SubscriberResult> = stream::iter(alerts)
            .map(|sub| {
                let fines = &fines;
                async move {
                    SubscriberResult {
                        email: sub.email.clone(),
                        outcome: self.process_alert(&sub, fines, ctx).await,
                    }
                }
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;

        let watch_results: Vec<SubscriberResult> = stream::iter(watchers)
            .map(|entry| {
                let fines = &fines;
                async move {
                    SubscriberResult {
                        email: entry.email.clone(),
                        outcome: self.process_watchlist(&entry, fines, ctx).await,
                    }
                }
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        results.extend(watch_results);

        let report = RunReport {
            flow: "immediate-alerts",
            results,
        };
        report.log_summary();
        Ok(report)
    }

    /// Digest flow for one cadence. Not ledger-deduplicated per fine: a digest
    /// always carries the whole period, and the scheduler owns "once per
    /// period".
    pub async fn run_digest(
        &self,
        ctx: &RunContext,
        frequency: DigestFrequency,
    ) -> Result<RunReport> {
        let (period_start, period_end) = period_for(frequency, ctx.now.date_naive());
        let fines = self
            .fines
            .fines_between(period_start, period_end)
            .context("Failed to load digest period fines")?;
        let subscribers = self
            .subs
            .active_digest_subscriptions(frequency)
            .context("Failed to load digest subscriptions")?;

        info!(
            frequency = frequency.as_str(),
            %period_start,
            %period_end,
            fines = fines.len(),
            subscribers = subscribers.len(),
            "🗞️ Starting digest run"
        );

        let results: Vec<SubscriberResult> = stream::iter(subscribers)
            .map(|sub| {
                let fines = &fines;
                async move {
                    SubscriberResult {
                        email: sub.email.clone(),
                        outcome: self.process_digest(&sub, fines, ctx, period_start, period_end).await,
                    }
                }
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;

        let report = RunReport {
            flow: "digest",
            results,
        };
        report.log_summary();
        Ok(report)
    }

    async fn process_alert(
        &self,
        sub: &AlertSubscription,
        fines: &[Fine],
        ctx: &RunContext,
    ) -> Outcome {
        if ctx.expired() {
            debug!(email = %sub.email, "Deadline reached, not starting subscriber");
            return Outcome::Skipped;
        }

        let matched: Vec<&Fine> = fines.iter().filter(|f| alert_matches(f, sub)).collect();
        if matched.is_empty() {
            return Outcome::Skipped;
        }

        let new_fines = match self.subtract_ledgered(&sub.email, NotificationKind::Alert, matched, ctx)
        {
            Ok(fines) => fines,
            Err(e) => return self.fail(&sub.email, "ledger lookup", e),
        };
        if new_fines.is_empty() {
            debug!(email = %sub.email, "All matched fines already notified, skipping");
            return Outcome::Skipped;
        }

        let email = render::alert_email(sub, &new_fines, &self.config.base_url);
        let message_id = match self.send_with_timeout(&sub.email, &email).await {
            Ok(id) => id,
            Err(e) => return self.fail(&sub.email, "mail send", e),
        };

        let fine_ids: Vec<String> = new_fines.iter().map(|f| f.id.clone()).collect();
        if let Err(e) = self
            .ledger
            .record(&sub.email, NotificationKind::Alert, &fine_ids, ctx.now)
        {
            return self.fail_after_send(&sub.email, e);
        }
        if let Err(e) = self.subs.set_alert_last_notified(&sub.id, ctx.now) {
            return self.fail_after_send(&sub.email, e);
        }

        info!(email = %sub.email, fines = new_fines.len(), "✅ Alert notification sent");
        Outcome::Notified {
            message_id,
            fine_count: new_fines.len(),
        }
    }

    async fn process_watchlist(
        &self,
        entry: &WatchlistEntry,
        fines: &[Fine],
        ctx: &RunContext,
    ) -> Outcome {
        if ctx.expired() {
            debug!(email = %entry.email, "Deadline reached, not starting subscriber");
            return Outcome::Skipped;
        }

        let matched: Vec<&Fine> = fines
            .iter()
            .filter(|f| watchlist_matches(f, entry))
            .collect();
        if matched.is_empty() {
            return Outcome::Skipped;
        }

        let new_fines =
            match self.subtract_ledgered(&entry.email, NotificationKind::Watchlist, matched, ctx) {
                Ok(fines) => fines,
                Err(e) => return self.fail(&entry.email, "ledger lookup", e),
            };
        if new_fines.is_empty() {
            debug!(email = %entry.email, "All matched fines already notified, skipping");
            return Outcome::Skipped;
        }

        let email = render::watchlist_email(entry, &new_fines, &self.config.base_url);
        let message_id = match self.send_with_timeout(&entry.email, &email).await {
            Ok(id) => id,
            Err(e) => return self.fail(&entry.email, "mail send", e),
        };

        let fine_ids: Vec<String> = new_fines.iter().map(|f| f.id.clone()).collect();
        if let Err(e) =
            self.ledger
                .record(&entry.email, NotificationKind::Watchlist, &fine_ids, ctx.now)
        {
            return self.fail_after_send(&entry.email, e);
        }
        if let Err(e) = self.subs.set_watchlist_last_notified(&entry.id, ctx.now) {
            return self.fail_after_send(&entry.email, e);
        }

        info!(
            email = %entry.email,
            firm = %entry.firm_name,
            fines = new_fines.len(),
            "✅ Watchlist notification sent"
        );
        Outcome::Notified {
            message_id,
            fine_count: new_fines.len(),
        }
    }

    async fn process_digest(
        &self,
        sub: &DigestSubscription,
        fines: &[Fine],
        ctx: &RunContext,
        period_start: chrono::NaiveDate,
        period_end: chrono::NaiveDate,
    ) -> Outcome {
        if ctx.expired() {
            debug!(email = %sub.email, "Deadline reached, not starting subscriber");
            return Outcome::Skipped;
        }

        // A zero-fine period still produces a digest.
        let summary = aggregate(fines, period_start, period_end);
        let email = render::digest_email(sub, &summary, &self.config.base_url);

        let message_id = match self.send_with_timeout(&sub.email, &email).await {
            Ok(id) => id,
            Err(e) => return self.fail(&sub.email, "mail send", e),
        };

        let fine_ids: Vec<String> = summary.fines.iter().map(|f| f.id.clone()).collect();
        if let Err(e) = self
            .ledger
            .record(&sub.email, NotificationKind::Digest, &fine_ids, ctx.now)
        {
            return self.fail_after_send(&sub.email, e);
        }
        if let Err(e) = self.subs.set_digest_last_sent(&sub.id, ctx.now) {
            return self.fail_after_send(&sub.email, e);
        }

        info!(
            email = %sub.email,
            fines = summary.fines.len(),
            total = summary.total_amount,
            "✅ Digest sent"
        );
        Outcome::Notified {
            message_id,
            fine_count: summary.fines.len(),
        }
    }

    /// Matched minus already-ledgered, preserving batch order.
    fn subtract_ledgered(
        &self,
        email: &str,
        kind: NotificationKind,
        matched: Vec<&Fine>,
        ctx: &RunContext,
    ) -> Result<Vec<Fine>> {
        let already = self
            .ledger
            .notified_fine_ids(email, kind, ctx.now, self.config.lookback)?;
        Ok(matched
            .into_iter()
            .filter(|f| !already.contains(&f.id))
            .cloned()
            .collect())
    }

    async fn send_with_timeout(&self, to: &str, email: &RenderedEmail) -> Result<String> {
        tokio::time::timeout(
            self.config.send_timeout,
            self.mailer
                .send(to, &email.subject, &email.html_body, &email.text_body),
        )
        .await
        .map_err(|_| anyhow::anyhow!("mail send timed out after {:?}", self.config.send_timeout))?
    }

    fn fail(&self, email: &str, stage: &str, e: anyhow::Error) -> Outcome {
        warn!(email, stage, error = %e, "⚠️ Subscriber processing failed");
        Outcome::Failed {
            reason: format!("{stage}: {e:#}"),
        }
    }

    /// The send already went out; losing the ledger row risks a duplicate on
    /// the next run, which is the preferred failure over a silent miss. Log
    /// loudly either way.
    fn fail_after_send(&self, email: &str, e: anyhow::Error) -> Outcome {
        error!(
            email,
            error = %e,
            "🚨 Mail sent but bookkeeping write failed; next run may resend"
        );
        Outcome::Failed {
            reason: format!("post-send bookkeeping: {e:#}"),
        }
    }
}
