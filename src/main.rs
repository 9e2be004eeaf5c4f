//! FineWatch Notification Engine
//! Mission: Tell subscribers about new FCA fines exactly once
//!
//! Invoked by an external scheduler; one invocation runs one flow. Exit code
//! is 0 whenever the run completed, even with individual subscriber failures
//! (the next scheduled run retries those naturally). Non-zero only when the
//! initial batch or subscriber loads fail.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finewatch_backend::{
    dispatch::{DispatchConfig, Dispatcher, RunContext},
    mailer::{DryRunMailer, MailTransport, ResendMailer},
    models::{Config, DigestFrequency},
    store::Db,
};

#[derive(Parser, Debug)]
#[command(name = "finewatch-notify")]
#[command(about = "Match new FCA fines against subscribers and dispatch notifications")]
struct Args {
    #[command(subcommand)]
    flow: Flow,

    /// Abort starting new subscribers after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Flow {
    /// Run the immediate alert + watchlist flows over recently ingested fines
    ImmediateAlerts,
    /// Send periodic digests for the given cadence
    Digest {
        #[arg(value_enum)]
        frequency: DigestFrequency,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finewatch_backend=info,finewatch_notify=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let db = Db::new(&config.database_path)?;

    let mailer: Arc<dyn MailTransport> = match &config.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(
            key.clone(),
            config.mail_from.clone(),
            std::time::Duration::from_secs(config.send_timeout_secs),
        )?),
        None => {
            warn!("RESEND_API_KEY not set, running with dry-run mail transport");
            Arc::new(DryRunMailer)
        }
    };

    let dispatcher = Dispatcher::new(db, mailer, DispatchConfig::from_config(&config));

    let mut ctx = RunContext::new(Utc::now());
    if let Some(secs) = args.deadline_secs {
        ctx = ctx.with_deadline(
            tokio::time::Instant::now() + std::time::Duration::from_secs(secs),
        );
    }

    // Fatal load failures propagate out of the run and become a non-zero exit.
    let report = match args.flow {
        Flow::ImmediateAlerts => dispatcher.run_immediate(&ctx).await?,
        Flow::Digest { frequency } => dispatcher.run_digest(&ctx, frequency).await?,
    };

    if report.failed() > 0 {
        warn!(
            failed = report.failed(),
            "Run completed with subscriber failures; they will retry next run"
        );
    }
    info!(
        notified = report.notified(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Run finished"
    );

    Ok(())
}
