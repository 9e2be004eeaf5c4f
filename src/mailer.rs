//! Outbound mail transport.
//!
//! The engine renders subject/body and hands off to a single `send` call; the
//! production implementation posts to the Resend HTTP API. One attempt per
//! run, no retries here: un-notified matches stay un-notified, so the next
//! scheduled run retries naturally.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message. Returns the provider's message id.
    async fn send(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<String>;
}

/// Resend HTTP API transport.
pub struct ResendMailer {
    client: Client,
    api_key: String,
    from: String,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("FineWatch/1.0 (Notification Engine)")
            .build()
            .context("Failed to build mail HTTP client")?;

        Ok(Self {
            client,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl MailTransport for ResendMailer {
    async fn send(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<String> {
        let body = json!({
            "from": self.from,
            "to": [to_email],
            "subject": subject,
            "html": html_body,
            "text": text_body,
        });

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Mail API request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("Mail API returned {status}: {detail}");
        }

        let parsed: ResendResponse = response
            .json()
            .await
            .context("Mail API returned unparseable response")?;

        debug!(to = to_email, message_id = %parsed.id, "📧 Mail accepted by provider");
        Ok(parsed.id)
    }
}

/// Stand-in transport for runs without an API key configured. Logs what would
/// have been sent and reports success, so the rest of the pipeline (ledger,
/// bookkeeping) can be exercised in development.
pub struct DryRunMailer;

#[async_trait]
impl MailTransport for DryRunMailer {
    async fn send(
        &self,
        to_email: &str,
        subject: &str,
        _html_body: &str,
        text_body: &str,
    ) -> Result<String> {
        info!(to = to_email, subject, "📧 [dry-run] would send mail");
        debug!(body = text_body, "dry-run mail body");
        Ok(format!("dry-run-{}", uuid::Uuid::new_v4()))
    }
}
