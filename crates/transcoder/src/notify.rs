//! Chat webhook notifications

use library_transcoder_config::NotifyConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Error type for webhook delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    /// No webhook service path configured
    #[error("Webhook service path is not configured")]
    MissingServicePath,

    /// Request could not be sent
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered with something other than 200
    #[error("Webhook returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Slack-style message body
#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookPayload {
    pub text: String,
    pub mrkdwn: bool,
}

impl WebhookPayload {
    /// Wrap `text` in a code block so fixed-width layout survives
    pub fn code_block(text: &str) -> Self {
        Self {
            text: format!("```{}```", text),
            mrkdwn: true,
        }
    }
}

/// Posts text messages to an incoming webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// `webhook_base` joined with `service_path`
    pub fn from_config(cfg: &NotifyConfig) -> Result<Self, NotifyError> {
        let path = cfg
            .service_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(NotifyError::MissingServicePath)?;
        Ok(Self::new(format!(
            "{}/{}",
            cfg.webhook_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post `text` as a code block
    pub async fn post(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookPayload::code_block(text))
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("status digest posted");
        Ok(())
    }
}
