//! Chat webhook notifications (Slack incoming-webhook format).

use crate::config::SlackSettings;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Posts a text message somewhere people will see it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `text` and return the HTTP status code of the response.
    async fn post(&self, text: &str) -> Result<u16, NotifyError>;

    /// Fire-and-forget variant used on failure paths; errors are logged.
    async fn report(&self, text: &str) {
        match self.post(text).await {
            Ok(200) => {}
            Ok(status) => tracing::warn!("webhook answered with HTTP {}", status),
            Err(err) => tracing::warn!("could not deliver webhook message: {}", err),
        }
    }
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct WebhookMessage<'a> {
    pub channel: &'a str,
    pub text: &'a str,
    pub username: &'a str,
}

#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    settings: SlackSettings,
}

impl SlackNotifier {
    pub fn new(settings: SlackSettings) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn message<'a>(&'a self, text: &'a str) -> WebhookMessage<'a> {
        WebhookMessage {
            channel: &self.settings.channel,
            text,
            username: &self.settings.username,
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post(&self, text: &str) -> Result<u16, NotifyError> {
        let response = self
            .client
            .post(&self.settings.url)
            .json(&self.message(text))
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}
