use serde_json::json;
use tracing::{debug, info};

use super::{Delivery, NotifyError};
use crate::config::SlackConfig;

/// Posts chat messages to a Slack incoming webhook
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    pub async fn post(&self, text: &str) -> Result<Delivery, NotifyError> {
        let Some(url) = self.config.webhook_url.as_deref() else {
            info!(channel = ?self.config.channel, "slack webhook not configured, message: {text}");
            return Ok(Delivery::Logged);
        };

        let mut body = json!({ "text": text });
        if let Some(channel) = &self.config.channel {
            body["channel"] = json!(channel);
        }

        let res = self.client.post(url).json(&body).send().await?;
        if !res.status().is_success() {
            return Err(NotifyError::Rejected { service: "slack", status: res.status().as_u16() });
        }

        debug!("slack message posted");
        Ok(Delivery::Sent)
    }
}
