use serde::Serialize;
use tracing::{debug, info};

use super::{Delivery, NotifyError};
use crate::config::EmailConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Sends mail through an HTTP email API
#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    config: EmailConfig,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    /// Link to the trade page for `trade_id`
    pub fn trade_link(&self, trade_id: &str) -> String {
        self.config.trade_link.replace("{id}", trade_id)
    }

    pub async fn send(&self, mail: &Mail) -> Result<Delivery, NotifyError> {
        let Some(url) = self.config.api_url.as_deref() else {
            info!(to = %mail.to, subject = %mail.subject, "email API not configured, mail logged");
            return Ok(Delivery::Logged);
        };

        let mut req = self.client.post(url).json(&SendRequest {
            from: &self.config.from,
            to: &mail.to,
            subject: &mail.subject,
            text: &mail.text,
        });
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await?;
        if !res.status().is_success() {
            return Err(NotifyError::Rejected { service: "email", status: res.status().as_u16() });
        }

        debug!(to = %mail.to, "mail sent");
        Ok(Delivery::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_link_fills_id() {
        let mailer = Mailer::new(EmailConfig::default());
        assert_eq!(mailer.trade_link("42"), "http://localhost:3030/trades/42");
    }

    #[tokio::test]
    async fn logs_without_api_url() {
        let mailer = Mailer::new(EmailConfig::default());
        let mail = Mail { to: "aces@example.com".into(), subject: "hi".into(), text: "body".into() };
        assert_eq!(mailer.send(&mail).await.unwrap(), Delivery::Logged);
    }
}
