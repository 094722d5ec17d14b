use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use trade_queue::{Job, JobError, Processor};

use super::parse_trade;
use crate::notify::{Mail, Mailer};
use crate::publishers::{MailKind, MailPayload};
use crate::trades::Trade;

/// Subject and body for one trade mail
pub fn compose_mail(kind: MailKind, trade: &Trade, recipient: &str, link: &str) -> Mail {
    let (subject, lead) = match kind {
        MailKind::Request => (
            format!("{} has requested a trade", trade.creator.name),
            format!("{} has proposed a trade with {}.", trade.creator.name, trade.recipient_names()),
        ),
        MailKind::Declined => (
            format!("Your trade with {} was declined", trade.recipient_names()),
            match &trade.declined_reason {
                Some(reason) => format!("The trade was declined: {reason}"),
                None => "The trade was declined.".to_string(),
            },
        ),
        MailKind::Accepted => (
            "Your trade was accepted".to_string(),
            format!(
                "The trade between {} and {} was accepted and will be submitted.",
                trade.creator.name,
                trade.recipient_names()
            ),
        ),
    };

    let items: Vec<String> = trade
        .items
        .iter()
        .map(|item| format!("- {} to {}", item.description, trade.team_name(item.recipient_id)))
        .collect();

    Mail {
        to: recipient.to_string(),
        subject,
        text: format!("{lead}\n\n{}\n\nView the trade: {link}", items.join("\n")),
    }
}

async fn deliver(mailer: &Mailer, kind: MailKind, payload: MailPayload, job: &Job) -> Result<Value, JobError> {
    let trade = parse_trade(&payload.trade)?;
    let mail = compose_mail(kind, &trade, &payload.recipient, &mailer.trade_link(&trade.id.to_string()));

    let delivery = mailer.send(&mail).await.map_err(|e| JobError::retryable(e.to_string()))?;

    info!(job_id = %job.id, trade_id = %trade.id, job_name = kind.job_name(), ?delivery, "trade mail delivered");
    Ok(json!({ "tradeId": trade.id, "recipient": payload.recipient }))
}

/// Processor for `request_trade`
pub struct TradeRequestMail {
    mailer: Mailer,
}

impl TradeRequestMail {
    pub fn new(mailer: Mailer) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl Processor for TradeRequestMail {
    const JOB_NAME: &'static str = "request_trade";
    type Payload = MailPayload;

    async fn process(&self, payload: MailPayload, job: &Job) -> Result<Value, JobError> {
        deliver(&self.mailer, MailKind::Request, payload, job).await
    }
}

/// Processor for `trade_declined`
pub struct TradeDeclinedMail {
    mailer: Mailer,
}

impl TradeDeclinedMail {
    pub fn new(mailer: Mailer) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl Processor for TradeDeclinedMail {
    const JOB_NAME: &'static str = "trade_declined";
    type Payload = MailPayload;

    async fn process(&self, payload: MailPayload, job: &Job) -> Result<Value, JobError> {
        deliver(&self.mailer, MailKind::Declined, payload, job).await
    }
}

/// Processor for `trade_accepted`
pub struct TradeAcceptedMail {
    mailer: Mailer,
}

impl TradeAcceptedMail {
    pub fn new(mailer: Mailer) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl Processor for TradeAcceptedMail {
    const JOB_NAME: &'static str = "trade_accepted";
    type Payload = MailPayload;

    async fn process(&self, payload: MailPayload, job: &Job) -> Result<Value, JobError> {
        deliver(&self.mailer, MailKind::Accepted, payload, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmailConfig;
    use crate::trades::{fixtures, TradeStatus, UpdateStatus};
    use trade_queue::JobOptions;

    #[test]
    fn job_names_match_publisher() {
        assert_eq!(TradeRequestMail::JOB_NAME, MailKind::Request.job_name());
        assert_eq!(TradeDeclinedMail::JOB_NAME, MailKind::Declined.job_name());
        assert_eq!(TradeAcceptedMail::JOB_NAME, MailKind::Accepted.job_name());
    }

    #[test]
    fn declined_mail_carries_reason() {
        let mut trade = Trade::draft(fixtures::create_trade()).unwrap();
        trade.status = TradeStatus::Requested;
        trade
            .apply(UpdateStatus {
                status: TradeStatus::Rejected,
                declined_reason: Some("not enough value".into()),
                accepted_by: None,
            })
            .unwrap();

        let mail = compose_mail(MailKind::Declined, &trade, "aces@example.com", "http://trades/1");
        assert_eq!(mail.subject, "Your trade with Bombers was declined");
        assert!(mail.text.contains("not enough value"));
        assert!(mail.text.ends_with("View the trade: http://trades/1"));
    }

    #[tokio::test]
    async fn request_mail_processes() {
        let trade = Trade::draft(fixtures::create_trade()).unwrap();
        let payload = MailPayload {
            trade: serde_json::to_string(&trade).unwrap(),
            recipient: "bombers@example.com".into(),
        };
        let job = Job::new("request_trade", serde_json::to_value(&payload).unwrap(), JobOptions::default());

        let result = TradeRequestMail::new(Mailer::new(EmailConfig::default())).process(payload, &job).await.unwrap();
        assert_eq!(result["recipient"], "bombers@example.com");
    }
}
