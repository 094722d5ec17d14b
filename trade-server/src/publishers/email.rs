use std::sync::Arc;

use tracing::{info, instrument};
use trade_queue::{Job, Publisher, Queue, QueueResult, RetryPolicy};

use super::MailPayload;
use crate::trades::{Trade, TradeStatus};

/// The trade mails, one job name each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    /// Ask the recipients to review a trade
    Request,
    /// Tell the creator their trade was declined
    Declined,
    /// Tell every participant the trade was accepted
    Accepted,
}

impl MailKind {
    pub fn job_name(&self) -> &'static str {
        match self {
            Self::Request => "request_trade",
            Self::Declined => "trade_declined",
            Self::Accepted => "trade_accepted",
        }
    }

    /// Status the trade must be in before this mail goes out
    pub fn required_status(&self) -> TradeStatus {
        match self {
            Self::Request => TradeStatus::Requested,
            Self::Declined => TradeStatus::Rejected,
            Self::Accepted => TradeStatus::Accepted,
        }
    }
}

/// Enqueues trade mails, one job per recipient address
pub struct EmailPublisher {
    queue: Arc<Queue>,
    retry: RetryPolicy,
}

impl EmailPublisher {
    pub fn new(queue: Arc<Queue>, retry: RetryPolicy) -> Self {
        Self { queue, retry }
    }

    pub fn queue_handle(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub async fn queue_trade_request_mail(&self, trade: &Trade, recipient: &str) -> QueueResult<Job> {
        self.queue_mail(MailKind::Request, trade, recipient).await
    }

    pub async fn queue_trade_declined_mail(&self, trade: &Trade, recipient: &str) -> QueueResult<Job> {
        self.queue_mail(MailKind::Declined, trade, recipient).await
    }

    pub async fn queue_trade_accepted_mail(&self, trade: &Trade, recipient: &str) -> QueueResult<Job> {
        self.queue_mail(MailKind::Accepted, trade, recipient).await
    }

    #[instrument(skip(self, trade), fields(trade_id = %trade.id, queue = %self.queue.name()))]
    pub async fn queue_mail(&self, kind: MailKind, trade: &Trade, recipient: &str) -> QueueResult<Job> {
        let payload = MailPayload {
            trade: serde_json::to_string(trade)?,
            recipient: recipient.to_string(),
        };
        let job = self
            .queue
            .add(kind.job_name(), serde_json::to_value(payload)?, self.retry.job_options())
            .await?;

        info!(job_id = %job.id, job_name = kind.job_name(), "queued trade mail");
        Ok(job)
    }
}

impl Publisher for EmailPublisher {
    fn queue(&self) -> Option<&Arc<Queue>> {
        Some(&self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades::fixtures;
    use serde_json::json;

    #[tokio::test]
    async fn each_mail_kind_uses_its_job_name() {
        let queue = Arc::new(Queue::memory("test_email_queue"));
        let publisher = EmailPublisher::new(queue.clone(), RetryPolicy::ANNOUNCE);
        let trade = Trade::draft(fixtures::create_trade()).unwrap();

        let request = publisher.queue_trade_request_mail(&trade, "bombers@example.com").await.unwrap();
        let declined = publisher.queue_trade_declined_mail(&trade, "aces@example.com").await.unwrap();
        let accepted = publisher.queue_trade_accepted_mail(&trade, "aces@example.com").await.unwrap();

        assert_eq!(request.name, "request_trade");
        assert_eq!(declined.name, "trade_declined");
        assert_eq!(accepted.name, "trade_accepted");
        assert_eq!(
            request.data,
            json!({ "trade": serde_json::to_string(&trade).unwrap(), "recipient": "bombers@example.com" })
        );
        assert_eq!(publisher.job_total().await.unwrap(), 3);
    }
}
