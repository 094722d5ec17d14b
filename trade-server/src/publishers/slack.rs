use std::sync::Arc;

use tracing::{info, instrument};
use trade_queue::{Job, Publisher, Queue, QueueResult, RetryPolicy};

use super::{AnnouncePayload, TRADE_ANNOUNCE};
use crate::trades::Trade;

/// Enqueues Slack announcements for submitted trades
pub struct SlackPublisher {
    queue: Arc<Queue>,
    retry: RetryPolicy,
}

impl SlackPublisher {
    pub fn new(queue: Arc<Queue>, retry: RetryPolicy) -> Self {
        Self { queue, retry }
    }

    pub fn queue_handle(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Resolves once the job is stored, not once the message is posted
    #[instrument(skip(self, trade), fields(trade_id = %trade.id, queue = %self.queue.name()))]
    pub async fn queue_trade_announcement(&self, trade: &Trade) -> QueueResult<Job> {
        let payload = AnnouncePayload { trade: serde_json::to_string(trade)? };
        let job = self
            .queue
            .add(TRADE_ANNOUNCE, serde_json::to_value(payload)?, self.retry.job_options())
            .await?;

        info!(job_id = %job.id, "queued trade announcement");
        Ok(job)
    }
}

impl Publisher for SlackPublisher {
    fn queue(&self) -> Option<&Arc<Queue>> {
        Some(&self.queue)
    }
}
