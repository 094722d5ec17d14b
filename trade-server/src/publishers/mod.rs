//! Topic publishers and the per-process registry that owns them.

mod email;
mod slack;

pub use email::{EmailPublisher, MailKind};
pub use slack::SlackPublisher;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;
use trade_queue::{
    BrokerConfig, MetricsRecorder, Publisher, Queue, QueueMetrics, QueueResult, RetryPolicy, ShutdownHooks, Tier,
    Topic,
};

use crate::config::{AppConfig, BackendKind};

/// Job name of the Slack trade announcement
pub const TRADE_ANNOUNCE: &str = "trade_announce";

/// Payload of `trade_announce`: the trade snapshot as a JSON string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub trade: String,
}

/// Payload of the trade mails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailPayload {
    pub trade: String,
    pub recipient: String,
}

/// Everything needed to open a topic queue
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub tier: Tier,
    pub backend: BackendKind,
    pub broker: BrokerConfig,
    pub retry: RetryPolicy,
    pub metrics_poll_interval: Duration,
}

impl From<&AppConfig> for QueueSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            tier: config.tier,
            backend: config.backend,
            broker: config.broker.clone(),
            retry: RetryPolicy::ANNOUNCE,
            metrics_poll_interval: config.metrics_poll_interval,
        }
    }
}

/// One publisher per topic per process, built on first use.
///
/// The first accessor call opens the topic queue (or adopts the injected
/// one) and attaches the metrics recorder; later calls return the same
/// instance and ignore any injected queue.
pub struct PublisherRegistry {
    settings: QueueSettings,
    metrics: QueueMetrics,
    hooks: ShutdownHooks,
    slack: OnceCell<Arc<SlackPublisher>>,
    email: OnceCell<Arc<EmailPublisher>>,
}

impl PublisherRegistry {
    pub fn new(settings: QueueSettings, metrics: QueueMetrics, hooks: ShutdownHooks) -> Self {
        Self {
            settings,
            metrics,
            hooks,
            slack: OnceCell::new(),
            email: OnceCell::new(),
        }
    }

    pub async fn slack(&self, injected: Option<Arc<Queue>>) -> QueueResult<Arc<SlackPublisher>> {
        self.slack.get_or_try_init(|| self.build_slack(injected)).await.cloned()
    }

    pub async fn email(&self, injected: Option<Arc<Queue>>) -> QueueResult<Arc<EmailPublisher>> {
        self.email.get_or_try_init(|| self.build_email(injected)).await.cloned()
    }

    /// The publisher for `topic` as the base contract
    pub async fn for_topic(&self, topic: Topic) -> QueueResult<Arc<dyn Publisher>> {
        let publisher: Arc<dyn Publisher> = match topic {
            Topic::Slack => self.slack(None).await?,
            Topic::Email => self.email(None).await?,
        };
        Ok(publisher)
    }

    async fn build_slack(&self, injected: Option<Arc<Queue>>) -> QueueResult<Arc<SlackPublisher>> {
        let queue = self.bind_queue(Topic::Slack, injected).await?;
        Ok(Arc::new(SlackPublisher::new(queue, self.settings.retry)))
    }

    async fn build_email(&self, injected: Option<Arc<Queue>>) -> QueueResult<Arc<EmailPublisher>> {
        let queue = self.bind_queue(Topic::Email, injected).await?;
        Ok(Arc::new(EmailPublisher::new(queue, self.settings.retry)))
    }

    async fn bind_queue(&self, topic: Topic, injected: Option<Arc<Queue>>) -> QueueResult<Arc<Queue>> {
        let queue = match injected {
            Some(queue) => queue,
            None => Arc::new(self.open_queue(topic).await?),
        };

        MetricsRecorder::attach(queue.clone(), self.metrics.clone(), self.settings.metrics_poll_interval, &self.hooks);
        info!(topic = %topic, queue = %queue.name(), "publisher queue ready");
        Ok(queue)
    }

    async fn open_queue(&self, topic: Topic) -> QueueResult<Queue> {
        let name = self.settings.tier.queue_name(topic);
        match self.settings.backend {
            BackendKind::Memory => Ok(Queue::memory(name)),
            BackendKind::Redis => Queue::connect(name, &self.settings.broker).await,
        }
    }
}
