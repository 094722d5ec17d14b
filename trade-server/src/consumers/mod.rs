//! Queue consumers: processors for each topic plus the lifecycle listener.

mod email;
mod listener;
mod slack;

pub use email::{compose_mail, TradeAcceptedMail, TradeDeclinedMail, TradeRequestMail};
pub use listener::ConsumerListener;
pub use slack::{AnnounceTrade, TradeAnnouncer};

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use trade_queue::{JobError, ProcessorRegistry, Worker, WorkerHandle, WorkerOptions};

use crate::config::AppConfig;
use crate::notify::{Mailer, SlackNotifier};
use crate::publishers::PublisherRegistry;
use crate::reporting::ErrorReporter;
use crate::trades::Trade;

/// Running workers and listeners for every topic
pub struct Consumers {
    workers: Vec<(String, WorkerHandle)>,
    listeners: Vec<JoinHandle<()>>,
}

impl Consumers {
    pub fn queue_names(&self) -> Vec<&str> {
        self.workers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Stop taking jobs; in-flight jobs finish first
    pub async fn shutdown(self) {
        for (queue, worker) in self.workers {
            if let Err(e) = worker.shutdown().await {
                warn!(queue = %queue, error = %e, "worker did not stop cleanly");
            }
        }
        for listener in self.listeners {
            listener.abort();
        }
    }
}

/// Start one worker per topic on the queues owned by `publishers`
pub async fn start(
    config: &AppConfig,
    publishers: &PublisherRegistry,
    reporter: Arc<dyn ErrorReporter>,
    options: WorkerOptions,
) -> Result<Consumers> {
    let slack_queue = publishers.slack(None).await?.queue_handle().clone();
    let email_queue = publishers.email(None).await?.queue_handle().clone();

    let announcer = TradeAnnouncer::new(SlackNotifier::new(config.slack.clone()));
    let slack_jobs = ProcessorRegistry::new().with(AnnounceTrade::new(announcer))?;

    let mailer = Mailer::new(config.email.clone());
    let email_jobs = ProcessorRegistry::new()
        .with(TradeRequestMail::new(mailer.clone()))?
        .with(TradeDeclinedMail::new(mailer.clone()))?
        .with(TradeAcceptedMail::new(mailer))?;

    let mut consumers = Consumers { workers: Vec::new(), listeners: Vec::new() };
    for (queue, jobs) in [(slack_queue, slack_jobs), (email_queue, email_jobs)] {
        info!(queue = %queue.name(), jobs = ?jobs.job_names(), "starting consumer");
        consumers.listeners.push(queue.listen(Arc::new(ConsumerListener::new(reporter.clone()))));
        let name = queue.name().to_string();
        consumers.workers.push((name, Worker::new(queue, jobs, options.clone()).start()));
    }

    Ok(consumers)
}

/// Trade snapshot carried as a JSON string in job payloads
fn parse_trade(raw: &str) -> Result<Trade, JobError> {
    serde_json::from_str(raw).map_err(|e| JobError::permanent(format!("malformed trade payload: {e}")))
}
