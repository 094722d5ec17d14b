use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::QueueMetrics;
use crate::{Job, JobId, Queue, QueueListener, QueueResult, ShutdownHooks};

/// Default interval between job count polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Job name used when a waiting job can no longer be looked up
const UNKNOWN_JOB: &str = "unknown";

/// Feeds one queue's lifecycle events and polled job counts into
/// [`QueueMetrics`].
///
/// Counters move on events only; the poll just refreshes the depth gauges.
pub struct MetricsRecorder {
    queue: Arc<Queue>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl MetricsRecorder {
    /// Start recording for `queue` and register the recorder's shutdown in `hooks`
    pub fn attach(
        queue: Arc<Queue>,
        metrics: QueueMetrics,
        poll_interval: Duration,
        hooks: &ShutdownHooks,
    ) -> Arc<Self> {
        let listener = queue.listen(Arc::new(MetricsListener {
            queue: Arc::downgrade(&queue),
            metrics: metrics.clone(),
        }));
        let poller = tokio::spawn(poll_counts(queue.clone(), metrics, poll_interval));

        let recorder = Arc::new(Self {
            queue,
            tasks: Mutex::new(vec![listener, poller]),
            shut_down: AtomicBool::new(false),
        });

        let hook = recorder.clone();
        hooks.register(format!("metrics:{}", recorder.queue.name()), move || async move {
            if let Err(e) = hook.shutdown().await {
                warn!(queue = %hook.queue.name(), error = %e, "failed to close queue on shutdown");
            }
        });

        debug!(queue = %recorder.queue.name(), ?poll_interval, "metrics recorder attached");
        recorder
    }

    /// Stop polling and close the queue. Only the first call does anything.
    pub async fn shutdown(&self) -> QueueResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.queue.close().await?;

        info!(queue = %self.queue.name(), "metrics recorder stopped");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

struct MetricsListener {
    queue: Weak<Queue>,
    metrics: QueueMetrics,
}

#[async_trait]
impl QueueListener for MetricsListener {
    async fn on_error(&self, queue: &str, _message: &str) {
        self.metrics.record_error(queue);
    }

    async fn on_waiting(&self, queue: &str, job_id: &JobId) {
        let name = match self.queue.upgrade() {
            Some(handle) => match handle.get_job(job_id).await {
                Ok(Some(job)) => job.name,
                Ok(None) => UNKNOWN_JOB.to_string(),
                Err(e) => {
                    debug!(queue, job_id = %job_id, error = %e, "waiting job lookup failed");
                    UNKNOWN_JOB.to_string()
                }
            },
            None => UNKNOWN_JOB.to_string(),
        };
        self.metrics.record_waiting(queue, &name);
    }

    async fn on_active(&self, queue: &str, job: &Job) {
        self.metrics.record_active(queue, &job.name);
    }

    async fn on_completed(&self, queue: &str, job: &Job) {
        self.metrics.observe_finished(queue, job, "completed");
    }

    async fn on_failed(&self, queue: &str, job: &Job, _error: &str) {
        self.metrics.observe_finished(queue, job, "failed");
    }

    async fn on_stalled(&self, queue: &str, job: &Job) {
        self.metrics.record_stalled(queue, &job.name);
    }
}

async fn poll_counts(queue: Arc<Queue>, metrics: QueueMetrics, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match queue.get_job_counts().await {
            Ok(counts) => metrics.set_counts(queue.name(), &counts),
            Err(e) => warn!(queue = %queue.name(), error = %e, "failed to poll job counts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobOptions;
    use prometheus::Registry;
    use serde_json::json;

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let queue = Arc::new(Queue::memory("test_slack_queue"));
        let metrics = QueueMetrics::new(Registry::new()).unwrap();
        let hooks = ShutdownHooks::new();

        let recorder = MetricsRecorder::attach(queue.clone(), metrics, DEFAULT_POLL_INTERVAL, &hooks);
        assert_eq!(hooks.len(), 1);

        recorder.shutdown().await.unwrap();
        recorder.shutdown().await.unwrap();
        hooks.run_all().await;

        assert!(recorder.is_shut_down());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_waiting_counter_uses_job_name() {
        let queue = Arc::new(Queue::memory("test_slack_queue"));
        let metrics = QueueMetrics::new(Registry::new()).unwrap();
        let recorder = MetricsRecorder::attach(queue.clone(), metrics.clone(), DEFAULT_POLL_INTERVAL, &ShutdownHooks::new());

        queue.add("trade_announce", json!({}), JobOptions::default()).await.unwrap();
        queue.emit(crate::QueueEvent::Waiting { job_id: JobId::from("gone") });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(metrics.jobs_waiting.with_label_values(&["test_slack_queue", "trade_announce"]).get(), 1);
        assert_eq!(metrics.jobs_waiting.with_label_values(&["test_slack_queue", UNKNOWN_JOB]).get(), 1);

        recorder.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_and_error_counters() {
        let queue = Arc::new(Queue::memory("test_slack_queue"));
        let metrics = QueueMetrics::new(Registry::new()).unwrap();
        let recorder = MetricsRecorder::attach(queue.clone(), metrics.clone(), DEFAULT_POLL_INTERVAL, &ShutdownHooks::new());

        let job = Job::new("trade_announce", json!({}), JobOptions::default());
        queue.emit(crate::QueueEvent::Stalled { job });
        queue.emit(crate::QueueEvent::Error { message: "broker unreachable".into() });
        queue.emit(crate::QueueEvent::Error { message: "broker unreachable".into() });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let text = metrics.render().unwrap();
        assert!(
            text.contains(r#"queue_jobs_stalled_total{job_name="trade_announce",queue="test_slack_queue"} 1"#),
            "{text}"
        );
        assert!(text.contains(r#"queue_errors_total{queue="test_slack_queue"} 2"#), "{text}");
        assert_eq!(metrics.jobs_stalled.with_label_values(&["test_slack_queue", "trade_announce"]).get(), 1);

        recorder.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_failure_is_contained() {
        let queue = Arc::new(Queue::memory("test_slack_queue"));
        let metrics = QueueMetrics::new(Registry::new()).unwrap();
        let recorder =
            MetricsRecorder::attach(queue.clone(), metrics.clone(), Duration::from_millis(10), &ShutdownHooks::new());

        queue.add("trade_announce", json!({}), JobOptions::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.waiting_jobs.with_label_values(&["test_slack_queue"]).get(), 1);

        // Closing the backend makes every poll fail; the poller keeps running
        queue.backend().close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!recorder.tasks.lock().iter().any(|task| task.is_finished()));

        recorder.shutdown().await.unwrap();
    }
}
