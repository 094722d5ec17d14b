use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::memory::MemoryBackend;
use crate::backend::QueueBackend;
use crate::listener::{dispatch, QueueListener};
use crate::{now_millis, Job, JobCounts, JobId, JobOptions, JobState, QueueEvent, QueueResult};

const EVENT_CAPACITY: usize = 1024;

/// A named channel of jobs backed by a storage backend.
///
/// The queue owns the event stream for its jobs: `add` emits `Waiting`,
/// workers emit the processing events through [`Queue::emit`].
pub struct Queue {
    name: String,
    backend: Arc<dyn QueueBackend>,
    events: broadcast::Sender<QueueEvent>,
    closed: AtomicBool,
}

impl Queue {
    pub fn new(name: impl Into<String>, backend: Arc<dyn QueueBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            backend,
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue on a fresh in-process backend
    pub fn memory(name: impl Into<String>) -> Self {
        let name = name.into();
        let backend = Arc::new(MemoryBackend::new(name.clone()));
        Self::new(name, backend)
    }

    /// Queue on the shared broker
    #[cfg(feature = "redis")]
    pub async fn connect(name: impl Into<String>, broker: &crate::BrokerConfig) -> QueueResult<Self> {
        let name = name.into();
        let backend = crate::backend::redis::RedisBackend::connect(name.clone(), broker).await?;
        Ok(Self::new(name, Arc::new(backend)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Enqueue a job; resolves once the backend has stored it
    #[instrument(skip(self, data, opts), fields(queue = %self.name))]
    pub async fn add(&self, name: &str, data: Value, opts: JobOptions) -> QueueResult<Job> {
        let job = self.backend.add(Job::new(name, data, opts)).await?;
        debug!(job_id = %job.id, "job added");
        self.emit(QueueEvent::Waiting { job_id: job.id.clone() });
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.backend.get_job(id).await
    }

    pub async fn get_job_counts(&self) -> QueueResult<JobCounts> {
        self.backend.job_counts().await
    }

    /// Remove jobs that have been in `state` for longer than `grace`
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn clean(&self, grace: Duration, state: JobState) -> QueueResult<Vec<JobId>> {
        let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        let removed = self.backend.clean(grace_ms, state, 0, now_millis()).await?;
        if !removed.is_empty() {
            info!(removed = removed.len(), state = state.name(), "cleaned queue");
        }
        Ok(removed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Publish an event to everything listening on this queue
    pub fn emit(&self, event: QueueEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Deliver this queue's events to `listener` until the returned task is
    /// aborted or the queue is dropped
    pub fn listen(&self, listener: Arc<dyn QueueListener>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        let queue = self.name.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => dispatch(listener.as_ref(), &queue, &event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(queue = %queue, skipped, "queue listener fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Close the backend connection. Safe to call more than once.
    pub async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(queue = %self.name, "queue already closed");
            return Ok(());
        }
        self.backend.close().await?;
        info!(queue = %self.name, "queue closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueListener for Recording {
        async fn on_waiting(&self, queue: &str, job_id: &JobId) {
            self.seen.lock().push(format!("{queue}:waiting:{job_id}"));
        }

        async fn on_error(&self, queue: &str, message: &str) {
            self.seen.lock().push(format!("{queue}:error:{message}"));
        }
    }

    #[tokio::test]
    async fn test_add_emits_waiting() {
        let queue = Queue::memory("test_slack_queue");
        let mut events = queue.subscribe();

        let job = queue.add("trade_announce", json!({ "trade": "{}" }), JobOptions::default()).await.unwrap();

        match events.recv().await.unwrap() {
            QueueEvent::Waiting { job_id } => assert_eq!(job_id, job.id),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(queue.get_job(&job.id).await.unwrap().unwrap().name, "trade_announce");
    }

    #[tokio::test]
    async fn test_listener_receives_typed_events() {
        let queue = Queue::memory("test_slack_queue");
        let recording = Arc::new(Recording::default());
        let task = queue.listen(recording.clone());

        let job = queue.add("trade_announce", json!({}), JobOptions::default()).await.unwrap();
        queue.emit(QueueEvent::Error { message: "broker down".into() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();

        assert_eq!(
            *recording.seen.lock(),
            vec![
                format!("test_slack_queue:waiting:{}", job.id),
                "test_slack_queue:error:broker down".to_string(),
            ]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_is_idempotent() {
        let queue = Queue::memory("test_email_queue");
        queue.close().await.unwrap();
        queue.close().await.unwrap();
        assert!(queue.is_closed());
        assert!(logs_contain("queue already closed"));

        let result = queue.add("request_trade", json!({}), JobOptions::default()).await;
        assert!(matches!(result, Err(QueueError::QueueClosed(_))));
    }
}
