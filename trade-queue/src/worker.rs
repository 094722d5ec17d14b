use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::{now_millis, Job, JobError, JobState, ProcessorRegistry, Queue, QueueError, QueueEvent, QueueResult};

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Pause between polls when the wait list is empty
    pub poll_interval: Duration,

    /// How long a fetched job stays locked without a heartbeat
    pub lock_duration: Duration,

    /// How often lapsed locks are looked for
    pub stalled_interval: Duration,

    /// Stalls tolerated before the job is failed
    pub max_stalled_count: u32,

    /// Pause after a backend fault
    pub error_backoff: Duration,

    /// Completed jobs older than this are removed on the stalled check tick
    pub completed_retention: Duration,

    /// Failed jobs older than this are removed on the stalled check tick
    pub failed_retention: Duration,
}

/// One day
pub const DEFAULT_COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// One week
pub const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
            max_stalled_count: 1,
            error_backoff: Duration::from_secs(1),
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            failed_retention: DEFAULT_FAILED_RETENTION,
        }
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<QueueResult<()>>,
}

impl WorkerHandle {
    /// Stop after the job in hand (if any) is finished
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

/// Consumer runtime for one queue.
///
/// Pulls jobs in a loop, runs the registered processor while heartbeating the
/// job lock, then completes or fails the job according to its options.
/// Processor failures never stop the loop.
pub struct Worker {
    queue: Arc<Queue>,
    registry: Arc<ProcessorRegistry>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(queue: Arc<Queue>, registry: ProcessorRegistry, options: WorkerOptions) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
            options,
        }
    }

    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle { shutdown_tx, join_handle }
    }

    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) -> QueueResult<()> {
        info!(queue = %self.queue.name(), jobs = ?self.registry.job_names(), "worker started");

        let stalled_checker = tokio::spawn(check_stalled_loop(self.queue.clone(), self.options.clone()));

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            let pause = match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => self.options.poll_interval,
                Err(e) => {
                    error!(queue = %self.queue.name(), error = %e, "worker failed to process next job");
                    self.queue.emit(QueueEvent::Error { message: e.to_string() });
                    self.options.error_backoff
                }
            };

            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = sleep(pause) => {}
            }
        }

        stalled_checker.abort();
        info!(queue = %self.queue.name(), "worker stopped");
        Ok(())
    }

    /// Process one job; `false` when nothing was waiting
    async fn process_next(&self) -> QueueResult<bool> {
        let backend = self.queue.backend();
        let now = now_millis();

        for id in backend.promote_delayed(now).await? {
            debug!(queue = %self.queue.name(), job_id = %id, "delayed job is due");
        }

        let Some(job) = backend.fetch_next(now, self.lock_millis()).await? else {
            return Ok(false);
        };

        self.queue.emit(QueueEvent::Active { job: job.clone() });

        let outcome = self.run_with_heartbeat(&job).await;
        match self.settle(&job, outcome).await {
            Err(QueueError::JobNotActive(id)) => {
                warn!(queue = %self.queue.name(), job_id = %id, "job lost its lock before it finished");
                Ok(true)
            }
            other => other.map(|_| true),
        }
    }

    #[instrument(skip_all, fields(queue = %self.queue.name(), job_id = %job.id, job_name = %job.name, attempt = job.attempts_made))]
    async fn run_with_heartbeat(&self, job: &Job) -> Result<Value, JobError> {
        let processing = self.registry.execute(job);
        tokio::pin!(processing);

        let mut heartbeat = interval(self.options.lock_duration / 2);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut processing => return result,
                _ = heartbeat.tick() => {
                    let until = now_millis() + self.lock_millis();
                    if let Err(e) = self.queue.backend().extend_lock(&job.id, until).await {
                        warn!(error = %e, "failed to extend job lock");
                    }
                }
            }
        }
    }

    async fn settle(&self, job: &Job, outcome: Result<Value, JobError>) -> QueueResult<()> {
        let backend = self.queue.backend();
        let finished_at = now_millis();

        match outcome {
            Ok(value) => {
                let done = backend.complete(&job.id, value, finished_at).await?;
                debug!(queue = %self.queue.name(), job_id = %job.id, "job completed");
                self.queue.emit(QueueEvent::Completed { job: done });
            }
            Err(job_error) => {
                let retry_at = if job_error.is_retryable() {
                    job.opts
                        .retry_delay(job.attempts_made)
                        .map(|delay| finished_at + i64::try_from(delay).unwrap_or(i64::MAX / 2))
                } else {
                    None
                };

                let message = job_error.message().to_string();
                let failed = backend.fail(&job.id, message.clone(), retry_at, finished_at).await?;

                if failed.state == JobState::Delayed {
                    warn!(queue = %self.queue.name(), job_id = %job.id, error = %message, retry_at, "job failed, will retry");
                } else {
                    warn!(queue = %self.queue.name(), job_id = %job.id, error = %message, "job failed");
                }
                self.queue.emit(QueueEvent::Failed { job: failed, error: message });
            }
        }

        Ok(())
    }

    fn lock_millis(&self) -> i64 {
        i64::try_from(self.options.lock_duration.as_millis()).unwrap_or(i64::MAX / 2)
    }
}

async fn check_stalled_loop(queue: Arc<Queue>, options: WorkerOptions) {
    let mut ticker = interval(options.stalled_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match queue.backend().check_stalled(now_millis(), options.max_stalled_count).await {
            Ok(stalled) => {
                for job in stalled {
                    warn!(queue = %queue.name(), job_id = %job.id, stalled_count = job.stalled_count, "job stalled");
                    let failed_reason = (job.state == JobState::Failed).then(|| job.failed_reason.clone()).flatten();
                    queue.emit(QueueEvent::Stalled { job: job.clone() });
                    if let Some(error) = failed_reason {
                        queue.emit(QueueEvent::Failed { job, error });
                    }
                }
            }
            Err(e) => {
                error!(queue = %queue.name(), error = %e, "stalled job check failed");
                queue.emit(QueueEvent::Error { message: e.to_string() });
            }
        }

        prune_finished(&queue, &options).await;
    }
}

/// Drop terminal jobs past their retention so the broker does not grow unbounded
async fn prune_finished(queue: &Queue, options: &WorkerOptions) {
    let retention = [
        (JobState::Completed, options.completed_retention),
        (JobState::Failed, options.failed_retention),
    ];

    for (state, grace) in retention {
        if let Err(e) = queue.clean(grace, state).await {
            warn!(queue = %queue.name(), state = state.name(), error = %e, "failed to prune finished jobs");
            queue.emit(QueueEvent::Error { message: e.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backoff, JobOptions, Processor};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Processor for Flaky {
        const JOB_NAME: &'static str = "flaky";
        type Payload = Value;

        async fn process(&self, _payload: Value, _job: &Job) -> Result<Value, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(JobError::retryable(format!("attempt {call} failed")));
            }
            Ok(json!({ "calls": call }))
        }
    }

    fn fast_options() -> WorkerOptions {
        WorkerOptions {
            poll_interval: Duration::from_millis(10),
            lock_duration: Duration::from_secs(5),
            stalled_interval: Duration::from_secs(5),
            max_stalled_count: 1,
            error_backoff: Duration::from_millis(10),
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            failed_retention: DEFAULT_FAILED_RETENTION,
        }
    }

    async fn wait_for_state(queue: &Queue, job: &Job, state: JobState) -> Job {
        for _ in 0..200 {
            let current = queue.get_job(&job.id).await.unwrap().unwrap();
            if current.state == state {
                return current;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", job.id, state);
    }

    #[tokio::test]
    async fn test_retry_then_complete() {
        let queue = Arc::new(Queue::memory("test_queue"));
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ProcessorRegistry::new().with(Flaky { failures: 1, calls: calls.clone() }).unwrap();

        let opts = JobOptions::new(3).with_backoff(Backoff::fixed(20));
        let job = queue.add("flaky", json!({}), opts).await.unwrap();

        let handle = Worker::new(queue.clone(), registry, fast_options()).start();
        let done = wait_for_state(&queue, &job, JobState::Completed).await;
        handle.shutdown().await.unwrap();

        assert_eq!(done.attempts_made, 2);
        assert_eq!(done.return_value, Some(json!({ "calls": 2 })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail() {
        let queue = Arc::new(Queue::memory("test_queue"));
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ProcessorRegistry::new().with(Flaky { failures: 10, calls: calls.clone() }).unwrap();

        let job = queue.add("flaky", json!({}), JobOptions::new(2)).await.unwrap();
        let mut events = queue.subscribe();

        let handle = Worker::new(queue.clone(), registry, fast_options()).start();
        let failed = wait_for_state(&queue, &job, JobState::Failed).await;
        handle.shutdown().await.unwrap();

        assert_eq!(failed.attempts_made, 2);
        assert_eq!(failed.failed_reason.as_deref(), Some("attempt 2 failed"));

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["active", "failed", "active", "failed"]);
    }

    #[tokio::test]
    async fn test_unknown_job_fails_without_retry() {
        let queue = Arc::new(Queue::memory("test_queue"));
        let job = queue.add("nobody_handles_this", json!({}), JobOptions::new(3)).await.unwrap();

        let handle = Worker::new(queue.clone(), ProcessorRegistry::new(), fast_options()).start();
        let failed = wait_for_state(&queue, &job, JobState::Failed).await;
        handle.shutdown().await.unwrap();

        assert_eq!(failed.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_finished_jobs_pruned_after_retention() {
        let queue = Arc::new(Queue::memory("test_queue"));
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ProcessorRegistry::new().with(Flaky { failures: 0, calls: calls.clone() }).unwrap();

        let options = WorkerOptions {
            stalled_interval: Duration::from_millis(20),
            completed_retention: Duration::from_millis(10),
            failed_retention: Duration::from_secs(3600),
            ..fast_options()
        };

        let done = queue.add("flaky", json!({}), JobOptions::new(1)).await.unwrap();
        let failed = queue.add("nobody_handles_this", json!({}), JobOptions::new(1)).await.unwrap();

        let handle = Worker::new(queue.clone(), registry, options).start();
        let mut gone = false;
        for _ in 0..200 {
            if queue.get_job(&done.id).await.unwrap().is_none() {
                gone = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await.unwrap();

        assert!(gone, "completed job was never pruned");
        let counts = queue.get_job_counts().await.unwrap();
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.failed, 1);
        assert_eq!(queue.get_job(&failed.id).await.unwrap().unwrap().state, JobState::Failed);
    }
}
