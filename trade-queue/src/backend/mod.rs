pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Job, JobCounts, JobId, JobState, QueueResult};

/// Storage primitives for a single named queue.
///
/// All timestamps are milliseconds since the epoch and are passed in by the
/// caller so the queue and worker decide what "now" is.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a new waiting job at the tail of the wait list
    async fn add(&self, job: Job) -> QueueResult<Job>;

    /// Look a job up by id; `None` once it has been removed
    async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Count jobs per state
    async fn job_counts(&self) -> QueueResult<JobCounts>;

    /// Remove jobs in `state` older than `grace_ms` (enqueue time for waiting
    /// jobs, finish time for terminal ones). `limit` of 0 means no limit.
    async fn clean(&self, grace_ms: i64, state: JobState, limit: usize, now: i64) -> QueueResult<Vec<JobId>>;

    /// Move the oldest waiting job to active and lock it until `now + lock_ms`
    async fn fetch_next(&self, now: i64, lock_ms: i64) -> QueueResult<Option<Job>>;

    /// Heartbeat: push the lock of an active job forward
    async fn extend_lock(&self, id: &JobId, until: i64) -> QueueResult<()>;

    /// Mark an active job completed
    async fn complete(&self, id: &JobId, return_value: Value, now: i64) -> QueueResult<Job>;

    /// Mark an active job failed; `retry_at` moves it to delayed instead.
    /// The retry decision belongs to the worker.
    async fn fail(&self, id: &JobId, error: String, retry_at: Option<i64>, now: i64) -> QueueResult<Job>;

    /// Move delayed jobs whose delay has elapsed back to waiting
    async fn promote_delayed(&self, now: i64) -> QueueResult<Vec<JobId>>;

    /// Find active jobs whose lock lapsed. Each is moved back to waiting, or
    /// failed once it has stalled more than `max_stalled` times.
    async fn check_stalled(&self, now: i64, max_stalled: u32) -> QueueResult<Vec<Job>>;

    /// Release the connection; further calls fail with `QueueClosed`
    async fn close(&self) -> QueueResult<()>;
}

/// Failure reason recorded on jobs that stall too often
pub const STALLED_LIMIT_REASON: &str = "job stalled more than allowable limit";
