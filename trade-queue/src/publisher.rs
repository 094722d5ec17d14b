use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{JobId, JobState, Queue, QueueError, QueueResult};

/// How long a job may sit in the wait list before `clean_wait_queue` removes it
pub const WAIT_GRACE: Duration = Duration::from_millis(100);

/// Base contract for components that enqueue jobs on a topic queue.
///
/// Implementors only expose their queue; the bookkeeping operations come
/// with the trait.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// The queue this publisher owns, if one has been bound
    fn queue(&self) -> Option<&Arc<Queue>>;

    /// Number of jobs in the queue across every state
    async fn job_total(&self) -> QueueResult<u64> {
        let queue = self.queue().ok_or(QueueError::QueueUnset)?;
        Ok(queue.get_job_counts().await?.total())
    }

    /// Drop jobs that have waited longer than [`WAIT_GRACE`]; no-op without a queue
    async fn clean_wait_queue(&self) -> QueueResult<Vec<JobId>> {
        match self.queue() {
            Some(queue) => queue.clean(WAIT_GRACE, JobState::Waiting).await,
            None => Ok(Vec::new()),
        }
    }
}
