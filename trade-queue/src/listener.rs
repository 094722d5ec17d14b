use async_trait::async_trait;

use crate::{Job, JobId, QueueEvent};

/// Observer of a queue's lifecycle events.
///
/// Register with [`Queue::listen`](crate::Queue::listen). Every callback has a
/// no-op default so listeners only implement what they care about.
#[async_trait]
pub trait QueueListener: Send + Sync + 'static {
    /// Queue-level fault
    async fn on_error(&self, _queue: &str, _message: &str) {}

    /// Job added; the runtime only knows its id here
    async fn on_waiting(&self, _queue: &str, _job_id: &JobId) {}

    async fn on_active(&self, _queue: &str, _job: &Job) {}

    async fn on_completed(&self, _queue: &str, _job: &Job) {}

    /// Attempt failed; `job.state` tells whether a retry is scheduled
    async fn on_failed(&self, _queue: &str, _job: &Job, _error: &str) {}

    /// Job lock lapsed while active
    async fn on_stalled(&self, _queue: &str, _job: &Job) {}
}

/// Route one event to the matching callback
pub async fn dispatch(listener: &dyn QueueListener, queue: &str, event: &QueueEvent) {
    match event {
        QueueEvent::Error { message } => listener.on_error(queue, message).await,
        QueueEvent::Waiting { job_id } => listener.on_waiting(queue, job_id).await,
        QueueEvent::Active { job } => listener.on_active(queue, job).await,
        QueueEvent::Completed { job } => listener.on_completed(queue, job).await,
        QueueEvent::Failed { job, error } => listener.on_failed(queue, job, error).await,
        QueueEvent::Stalled { job } => listener.on_stalled(queue, job).await,
    }
}
