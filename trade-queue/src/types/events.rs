use serde::{Deserialize, Serialize};

use super::{Job, JobId};

/// Lifecycle events emitted by a queue and its workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Queue-level fault (broker unreachable, bookkeeping failure)
    Error { message: String },

    /// Job was added; only its id is known at this point
    Waiting { job_id: JobId },

    /// Job was taken by a worker
    Active { job: Job },

    /// Job finished successfully
    Completed { job: Job },

    /// Attempt failed; the job may be delayed for a retry or failed for good
    Failed { job: Job, error: String },

    /// Job lock lapsed while active
    Stalled { job: Job },
}

impl QueueEvent {
    /// Get event name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::Waiting { .. } => "waiting",
            Self::Active { .. } => "active",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Stalled { .. } => "stalled",
        }
    }
}
