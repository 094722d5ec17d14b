use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JobId, JobOptions};

/// Milliseconds since the Unix epoch, the unit of every job timestamp
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Job state lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued and waiting for a worker
    Waiting,

    /// Held by a worker (lock taken)
    Active,

    /// Waiting out a backoff delay before the next attempt
    Delayed,

    /// Finished successfully
    Completed,

    /// Finished after exhausting its attempts or a permanent error
    Failed,
}

impl JobState {
    /// Get the state name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "wait",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A unit of work on a named queue, with its runtime-assigned metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,

    /// Job name, identifies the processor
    pub name: String,

    /// Payload as enqueued
    pub data: Value,

    pub opts: JobOptions,

    /// Enqueue time
    pub timestamp: i64,

    /// Time the current (last) attempt started
    pub processed_on: Option<i64>,

    /// Time the job reached a terminal state
    pub finished_on: Option<i64>,

    pub attempts_made: u32,

    pub stalled_count: u32,

    pub failed_reason: Option<String>,

    pub return_value: Option<Value>,

    pub state: JobState,

    /// When a delayed job becomes eligible again
    pub delay_until: Option<i64>,

    /// Lock expiry while active; a lapsed lock marks the job stalled
    pub lock_until: Option<i64>,
}

impl Job {
    /// Create a new waiting job
    pub fn new(name: impl Into<String>, data: Value, opts: JobOptions) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            data,
            opts,
            timestamp: now_millis(),
            processed_on: None,
            finished_on: None,
            attempts_made: 0,
            stalled_count: 0,
            failed_reason: None,
            return_value: None,
            state: JobState::Waiting,
            delay_until: None,
            lock_until: None,
        }
    }

    /// Take the job for processing
    pub fn activate(&mut self, now: i64, lock_until: i64) {
        self.state = JobState::Active;
        self.processed_on = Some(now);
        self.attempts_made += 1;
        self.lock_until = Some(lock_until);
        self.delay_until = None;
    }

    /// Complete the job successfully
    pub fn complete(&mut self, return_value: Value, now: i64) {
        self.state = JobState::Completed;
        self.return_value = Some(return_value);
        self.finished_on = Some(now);
        self.lock_until = None;
    }

    /// Fail the attempt; schedules a retry when `retry_at` is given
    pub fn fail(&mut self, error: String, retry_at: Option<i64>, now: i64) {
        self.failed_reason = Some(error);
        self.lock_until = None;
        match retry_at {
            Some(at) => {
                self.state = JobState::Delayed;
                self.delay_until = Some(at);
            }
            None => {
                self.state = JobState::Failed;
                self.finished_on = Some(now);
            }
        }
    }

    /// Return a stalled job to the wait list
    pub fn requeue_stalled(&mut self) {
        self.state = JobState::Waiting;
        self.stalled_count += 1;
        self.lock_until = None;
    }

    /// Move a delayed job back to waiting
    pub fn promote(&mut self) {
        self.state = JobState::Waiting;
        self.delay_until = None;
    }

    /// Whether the lock of an active job has lapsed
    pub fn lock_expired(&self, now: i64) -> bool {
        match (self.state, self.lock_until) {
            (JobState::Active, Some(until)) => until < now,
            _ => false,
        }
    }

    /// Time spent processing the last attempt, if both timestamps are known
    pub fn processing_millis(&self) -> Option<i64> {
        Some(self.finished_on? - self.processed_on?)
    }

    /// Time spent waiting before the last attempt started
    pub fn waiting_millis(&self) -> Option<i64> {
        Some(self.processed_on? - self.timestamp)
    }
}

/// Job counts per state, as reported by the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub active: u64,
    pub waiting: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    /// Sum across all states
    pub fn total(&self) -> u64 {
        self.active + self.waiting + self.delayed + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_need_both_timestamps() {
        let mut job = Job::new("trade_announce", Value::Null, JobOptions::default());
        job.timestamp = 1_000;
        assert_eq!(job.processing_millis(), None);
        assert_eq!(job.waiting_millis(), None);

        job.activate(1_250, 31_250);
        assert_eq!(job.waiting_millis(), Some(250));
        assert_eq!(job.processing_millis(), None);

        job.complete(Value::Null, 1_900);
        assert_eq!(job.processing_millis(), Some(650));
    }

    #[test]
    fn counts_total_sums_all_states() {
        let counts = JobCounts { active: 1, waiting: 2, delayed: 3, completed: 4, failed: 5 };
        assert_eq!(counts.total(), 15);
    }
}
