use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::backend::{QueueBackend, STALLED_LIMIT_REASON};
use crate::{Job, JobCounts, JobId, JobState, QueueError, QueueResult};

#[derive(Debug, Default)]
struct Store {
    /// Job records indexed by id
    jobs: HashMap<JobId, Job>,

    /// Waiting job ids, oldest first
    wait: VecDeque<JobId>,
}

impl Store {
    fn active_mut(&mut self, id: &JobId) -> QueueResult<&mut Job> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        if job.state != JobState::Active {
            return Err(QueueError::JobNotActive(id.to_string()));
        }
        Ok(job)
    }
}

/// In-memory backend for testing and development
#[derive(Clone)]
pub struct MemoryBackend {
    name: String,
    store: Arc<RwLock<Store>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Arc::new(RwLock::new(Store::default())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn add(&self, job: Job) -> QueueResult<Job> {
        self.ensure_open()?;
        let mut store = self.store.write();
        store.wait.push_back(job.id.clone());
        store.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.ensure_open()?;
        Ok(self.store.read().jobs.get(id).cloned())
    }

    async fn job_counts(&self) -> QueueResult<JobCounts> {
        self.ensure_open()?;
        let store = self.store.read();
        let mut counts = JobCounts::default();
        for job in store.jobs.values() {
            match job.state {
                JobState::Active => counts.active += 1,
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn clean(&self, grace_ms: i64, state: JobState, limit: usize, now: i64) -> QueueResult<Vec<JobId>> {
        self.ensure_open()?;
        let cutoff = now - grace_ms;
        let mut guard = self.store.write();
        let store = &mut *guard;

        let mut candidates: Vec<(i64, JobId)> = store
            .jobs
            .values()
            .filter(|job| job.state == state)
            .filter_map(|job| {
                let reference = match state {
                    JobState::Completed | JobState::Failed => job.finished_on.unwrap_or(job.timestamp),
                    _ => job.timestamp,
                };
                (reference < cutoff).then(|| (reference, job.id.clone()))
            })
            .collect();
        candidates.sort();

        let mut removed: Vec<JobId> = candidates.into_iter().map(|(_, id)| id).collect();

        if limit > 0 {
            removed.truncate(limit);
        }

        for id in &removed {
            store.jobs.remove(id);
        }
        if state == JobState::Waiting {
            store.wait.retain(|id| !removed.contains(id));
        }

        Ok(removed)
    }

    async fn fetch_next(&self, now: i64, lock_ms: i64) -> QueueResult<Option<Job>> {
        self.ensure_open()?;
        let mut guard = self.store.write();
        let store = &mut *guard;

        while let Some(id) = store.wait.pop_front() {
            // Ids of cleaned or re-stated jobs may linger in the wait list
            if let Some(job) = store.jobs.get_mut(&id) {
                if job.state == JobState::Waiting {
                    job.activate(now, now + lock_ms);
                    return Ok(Some(job.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn extend_lock(&self, id: &JobId, until: i64) -> QueueResult<()> {
        self.ensure_open()?;
        let mut store = self.store.write();
        let job = store.active_mut(id)?;
        job.lock_until = Some(until);
        Ok(())
    }

    async fn complete(&self, id: &JobId, return_value: Value, now: i64) -> QueueResult<Job> {
        self.ensure_open()?;
        let mut store = self.store.write();
        let job = store.active_mut(id)?;
        job.complete(return_value, now);
        Ok(job.clone())
    }

    async fn fail(&self, id: &JobId, error: String, retry_at: Option<i64>, now: i64) -> QueueResult<Job> {
        self.ensure_open()?;
        let mut store = self.store.write();
        let job = store.active_mut(id)?;
        job.fail(error, retry_at, now);
        Ok(job.clone())
    }

    async fn promote_delayed(&self, now: i64) -> QueueResult<Vec<JobId>> {
        self.ensure_open()?;
        let mut guard = self.store.write();
        let store = &mut *guard;

        let mut due: Vec<(i64, JobId)> = store
            .jobs
            .values()
            .filter(|job| job.state == JobState::Delayed)
            .filter_map(|job| job.delay_until.filter(|at| *at <= now).map(|at| (at, job.id.clone())))
            .collect();
        due.sort();

        let mut promoted = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(job) = store.jobs.get_mut(&id) {
                job.promote();
                store.wait.push_back(id.clone());
                promoted.push(id);
            }
        }

        Ok(promoted)
    }

    async fn check_stalled(&self, now: i64, max_stalled: u32) -> QueueResult<Vec<Job>> {
        self.ensure_open()?;
        let mut guard = self.store.write();
        let store = &mut *guard;

        let expired: Vec<JobId> = store
            .jobs
            .values()
            .filter(|job| job.lock_expired(now))
            .map(|job| job.id.clone())
            .collect();

        let mut stalled = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(job) = store.jobs.get_mut(&id) else { continue };
            if job.stalled_count >= max_stalled {
                job.stalled_count += 1;
                job.fail(STALLED_LIMIT_REASON.to_string(), None, now);
            } else {
                job.requeue_stalled();
            }
            let snapshot = job.clone();
            if snapshot.state == JobState::Waiting {
                store.wait.push_back(id);
            }
            stalled.push(snapshot);
        }

        Ok(stalled)
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{now_millis, JobOptions};
    use serde_json::json;

    fn create_test_job() -> Job {
        Job::new("test_job", json!({ "trade": "{}" }), JobOptions::new(3))
    }

    #[tokio::test]
    async fn test_fetch_is_fifo() {
        let backend = MemoryBackend::new("test_queue");
        let first = backend.add(create_test_job()).await.unwrap();
        let second = backend.add(create_test_job()).await.unwrap();

        let now = now_millis();
        let leased = backend.fetch_next(now, 30_000).await.unwrap().unwrap();
        assert_eq!(leased.id, first.id);
        assert_eq!(leased.attempts_made, 1);
        assert_eq!(leased.processed_on, Some(now));

        let leased = backend.fetch_next(now, 30_000).await.unwrap().unwrap();
        assert_eq!(leased.id, second.id);
        assert!(backend.fetch_next(now, 30_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_goes_through_delayed() {
        let backend = MemoryBackend::new("test_queue");
        let job = backend.add(create_test_job()).await.unwrap();
        let now = now_millis();

        backend.fetch_next(now, 30_000).await.unwrap().unwrap();
        let failed = backend.fail(&job.id, "boom".into(), Some(now + 1_000), now).await.unwrap();
        assert_eq!(failed.state, JobState::Delayed);
        assert_eq!(failed.finished_on, None);

        assert!(backend.promote_delayed(now + 999).await.unwrap().is_empty());
        assert_eq!(backend.promote_delayed(now + 1_000).await.unwrap(), vec![job.id.clone()]);

        let retried = backend.fetch_next(now + 1_001, 30_000).await.unwrap().unwrap();
        assert_eq!(retried.attempts_made, 2);
    }

    #[tokio::test]
    async fn test_stalled_job_requeued_then_failed() {
        let backend = MemoryBackend::new("test_queue");
        let job = backend.add(create_test_job()).await.unwrap();
        let now = now_millis();

        backend.fetch_next(now, 10).await.unwrap().unwrap();
        let stalled = backend.check_stalled(now + 11, 1).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].state, JobState::Waiting);
        assert_eq!(stalled[0].stalled_count, 1);

        backend.fetch_next(now + 12, 10).await.unwrap().unwrap();
        let stalled = backend.check_stalled(now + 30, 1).await.unwrap();
        assert_eq!(stalled[0].state, JobState::Failed);
        assert_eq!(stalled[0].failed_reason.as_deref(), Some(STALLED_LIMIT_REASON));

        let counts = backend.job_counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(backend.get_job(&job.id).await.unwrap().unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_closed_backend_rejects_calls() {
        let backend = MemoryBackend::new("test_queue");
        backend.close().await.unwrap();

        let result = backend.add(create_test_job()).await;
        assert!(matches!(result, Err(QueueError::QueueClosed(name)) if name == "test_queue"));
    }
}
