//! Redis-backed queue storage.
//!
//! Key layout per queue (`{prefix}:{queue}:…`):
//! - `wait` / `active`: lists of job ids (LPUSH + RPOPLPUSH keeps FIFO order)
//! - `delayed`: sorted set scored by the retry time
//! - `completed` / `failed`: sorted sets scored by the finish time
//! - `job:<id>`: JSON-encoded [`Job`]
//! - `lock:<id>`: worker lock, expires with `PX`; a missing lock on an
//!   active job marks it stalled
//!
//! Several processes may share one queue. Every move between lists is
//! claimed on the broker first (`SET NX` on the lock, `ZREM`/`LREM`
//! returning 1) so a job changes hands once.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Script;
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{QueueBackend, STALLED_LIMIT_REASON};
use crate::config::BrokerConfig;
use crate::{now_millis, Job, JobCounts, JobId, JobState, QueueError, QueueResult};

#[derive(Debug, Clone)]
struct Keys {
    base: String,
}

impl Keys {
    fn new(prefix: &str, queue: &str) -> Self {
        Self { base: format!("{prefix}:{queue}") }
    }

    fn state(&self, state: JobState) -> String {
        format!("{}:{}", self.base, state.name())
    }

    fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.base, id)
    }

    fn lock(&self, id: &JobId) -> String {
        format!("{}:lock:{}", self.base, id)
    }
}

/// Moves a due job from delayed to wait if this caller removed it.
///
/// KEYS: delayed, job, wait. ARGV: id, job json.
const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
  redis.call('SET', KEYS[2], ARGV[2])
  redis.call('LPUSH', KEYS[3], ARGV[1])
  return 1
end
return 0
"#;

/// Takes an unlocked job off the active list and files it again.
///
/// KEYS: lock, active, job, target. ARGV: id, job json, target kind
/// (`wait` or `failed`), finish time.
const STALLED_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
if redis.call('LREM', KEYS[2], 1, ARGV[1]) == 0 then
  return 0
end
redis.call('SET', KEYS[3], ARGV[2])
if ARGV[3] == 'wait' then
  redis.call('LPUSH', KEYS[4], ARGV[1])
else
  redis.call('ZADD', KEYS[4], ARGV[4], ARGV[1])
end
return 1
"#;

/// Queue storage on a shared Redis broker
pub struct RedisBackend {
    name: String,
    keys: Keys,
    conn: Mutex<Option<ConnectionManager>>,
    promote: Script,
    stalled: Script,
}

impl RedisBackend {
    /// Connect to the broker described by `broker` for queue `name`
    pub async fn connect(name: impl Into<String>, broker: &BrokerConfig) -> QueueResult<Self> {
        let name = name.into();
        let url = broker.connection_url().await?;
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(queue = %name, host = %broker.host, port = broker.port, "connected queue to broker");

        Ok(Self {
            keys: Keys::new(&broker.key_prefix, &name),
            name,
            conn: Mutex::new(Some(conn)),
            promote: Script::new(PROMOTE_SCRIPT),
            stalled: Script::new(STALLED_SCRIPT),
        })
    }

    fn connection(&self) -> QueueResult<ConnectionManager> {
        self.conn
            .lock()
            .clone()
            .ok_or_else(|| QueueError::QueueClosed(self.name.clone()))
    }

    /// Give back a popped id that this caller could not claim
    async fn release(&self, conn: &mut ConnectionManager, id: &JobId, owned_lock: bool) -> QueueResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM").arg(self.keys.state(JobState::Active)).arg(1).arg(id.as_str()).ignore();
        if owned_lock {
            pipe.cmd("DEL").arg(self.keys.lock(id)).ignore();
        }
        let _: () = pipe.query_async(conn).await?;
        Ok(())
    }

    async fn load(&self, conn: &mut ConnectionManager, id: &JobId) -> QueueResult<Option<Job>> {
        let raw: Option<String> = redis::cmd("GET").arg(self.keys.job(id)).query_async(conn).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(QueueError::from)).transpose()
    }

    async fn load_active(&self, conn: &mut ConnectionManager, id: &JobId) -> QueueResult<Job> {
        let job = self
            .load(conn, id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        if job.state != JobState::Active {
            return Err(QueueError::JobNotActive(id.to_string()));
        }
        Ok(job)
    }

    async fn ids_in(&self, conn: &mut ConnectionManager, state: JobState) -> QueueResult<Vec<JobId>> {
        let key = self.keys.state(state);
        let ids: Vec<String> = match state {
            JobState::Waiting | JobState::Active => {
                redis::cmd("LRANGE").arg(&key).arg(0).arg(-1).query_async(conn).await?
            }
            _ => redis::cmd("ZRANGE").arg(&key).arg(0).arg(-1).query_async(conn).await?,
        };
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    /// Finish an active job: drop it from the active list and file it by state
    async fn finish(&self, conn: &mut ConnectionManager, job: &Job) -> QueueResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET").arg(self.keys.job(&job.id)).arg(serde_json::to_string(job)?).ignore()
            .cmd("LREM").arg(self.keys.state(JobState::Active)).arg(0).arg(job.id.as_str()).ignore()
            .cmd("DEL").arg(self.keys.lock(&job.id)).ignore();

        match job.state {
            JobState::Delayed => {
                pipe.cmd("ZADD")
                    .arg(self.keys.state(JobState::Delayed))
                    .arg(job.delay_until.unwrap_or_else(now_millis))
                    .arg(job.id.as_str())
                    .ignore();
            }
            JobState::Waiting => {
                pipe.cmd("LPUSH").arg(self.keys.state(JobState::Waiting)).arg(job.id.as_str()).ignore();
            }
            state => {
                pipe.cmd("ZADD")
                    .arg(self.keys.state(state))
                    .arg(job.finished_on.unwrap_or_else(now_millis))
                    .arg(job.id.as_str())
                    .ignore();
            }
        }

        let _: () = pipe.query_async(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn add(&self, job: Job) -> QueueResult<Job> {
        let mut conn = self.connection()?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET").arg(self.keys.job(&job.id)).arg(serde_json::to_string(&job)?).ignore()
            .cmd("LPUSH").arg(self.keys.state(JobState::Waiting)).arg(job.id.as_str()).ignore()
            .query_async(&mut conn)
            .await?;
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.connection()?;
        self.load(&mut conn, id).await
    }

    async fn job_counts(&self) -> QueueResult<JobCounts> {
        let mut conn = self.connection()?;
        let (active, waiting, delayed, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .cmd("LLEN").arg(self.keys.state(JobState::Active))
            .cmd("LLEN").arg(self.keys.state(JobState::Waiting))
            .cmd("ZCARD").arg(self.keys.state(JobState::Delayed))
            .cmd("ZCARD").arg(self.keys.state(JobState::Completed))
            .cmd("ZCARD").arg(self.keys.state(JobState::Failed))
            .query_async(&mut conn)
            .await?;

        Ok(JobCounts { active, waiting, delayed, completed, failed })
    }

    async fn clean(&self, grace_ms: i64, state: JobState, limit: usize, now: i64) -> QueueResult<Vec<JobId>> {
        let mut conn = self.connection()?;
        let cutoff = now - grace_ms;

        let mut candidates = Vec::new();
        for id in self.ids_in(&mut conn, state).await? {
            let Some(job) = self.load(&mut conn, &id).await? else { continue };
            let reference = match state {
                JobState::Completed | JobState::Failed => job.finished_on.unwrap_or(job.timestamp),
                _ => job.timestamp,
            };
            if reference < cutoff {
                candidates.push((reference, id));
            }
        }
        candidates.sort();

        let mut removed: Vec<JobId> = candidates.into_iter().map(|(_, id)| id).collect();
        if limit > 0 {
            removed.truncate(limit);
        }
        if removed.is_empty() {
            return Ok(removed);
        }

        let state_key = self.keys.state(state);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &removed {
            pipe.cmd("DEL").arg(self.keys.job(id)).ignore();
            match state {
                JobState::Waiting | JobState::Active => {
                    pipe.cmd("LREM").arg(&state_key).arg(0).arg(id.as_str()).ignore();
                }
                _ => {
                    pipe.cmd("ZREM").arg(&state_key).arg(id.as_str()).ignore();
                }
            }
        }
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(queue = %self.name, state = state.name(), removed = removed.len(), "cleaned jobs");
        Ok(removed)
    }

    async fn fetch_next(&self, now: i64, lock_ms: i64) -> QueueResult<Option<Job>> {
        let mut conn = self.connection()?;
        let wait = self.keys.state(JobState::Waiting);
        let active = self.keys.state(JobState::Active);

        loop {
            let popped: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(&wait)
                .arg(&active)
                .query_async(&mut conn)
                .await?;
            let Some(id) = popped.map(JobId::from) else { return Ok(None) };

            // A duplicate id whose twin is already held by another worker
            let claimed: Option<String> = redis::cmd("SET")
                .arg(self.keys.lock(&id))
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(lock_ms.max(1))
                .query_async(&mut conn)
                .await?;
            if claimed.is_none() {
                debug!(queue = %self.name, job_id = %id, "job already claimed, dropping duplicate");
                self.release(&mut conn, &id, false).await?;
                continue;
            }

            let mut job = match self.load(&mut conn, &id).await? {
                Some(job) if job.state == JobState::Waiting => job,
                // Cleaned while still listed, or filed elsewhere by another process
                _ => {
                    self.release(&mut conn, &id, true).await?;
                    continue;
                }
            };

            job.activate(now, now + lock_ms);
            let _: () = redis::cmd("SET")
                .arg(self.keys.job(&id))
                .arg(serde_json::to_string(&job)?)
                .query_async(&mut conn)
                .await?;

            return Ok(Some(job));
        }
    }

    async fn extend_lock(&self, id: &JobId, until: i64) -> QueueResult<()> {
        let mut conn = self.connection()?;
        let mut job = self.load_active(&mut conn, id).await?;
        job.lock_until = Some(until);

        let ttl = (until - now_millis()).max(1);
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET").arg(self.keys.job(id)).arg(serde_json::to_string(&job)?).ignore()
            .cmd("SET").arg(self.keys.lock(id)).arg(1).arg("PX").arg(ttl).ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn complete(&self, id: &JobId, return_value: Value, now: i64) -> QueueResult<Job> {
        let mut conn = self.connection()?;
        let mut job = self.load_active(&mut conn, id).await?;
        job.complete(return_value, now);
        self.finish(&mut conn, &job).await?;
        Ok(job)
    }

    async fn fail(&self, id: &JobId, error: String, retry_at: Option<i64>, now: i64) -> QueueResult<Job> {
        let mut conn = self.connection()?;
        let mut job = self.load_active(&mut conn, id).await?;
        job.fail(error, retry_at, now);
        self.finish(&mut conn, &job).await?;
        Ok(job)
    }

    async fn promote_delayed(&self, now: i64) -> QueueResult<Vec<JobId>> {
        let mut conn = self.connection()?;
        let delayed = self.keys.state(JobState::Delayed);

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&delayed)
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await?;

        let mut promoted = Vec::with_capacity(due.len());
        for id in due.into_iter().map(JobId::from) {
            let Some(mut job) = self.load(&mut conn, &id).await? else {
                let _: () = redis::cmd("ZREM").arg(&delayed).arg(id.as_str()).query_async(&mut conn).await?;
                continue;
            };
            job.promote();
            let moved: i64 = self
                .promote
                .key(&delayed)
                .key(self.keys.job(&id))
                .key(self.keys.state(JobState::Waiting))
                .arg(id.as_str())
                .arg(serde_json::to_string(&job)?)
                .invoke_async(&mut conn)
                .await?;
            if moved == 1 {
                promoted.push(id);
            }
        }

        Ok(promoted)
    }

    async fn check_stalled(&self, now: i64, max_stalled: u32) -> QueueResult<Vec<Job>> {
        let mut conn = self.connection()?;
        let mut stalled = Vec::new();

        for id in self.ids_in(&mut conn, JobState::Active).await? {
            let locked: bool = redis::cmd("EXISTS").arg(self.keys.lock(&id)).query_async(&mut conn).await?;
            if locked {
                continue;
            }
            let Some(mut job) = self.load(&mut conn, &id).await? else { continue };
            // A fetch in flight has not written the active state yet
            if !job.lock_expired(now) {
                continue;
            }

            if job.stalled_count >= max_stalled {
                job.stalled_count += 1;
                job.fail(STALLED_LIMIT_REASON.to_string(), None, now);
            } else {
                job.requeue_stalled();
            }

            let (target, kind) = match job.state {
                JobState::Waiting => (self.keys.state(JobState::Waiting), "wait"),
                _ => (self.keys.state(JobState::Failed), "failed"),
            };
            let claimed: i64 = self
                .stalled
                .key(self.keys.lock(&id))
                .key(self.keys.state(JobState::Active))
                .key(self.keys.job(&id))
                .key(target)
                .arg(id.as_str())
                .arg(serde_json::to_string(&job)?)
                .arg(kind)
                .arg(job.finished_on.unwrap_or(now))
                .invoke_async(&mut conn)
                .await?;
            if claimed == 1 {
                stalled.push(job);
            }
        }

        Ok(stalled)
    }

    async fn close(&self) -> QueueResult<()> {
        // Dropping the last manager clone closes the socket
        if self.conn.lock().take().is_some() {
            info!(queue = %self.name, "closed broker connection");
        }
        Ok(())
    }
}
