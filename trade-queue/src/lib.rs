//! # trade-queue
//!
//! Named job queues for background side effects: publishers enqueue named
//! jobs with an attempts/backoff policy, workers run the registered
//! processor for each job, and every transition is published as a typed
//! [`QueueEvent`] that listeners and the metrics recorder observe.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trade_queue::prelude::*;
//! use serde_json::{json, Value};
//!
//! struct Announce;
//!
//! #[async_trait]
//! impl Processor for Announce {
//!     const JOB_NAME: &'static str = "trade_announce";
//!     type Payload = Value;
//!
//!     async fn process(&self, payload: Value, _job: &Job) -> Result<Value, JobError> {
//!         Ok(payload)
//!     }
//! }
//!
//! # async fn run() -> QueueResult<()> {
//! let queue = Arc::new(Queue::memory(Tier::Test.queue_name(Topic::Slack)));
//! queue.add("trade_announce", json!({ "trade": "{}" }), RetryPolicy::ANNOUNCE.job_options()).await?;
//!
//! let registry = ProcessorRegistry::new().with(Announce)?;
//! let worker = Worker::new(queue.clone(), registry, WorkerOptions::default()).start();
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod listener;
pub mod observability;
pub mod publisher;
pub mod queue;
pub mod types;
pub mod worker;

pub use backend::memory::MemoryBackend;
pub use backend::{QueueBackend, STALLED_LIMIT_REASON};
pub use config::{BrokerConfig, RetryPolicy, Tier, Topic};
pub use error::{JobError, QueueError, QueueResult};
pub use job::{Processor, ProcessorRegistry};
pub use lifecycle::ShutdownHooks;
pub use listener::QueueListener;
pub use observability::{MetricsRecorder, QueueMetrics};
pub use publisher::{Publisher, WAIT_GRACE};
pub use queue::Queue;
pub use types::{now_millis, Backoff, BackoffKind, Job, JobCounts, JobId, JobOptions, JobState, QueueEvent};
pub use worker::{Worker, WorkerHandle, WorkerOptions};

#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;

pub mod prelude {
    pub use crate::{
        Job, JobError, JobId, JobOptions, JobState, Processor, ProcessorRegistry, Publisher, Queue, QueueError,
        QueueEvent, QueueListener, QueueResult, RetryPolicy, Tier, Topic, Worker, WorkerOptions,
    };

    pub use async_trait::async_trait;
}
