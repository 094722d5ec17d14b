pub mod registry;

pub use registry::{JobHandler, ProcessorRegistry};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Job, JobError};

/// Handler for one job name on a queue.
///
/// The registry deserializes `job.data` into `Payload` before calling
/// `process`; the returned value is stored as the job's return value.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Job name this processor handles
    const JOB_NAME: &'static str;

    type Payload: DeserializeOwned + Send + 'static;

    async fn process(&self, payload: Self::Payload, job: &Job) -> Result<Value, JobError>;
}
