use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::Processor;
use crate::{Job, JobError, QueueError, QueueResult};

/// Type-erased processor for runtime dispatch by job name
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<Value, JobError>;

    fn job_name(&self) -> &'static str;
}

struct ConcreteHandler<P: Processor> {
    processor: P,
}

#[async_trait]
impl<P: Processor> JobHandler for ConcreteHandler<P> {
    async fn handle(&self, job: &Job) -> Result<Value, JobError> {
        // A payload that does not parse will not parse on retry either
        let payload: P::Payload = serde_json::from_value(job.data.clone())
            .map_err(|e| JobError::Permanent(format!("Failed to deserialize {} payload: {}", P::JOB_NAME, e)))?;

        self.processor.process(payload, job).await
    }

    fn job_name(&self) -> &'static str {
        P::JOB_NAME
    }
}

/// Processors for a queue, exactly one per job name
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Processor>(&mut self, processor: P) -> QueueResult<()> {
        if self.handlers.contains_key(P::JOB_NAME) {
            return Err(QueueError::DuplicateProcessor(P::JOB_NAME.to_string()));
        }

        self.handlers.insert(P::JOB_NAME.to_string(), Arc::new(ConcreteHandler { processor }));
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<P: Processor>(mut self, processor: P) -> QueueResult<Self> {
        self.register(processor)?;
        Ok(self)
    }

    /// Run the processor registered for `job.name`
    pub async fn execute(&self, job: &Job) -> Result<Value, JobError> {
        let handler = self
            .handlers
            .get(&job.name)
            .ok_or_else(|| JobError::Permanent(format!("No processor registered for job name: {}", job.name)))?;

        handler.handle(job).await
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.handlers.contains_key(job_name)
    }

    /// Registered job names, sorted
    pub fn job_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.values().map(|h| h.job_name()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobOptions;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AnnouncePayload {
        trade: String,
    }

    struct Announce;

    #[async_trait]
    impl Processor for Announce {
        const JOB_NAME: &'static str = "trade_announce";
        type Payload = AnnouncePayload;

        async fn process(&self, payload: Self::Payload, job: &Job) -> Result<Value, JobError> {
            Ok(json!({ "trade": payload.trade, "attempt": job.attempts_made }))
        }
    }

    fn job(name: &str, data: Value) -> Job {
        Job::new(name, data, JobOptions::default())
    }

    #[tokio::test]
    async fn test_dispatch_by_job_name() {
        let registry = ProcessorRegistry::new().with(Announce).unwrap();
        assert!(registry.is_registered("trade_announce"));
        assert_eq!(registry.job_names(), vec!["trade_announce"]);

        let value = registry.execute(&job("trade_announce", json!({ "trade": "{\"id\":1}" }))).await.unwrap();
        assert_eq!(value["trade"], "{\"id\":1}");
    }

    #[tokio::test]
    async fn test_one_processor_per_name() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Announce).unwrap();

        let result = registry.register(Announce);
        assert!(matches!(result, Err(QueueError::DuplicateProcessor(name)) if name == "trade_announce"));
    }

    #[tokio::test]
    async fn test_unknown_name_and_bad_payload_are_permanent() {
        let registry = ProcessorRegistry::new().with(Announce).unwrap();

        let err = registry.execute(&job("unknown_job", json!({}))).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message().contains("No processor registered"));

        let err = registry.execute(&job("trade_announce", json!({ "trade": 7 }))).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
