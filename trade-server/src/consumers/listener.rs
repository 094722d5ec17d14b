use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info};
use trade_queue::{Job, QueueListener};

use crate::reporting::ErrorReporter;

/// Logs job progress and hands failures to the error reporter
pub struct ConsumerListener {
    reporter: Arc<dyn ErrorReporter>,
}

impl ConsumerListener {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl QueueListener for ConsumerListener {
    async fn on_error(&self, queue: &str, message: &str) {
        error!(queue, "queue error: {message}");
        self.reporter.report(message, json!({ "queue": queue }), None).await;
    }

    async fn on_active(&self, queue: &str, job: &Job) {
        info!(queue, job_id = %job.id, job_name = %job.name, attempt = job.attempts_made, "job started");
    }

    async fn on_completed(&self, queue: &str, job: &Job) {
        info!(queue, job_id = %job.id, job_name = %job.name, "job completed");
    }

    async fn on_failed(&self, queue: &str, job: &Job, err: &str) {
        error!(queue, job_id = %job.id, job_name = %job.name, state = job.state.name(), "job failed: {err}");
        let context = json!({
            "queue": queue,
            "jobId": job.id,
            "jobName": job.name,
            "attemptsMade": job.attempts_made,
            "state": job.state.name(),
        });
        self.reporter.report(&format!("{queue} job failed: {err}"), context, None).await;
    }

    async fn on_stalled(&self, queue: &str, job: &Job) {
        error!(queue, job_id = %job.id, job_name = %job.name, "job stalled");
        let context = json!({ "queue": queue, "jobId": job.id, "jobName": job.name });
        self.reporter.report(&format!("{queue} job stalled"), context, None).await;
    }
}
