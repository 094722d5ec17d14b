use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::{Job, JobCounts, QueueError, QueueResult};

const DURATION_BUCKETS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0,
];

const WAIT_BUCKETS: &[f64] = &[
    10.0, 50.0, 100.0, 500.0, 1_000.0, 5_000.0, 15_000.0, 30_000.0, 60_000.0, 120_000.0, 300_000.0, 900_000.0,
];

const ATTEMPT_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 4.0, 5.0, 10.0];

/// Prometheus families for every queue in the process, labeled by queue name
#[derive(Clone)]
pub struct QueueMetrics {
    pub(crate) registry: Registry,
    pub(crate) job_duration: HistogramVec,
    pub(crate) job_wait_duration: HistogramVec,
    pub(crate) job_attempts: HistogramVec,
    pub(crate) jobs_finished: IntCounterVec,
    pub(crate) errors: IntCounterVec,
    pub(crate) jobs_stalled: IntCounterVec,
    pub(crate) jobs_active: IntCounterVec,
    pub(crate) jobs_waiting: IntCounterVec,
    pub(crate) active_jobs: IntGaugeVec,
    pub(crate) waiting_jobs: IntGaugeVec,
    pub(crate) delayed_jobs: IntGaugeVec,
    pub(crate) completed_jobs: IntGaugeVec,
    pub(crate) failed_jobs: IntGaugeVec,
}

impl QueueMetrics {
    /// Register the queue families (and process metrics on linux) in `registry`
    pub fn new(registry: Registry) -> QueueResult<Self> {
        let job_labels: &[&str] = &["queue", "job_name", "status"];
        let name_labels: &[&str] = &["queue", "job_name"];
        let queue_labels: &[&str] = &["queue"];

        let histogram = |name: &str, help: &str, buckets: &[f64]| {
            HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets.to_vec()), job_labels)
        };
        let counter = |name: &str, help: &str, labels: &[&str]| IntCounterVec::new(Opts::new(name, help), labels);
        let gauge = |name: &str, help: &str| IntGaugeVec::new(Opts::new(name, help), queue_labels);

        let metrics = Self {
            job_duration: histogram(
                "queue_job_duration_milliseconds",
                "Time from processing start to finish",
                DURATION_BUCKETS,
            )?,
            job_wait_duration: histogram(
                "queue_job_wait_duration_milliseconds",
                "Time from enqueue to processing start",
                WAIT_BUCKETS,
            )?,
            job_attempts: histogram("queue_job_attempts", "Attempts made per finished job", ATTEMPT_BUCKETS)?,
            jobs_finished: counter("queue_jobs_finished_total", "Jobs finished by status", job_labels)?,
            errors: counter("queue_errors_total", "Queue-level errors", queue_labels)?,
            jobs_stalled: counter("queue_jobs_stalled_total", "Jobs whose lock lapsed while active", name_labels)?,
            jobs_active: counter("queue_jobs_active_total", "Jobs taken by a worker", name_labels)?,
            jobs_waiting: counter("queue_jobs_waiting_total", "Jobs added to the wait list", name_labels)?,
            active_jobs: gauge("queue_active_jobs", "Jobs currently active")?,
            waiting_jobs: gauge("queue_waiting_jobs", "Jobs currently waiting")?,
            delayed_jobs: gauge("queue_delayed_jobs", "Jobs currently delayed")?,
            completed_jobs: gauge("queue_completed_jobs", "Completed jobs retained by the queue")?,
            failed_jobs: gauge("queue_failed_jobs", "Failed jobs retained by the queue")?,
            registry,
        };

        metrics.register_all()?;
        Ok(metrics)
    }

    fn register_all(&self) -> QueueResult<()> {
        let r = &self.registry;
        r.register(Box::new(self.job_duration.clone()))?;
        r.register(Box::new(self.job_wait_duration.clone()))?;
        r.register(Box::new(self.job_attempts.clone()))?;
        r.register(Box::new(self.jobs_finished.clone()))?;
        r.register(Box::new(self.errors.clone()))?;
        r.register(Box::new(self.jobs_stalled.clone()))?;
        r.register(Box::new(self.jobs_active.clone()))?;
        r.register(Box::new(self.jobs_waiting.clone()))?;
        r.register(Box::new(self.active_jobs.clone()))?;
        r.register(Box::new(self.waiting_jobs.clone()))?;
        r.register(Box::new(self.delayed_jobs.clone()))?;
        r.register(Box::new(self.completed_jobs.clone()))?;
        r.register(Box::new(self.failed_jobs.clone()))?;

        #[cfg(target_os = "linux")]
        r.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished attempt. Durations and attempts are only observed
    /// when the job carries both its start and finish time.
    pub fn observe_finished(&self, queue: &str, job: &Job, status: &str) {
        let labels = [queue, job.name.as_str(), status];

        if let (Some(processing), Some(waiting)) = (job.processing_millis(), job.waiting_millis()) {
            self.job_duration.with_label_values(&labels).observe(processing as f64);
            self.job_wait_duration.with_label_values(&labels).observe(waiting as f64);
            self.job_attempts.with_label_values(&labels).observe(f64::from(job.attempts_made));
        }

        self.jobs_finished.with_label_values(&labels).inc();
    }

    pub fn record_error(&self, queue: &str) {
        self.errors.with_label_values(&[queue]).inc();
    }

    pub fn record_stalled(&self, queue: &str, job_name: &str) {
        self.jobs_stalled.with_label_values(&[queue, job_name]).inc();
    }

    pub fn record_active(&self, queue: &str, job_name: &str) {
        self.jobs_active.with_label_values(&[queue, job_name]).inc();
    }

    pub fn record_waiting(&self, queue: &str, job_name: &str) {
        self.jobs_waiting.with_label_values(&[queue, job_name]).inc();
    }

    /// Overwrite the depth gauges with a polled snapshot
    pub fn set_counts(&self, queue: &str, counts: &JobCounts) {
        let gauge_value = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
        self.active_jobs.with_label_values(&[queue]).set(gauge_value(counts.active));
        self.waiting_jobs.with_label_values(&[queue]).set(gauge_value(counts.waiting));
        self.delayed_jobs.with_label_values(&[queue]).set(gauge_value(counts.delayed));
        self.completed_jobs.with_label_values(&[queue]).set(gauge_value(counts.completed));
        self.failed_jobs.with_label_values(&[queue]).set(gauge_value(counts.failed));
    }

    /// Text exposition of everything in the registry
    pub fn render(&self) -> QueueResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| QueueError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobOptions;
    use serde_json::Value;

    fn finished_job(timestamp: i64, processed_on: Option<i64>, finished_on: Option<i64>) -> Job {
        let mut job = Job::new("trade_announce", Value::Null, JobOptions::default());
        job.timestamp = timestamp;
        job.processed_on = processed_on;
        job.finished_on = finished_on;
        job.attempts_made = 1;
        job
    }

    #[test]
    fn test_durations_observed() {
        let metrics = QueueMetrics::new(Registry::new()).unwrap();
        let job = finished_job(750, Some(1_000), Some(1_650));

        metrics.observe_finished("test_slack_queue", &job, "completed");

        let labels = ["test_slack_queue", "trade_announce", "completed"];
        let duration = metrics.job_duration.with_label_values(&labels);
        assert_eq!(duration.get_sample_count(), 1);
        assert_eq!(duration.get_sample_sum(), 650.0);

        let wait = metrics.job_wait_duration.with_label_values(&labels);
        assert_eq!(wait.get_sample_sum(), 250.0);
        assert_eq!(metrics.job_attempts.with_label_values(&labels).get_sample_sum(), 1.0);
        assert_eq!(metrics.jobs_finished.with_label_values(&labels).get(), 1);
    }

    #[test]
    fn test_missing_timestamps_skip_durations() {
        let metrics = QueueMetrics::new(Registry::new()).unwrap();

        metrics.observe_finished("q", &finished_job(750, None, Some(1_650)), "failed");
        metrics.observe_finished("q", &finished_job(750, Some(1_000), None), "failed");

        let labels = ["q", "trade_announce", "failed"];
        assert_eq!(metrics.job_duration.with_label_values(&labels).get_sample_count(), 0);
        assert_eq!(metrics.job_wait_duration.with_label_values(&labels).get_sample_count(), 0);
        assert_eq!(metrics.job_attempts.with_label_values(&labels).get_sample_count(), 0);
        assert_eq!(metrics.jobs_finished.with_label_values(&labels).get(), 2);
    }

    #[test]
    fn test_counts_feed_gauges() {
        let metrics = QueueMetrics::new(Registry::new()).unwrap();
        let counts = JobCounts { active: 1, waiting: 2, delayed: 3, completed: 4, failed: 5 };

        metrics.set_counts("q", &counts);
        metrics.set_counts("q", &counts);

        assert_eq!(metrics.completed_jobs.with_label_values(&["q"]).get(), 4);
        assert_eq!(metrics.failed_jobs.with_label_values(&["q"]).get(), 5);

        let text = metrics.render().unwrap();
        assert!(text.contains("queue_waiting_jobs{queue=\"q\"} 2"));
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = Registry::new();
        QueueMetrics::new(registry.clone()).unwrap();
        assert!(matches!(QueueMetrics::new(registry), Err(QueueError::Metrics(_))));
    }
}
