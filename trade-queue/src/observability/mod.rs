pub mod metrics;
pub mod recorder;

pub use metrics::QueueMetrics;
pub use recorder::{MetricsRecorder, DEFAULT_POLL_INTERVAL};
