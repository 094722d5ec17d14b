pub mod ids;
pub mod options;
pub mod record;
pub mod events;

pub use ids::JobId;
pub use options::{Backoff, BackoffKind, JobOptions};
pub use record::{now_millis, Job, JobCounts, JobState};
pub use events::QueueEvent;
