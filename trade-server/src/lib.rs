//! Trade notifications backend.
//!
//! HTTP controllers enqueue Slack and email notifications for fantasy
//! trades; consumers (in this process or another) deliver them.

pub mod app;
pub mod config;
pub mod consumers;
pub mod error;
pub mod logging;
pub mod notify;
pub mod publishers;
pub mod reporting;
pub mod routes;
pub mod trades;

pub use app::{build, build_with, AppState, Services};
pub use config::AppConfig;
pub use error::AppError;
pub use routes::{metrics_router, router};
