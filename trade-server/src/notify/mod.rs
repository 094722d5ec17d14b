//! Outbound delivery: Slack webhook and the email HTTP API.
//!
//! Both fall back to logging the message when no endpoint is configured, so
//! local and test runs never leave the process.

mod mailer;
mod slack;

pub use mailer::{Mail, Mailer};
pub use slack::SlackNotifier;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} rejected the message with status {status}")]
    Rejected { service: &'static str, status: u16 },
}

/// How a message left the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Logged,
}
