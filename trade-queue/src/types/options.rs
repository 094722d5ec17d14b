use serde::{Deserialize, Serialize};

/// Delay strategy between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry
    Fixed,

    /// Delay doubles after every failed attempt
    Exponential,
}

/// Backoff settings, serialized as `{ "type": "exponential", "delay": 30000 }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,

    /// Base delay in milliseconds
    pub delay: u64,
}

impl Backoff {
    pub fn fixed(delay_ms: u64) -> Self {
        Self { kind: BackoffKind::Fixed, delay: delay_ms }
    }

    pub fn exponential(delay_ms: u64) -> Self {
        Self { kind: BackoffKind::Exponential, delay: delay_ms }
    }

    /// Delay in milliseconds before the next attempt, given how many attempts
    /// have already been made (1 after the first failure).
    pub fn delay_for(&self, attempts_made: u32) -> u64 {
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                self.delay.saturating_mul(1u64 << exponent)
            }
        }
    }
}

/// Per-job options fixed at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total number of attempts, including the first one
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
}

impl JobOptions {
    pub fn new(attempts: u32) -> Self {
        Self { attempts: attempts.max(1), backoff: None }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Delay before retrying, or `None` when the attempts are exhausted
    pub fn retry_delay(&self, attempts_made: u32) -> Option<u64> {
        if attempts_made >= self.attempts {
            return None;
        }
        Some(self.backoff.map(|b| b.delay_for(attempts_made)).unwrap_or(0))
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::new(1)
    }
}
