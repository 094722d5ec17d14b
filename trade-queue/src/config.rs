//! Queue settings resolved once at startup: deployment tier, topic queue
//! names, broker address and the retry policy used by publishers.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Backoff, BackoffKind, JobOptions, QueueError, QueueResult};

/// Deployment tier, decides which queue names a process uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Test,
    Staging,
    Production,
}

impl Tier {
    /// Read `APP_ENV`; unknown or missing values mean production
    pub fn from_env() -> Self {
        std::env::var("APP_ENV").map(|v| Self::parse(&v)).unwrap_or(Self::Production)
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "test" => Self::Test,
            "staging" | "stg" => Self::Staging,
            _ => Self::Production,
        }
    }

    /// Queue name for `topic` on this tier, e.g. `stg_slack_queue`
    pub fn queue_name(&self, topic: Topic) -> String {
        let base = topic.queue_base();
        match self {
            Self::Production => base.to_string(),
            Self::Staging => format!("stg_{base}"),
            Self::Test => format!("test_{base}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification topic; one queue per topic per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Slack,
    Email,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Slack, Topic::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Email => "email",
        }
    }

    fn queue_base(&self) -> &'static str {
        match self {
            Self::Slack => "slack_queue",
            Self::Email => "email_queue",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slack" => Ok(Self::Slack),
            "email" => Ok(Self::Email),
            other => Err(QueueError::Config(format!("unknown topic: {other}"))),
        }
    }
}

/// Broker connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,

    /// Resolve `host` to an IPv4 address before connecting
    pub ipv4_only: bool,

    /// Leading segment of every queue key
    pub key_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            ipv4_only: true,
            key_prefix: "bull".to_string(),
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ipv4_only", &self.ipv4_only)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl BrokerConfig {
    /// Build from `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD` and
    /// `REDIS_KEY_PREFIX`, falling back to the defaults
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();

        let port = match std::env::var("REDIS_PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| QueueError::Config(format!("invalid REDIS_PORT: {raw}")))?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            host: std::env::var("REDIS_HOST").unwrap_or(defaults.host),
            port,
            password: std::env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            ipv4_only: true,
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        })
    }

    /// Host to dial; with `ipv4_only` a hostname is resolved to its first
    /// IPv4 address
    pub async fn resolve_host(&self) -> QueueResult<String> {
        if !self.ipv4_only || self.host.parse::<IpAddr>().is_ok() {
            return Ok(self.host.clone());
        }

        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| QueueError::Broker(format!("failed to resolve {}: {e}", self.host)))?;

        addrs
            .map(|addr| addr.ip())
            .find(IpAddr::is_ipv4)
            .map(|ip| ip.to_string())
            .ok_or_else(|| QueueError::Broker(format!("no IPv4 address for {}", self.host)))
    }

    pub async fn connection_url(&self) -> QueueResult<String> {
        let host = self.resolve_host().await?;
        let auth = self
            .password
            .as_ref()
            .map(|password| format!(":{password}@"))
            .unwrap_or_default();
        Ok(format!("redis://{auth}{host}:{}/", self.port))
    }
}

/// Attempts and backoff attached to every published job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// 3 attempts, exponential backoff from 30 seconds
    pub const ANNOUNCE: RetryPolicy = RetryPolicy {
        attempts: 3,
        backoff: Backoff { kind: BackoffKind::Exponential, delay: 30_000 },
    };

    pub fn job_options(&self) -> JobOptions {
        JobOptions::new(self.attempts).with_backoff(self.backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ANNOUNCE
    }
}
