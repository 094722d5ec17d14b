use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use trade_queue::{observability::DEFAULT_POLL_INTERVAL, BrokerConfig, Tier};

/// Where queue state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process; jobs are only visible inside this process
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => bail!("unknown QUEUE_BACKEND: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Slack incoming webhook; without a URL announcements are only logged
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
    pub channel: Option<String>,
}

/// HTTP email API; without a URL mails are only logged
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
    /// Link to the trade page, `{id}` is replaced by the trade id
    pub trade_link: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            from: "Trade Machine <tradebot@trades.local>".to_string(),
            trade_link: "http://localhost:3030/trades/{id}".to_string(),
        }
    }
}

/// Process configuration, read once at startup and passed down
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tier: Tier,
    pub backend: BackendKind,
    pub broker: BrokerConfig,
    pub http_host: String,
    pub http_port: u16,
    /// Port of the metrics-only listener run by the worker role
    pub metrics_port: u16,
    pub slack: SlackConfig,
    pub email: EmailConfig,
    pub metrics_poll_interval: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// In-process setup on the test tier, used by tests and local runs
    pub fn local() -> Self {
        Self {
            tier: Tier::Test,
            backend: BackendKind::Memory,
            broker: BrokerConfig::default(),
            http_host: "127.0.0.1".to_string(),
            http_port: 3030,
            metrics_port: 9464,
            slack: SlackConfig::default(),
            email: EmailConfig::default(),
            metrics_poll_interval: DEFAULT_POLL_INTERVAL,
            log_format: LogFormat::Pretty,
        }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::local();

        let backend = match env::var("QUEUE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => BackendKind::Redis,
        };

        let http_port = match env::var("HTTP_PORT") {
            Ok(raw) => raw.parse().with_context(|| format!("invalid HTTP_PORT: {raw}"))?,
            Err(_) => defaults.http_port,
        };

        let metrics_port = match env::var("METRICS_PORT") {
            Ok(raw) => raw.parse().with_context(|| format!("invalid METRICS_PORT: {raw}"))?,
            Err(_) => defaults.metrics_port,
        };

        let metrics_poll_interval = match env::var("METRICS_POLL_INTERVAL_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse().with_context(|| format!("invalid METRICS_POLL_INTERVAL_SECS: {raw}"))?,
            ),
            Err(_) => defaults.metrics_poll_interval,
        };

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            tier: Tier::from_env(),
            backend,
            broker: BrokerConfig::from_env()?,
            http_host: env::var("HTTP_HOST").unwrap_or(defaults.http_host),
            http_port,
            metrics_port,
            slack: SlackConfig {
                webhook_url: non_empty("SLACK_WEBHOOK_URL"),
                channel: non_empty("SLACK_CHANNEL"),
            },
            email: EmailConfig {
                api_url: non_empty("EMAIL_API_URL"),
                api_key: non_empty("EMAIL_API_KEY"),
                from: env::var("EMAIL_FROM").unwrap_or(defaults.email.from),
                trade_link: env::var("TRADE_LINK_TEMPLATE").unwrap_or(defaults.email.trade_link),
            },
            metrics_poll_interval,
            log_format,
        })
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.metrics_port)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!(" Redis ".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert!("kafka".parse::<BackendKind>().is_err());
    }

    #[test]
    fn local_config_uses_memory_on_test_tier() {
        let config = AppConfig::local();
        assert_eq!(config.tier, Tier::Test);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.http_addr(), "127.0.0.1:3030");
        assert_eq!(config.metrics_addr(), "127.0.0.1:9464");
        assert_eq!(config.metrics_poll_interval, Duration::from_secs(60));
    }
}
