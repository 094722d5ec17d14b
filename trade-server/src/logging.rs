use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Install the global subscriber; `RUST_LOG` wins over the `info` default
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // A second init (tests, embedding) keeps the first subscriber
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}
