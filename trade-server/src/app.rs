use std::sync::Arc;

use anyhow::Result;
use prometheus::Registry;
use trade_queue::{QueueMetrics, ShutdownHooks};

use crate::config::AppConfig;
use crate::publishers::{PublisherRegistry, QueueSettings};
use crate::reporting::{ErrorReporter, TracingReporter};
use crate::trades::{InMemoryTradeRepository, TradeRepository};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub trades: Arc<dyn TradeRepository>,
    pub publishers: Arc<PublisherRegistry>,
    pub metrics: QueueMetrics,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Composition root: state for the handlers plus the hooks to run on exit
pub struct Services {
    pub state: AppState,
    pub hooks: ShutdownHooks,
}

pub fn build(config: AppConfig) -> Result<Services> {
    build_with(config, Arc::new(InMemoryTradeRepository::new()), Arc::new(TracingReporter))
}

/// [`build`] with the data-access and reporting seams supplied by the caller
pub fn build_with(
    config: AppConfig,
    trades: Arc<dyn TradeRepository>,
    reporter: Arc<dyn ErrorReporter>,
) -> Result<Services> {
    let metrics = QueueMetrics::new(Registry::new())?;
    let hooks = ShutdownHooks::new();
    let publishers = PublisherRegistry::new(QueueSettings::from(&config), metrics.clone(), hooks.clone());

    Ok(Services {
        state: AppState {
            config: Arc::new(config),
            trades,
            publishers: Arc::new(publishers),
            metrics,
            reporter,
        },
        hooks,
    })
}
