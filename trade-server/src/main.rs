use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use trade_queue::WorkerOptions;
use trade_server::{consumers, logging, AppConfig};

/// What this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// HTTP controllers only
    Serve,
    /// Queue consumers only
    Worker,
    /// Both, sharing the in-process queues
    All,
}

#[derive(Debug, Parser)]
#[command(name = "trade-server", about = "Trade notification backend")]
struct Cli {
    #[arg(value_enum, default_value_t = Role::All)]
    role: Role,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env()?;
    logging::init(config.log_format);
    info!(role = ?cli.role, tier = %config.tier, backend = ?config.backend, "starting");

    let services = trade_server::build(config.clone())?;
    let state = services.state.clone();

    let workers = match cli.role {
        Role::Worker | Role::All => Some(
            consumers::start(&config, &state.publishers, state.reporter.clone(), WorkerOptions::default()).await?,
        ),
        Role::Serve => None,
    };

    match cli.role {
        Role::Serve | Role::All => {
            let addr = config.http_addr();
            let listener = TcpListener::bind(&addr).await?;
            info!("listening on http://{addr}");
            axum::serve(listener, trade_server::router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Role::Worker => {
            let addr = config.metrics_addr();
            let listener = TcpListener::bind(&addr).await?;
            info!("serving metrics on http://{addr}/metrics");
            axum::serve(listener, trade_server::metrics_router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    if let Some(workers) = workers {
        workers.shutdown().await;
    }
    services.hooks.run_all().await;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
