//! Conduit Relayer - single-account transaction dispatcher
//!
//! Issues and dispatches contract transactions for one signing account,
//! guaranteeing collision-free nonce assignment under concurrent senders and
//! safe fee-boosted resends for stalled transactions.

use anyhow::Result;
use ethers::utils::format_ether;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod contract;
mod error;
mod events;
mod metrics;
mod tx;

use chain::ChainContext;
use config::Settings;
use metrics::MetricsServer;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Conduit Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for chain {} ({} contracts)",
        settings.chain.name,
        settings.contracts.len()
    );

    // Wire provider, registry, account, dispatcher and watcher
    let context = ChainContext::new(&settings).await?;
    let dispatcher = context.dispatcher();
    let provider = context.provider();
    info!("Chain context initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let dispatcher = dispatcher.clone();
        let provider = provider.clone();
        async move {
            if let Err(e) = api::run_server(api_config, dispatcher, provider).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start event watcher
    let watcher_handle = context.watcher().map(|watcher| {
        tokio::spawn(async move {
            if let Err(e) = watcher.watch().await {
                error!("Event watcher error: {}", e);
            }
        })
    });

    // Account monitoring loop: balance and ledger gauges, low-balance alert
    let monitor_handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let min_balance = settings.wallet.min_balance_eth;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;

                metrics::record_next_nonce(dispatcher.next_nonce().await);

                match dispatcher.balance().await {
                    Ok(balance) => {
                        let eth: f64 = format_ether(balance).parse().unwrap_or(0.0);
                        metrics::record_wallet_balance(eth);
                        if eth < min_balance {
                            warn!(
                                "Signing account balance {:.4} ETH below threshold {:.4}",
                                eth, min_balance
                            );
                        }
                    }
                    Err(e) => warn!("Balance check failed: {}", e),
                }
            }
        }
    });

    info!("Conduit Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    monitor_handle.abort();
    if let Some(h) = watcher_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Conduit Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,conduit_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
