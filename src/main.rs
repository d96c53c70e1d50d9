use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use crosschain_feed::feed::poller::{PollerConfig, TransactionPoller};
use crosschain_feed::feed::reconciler::FeedReconciler;
use crosschain_feed::feed::store::{FeedObserver, FeedStore};
use crosschain_feed::feed::view::FeedStats;
use crosschain_feed::metrics::Metrics;
use crosschain_feed::models::common::chain_name;
use crosschain_feed::source::hypersync::HyperSyncSource;
use crosschain_feed::source::fetch_multi_chain;
use crosschain_feed::utils::format::{format_ether, format_hash};
use crosschain_feed::utils::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config = match load_config("config.yml") {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(anyhow!(e));
        }
    };

    let address = config.address;
    let chain_ids = config.chain_ids();

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        Some(Arc::new(Metrics::new()?))
    } else {
        info!("Metrics are disabled");
        None
    };

    // Start metrics server if metrics are enabled
    if let Some(metrics_instance) = &metrics {
        metrics_instance
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
    }

    let source = Arc::new(HyperSyncSource::new(&config.chains, metrics.clone())?);
    let mut store = FeedStore::new(FeedReconciler::new(config.feed_cap)?, metrics.clone());

    // Log every feed update
    tokio::spawn(log_feed_updates(store.subscribe()));

    println!();
    info!("========================== LOADING FEED ============================");
    info!("Address: {}", address);

    // Seed the feed with recent history from every chain
    let initial = fetch_multi_chain(
        source.as_ref(),
        address,
        &chain_ids,
        0,
        config.initial_fetch_limit,
    )
    .await;
    info!("Loaded {} transactions", initial.len());
    store.set_initial(initial)?;

    println!();
    info!("========================= STARTING POLLER ==========================");

    let poller_config = PollerConfig {
        address,
        chain_ids,
        interval: config.poll_interval(),
        fetch_limit: config.poll_fetch_limit,
    };
    let mut poller = TransactionPoller::new(source, poller_config, metrics);

    // The poller callback is the only writer of the feed from here on
    poller.start(move |batch| {
        if let Err(e) = store.merge(batch) {
            error!("Rejected poll batch: {}", e);
        }
    })?;

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C signal, initiating shutdown...");
    poller.stop().await;

    Ok(())
}

async fn log_feed_updates(mut observer: FeedObserver) {
    while let Some(snapshot) = observer.changed().await {
        let stats = FeedStats::from_records(&snapshot);
        info!(
            "Feed: {} transactions across {} chains ({}% successful)",
            stats.total, stats.chains, stats.success_rate
        );

        if let Some(latest) = snapshot.first() {
            info!(
                "Latest: {} on {} block {} value {} ETH ({:?})",
                format_hash(&latest.hash, 6),
                chain_name(latest.chain_id),
                latest.block_number,
                format_ether(latest.value, 4),
                latest.status
            );
        }
    }
}
