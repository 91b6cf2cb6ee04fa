//! Sentinel
//!
//! Liquidation bot for Compound v2 style money markets:
//! - Event-driven borrower replica fed by websocket cToken subscriptions
//! - Exact fixed-point health evaluation and repay/seize pair selection
//! - Oracle attestation assembly for the on-chain liquidation entry point
//!
//! Configuration loads from a TOML file selected by the CONFIG env var
//! (default config/default.toml). Transaction construction and submission
//! are downstream concerns: candidates are logged at the executor boundary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel_chain::{RpcChainReader, RpcMarketRegistry, WsEventSource};
use sentinel_core::{
    BorrowerRegistry, BotConfig, ChainReader, EventApplier, EventSource, StreamRecovery,
};
use sentinel_feed::{FeedPriceLedger, ReporterClient};

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "CONFIG";

/// Price cache refresh cadence.
const FEED_REFRESH_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sentinel_core=debug,sentinel_chain=debug")
        }))
        .init();

    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config/default.toml".to_string());
    info!(path = %config_path, "Loading configuration");
    let config = BotConfig::from_file(&config_path)?;
    config.log_config();

    run(config).await
}

async fn run(config: BotConfig) -> Result<()> {
    let markets = Arc::new(config.markets.market_map());
    if markets.is_empty() {
        anyhow::bail!("no markets configured");
    }

    // Collaborators.
    let reader: Arc<dyn ChainReader> = Arc::new(
        RpcChainReader::connect(
            &config.chain.rpc_http,
            config.chain.chain_id,
            markets.clone(),
            config.stream.backoff,
        )
        .await?,
    );
    let source: Arc<dyn EventSource> =
        Arc::new(WsEventSource::new(&config.chain.rpc_ws, markets.clone()));
    let market_registry = Arc::new(RpcMarketRegistry::new(
        &config.chain.rpc_http,
        config.markets.comptroller,
        markets.clone(),
        config.stream.backoff,
    ));
    let ledger = Arc::new(FeedPriceLedger::new(
        ReporterClient::new(&config.feed.endpoint),
        &config.feed,
    ));

    market_registry.refresh().await?;
    if let Err(e) = ledger.refresh().await {
        warn!(error = %e, "initial price refresh failed, scans will wait for prices");
    }

    // Registry bootstrap: index table at head, then the watch list.
    let registry = Arc::new(BorrowerRegistry::new(reader, &config.scan));
    let head = registry.init().await?;
    registry.register(&config.watch.addresses).await?;
    market_registry.prime_membership(&config.watch.addresses).await?;

    let stats = registry.stats();
    info!(
        head,
        watched = stats.watched,
        indexes = stats.indexes_initialized,
        "Bootstrap complete"
    );

    // Event ingestion, resubscribing per the configured recovery policy.
    let applier = Arc::new(EventApplier::new(
        registry.clone(),
        markets.clone(),
        config.watch.refetch_on_drift,
    ));
    let stream_config = config.stream.clone();
    let ingestion = {
        let applier = applier.clone();
        let source = source.clone();
        tokio::spawn(async move {
            if let Err(e) = applier.run(source, head, &stream_config).await {
                error!(error = %e, "event ingestion terminated");
            }
        })
    };

    // Background price refresh.
    {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(FEED_REFRESH_SECS));
            loop {
                ticker.tick().await;
                if let Err(e) = ledger.refresh().await {
                    warn!(error = %e, "price refresh failed");
                }
            }
        });
    }

    // Scan cycle: enumerate candidates and hand them to the executor
    // boundary.
    info!(interval_secs = config.scan.interval_secs, "Starting scan loop");
    let mut ticker = interval(config.scan.interval());
    loop {
        ticker.tick().await;

        if ingestion.is_finished() && config.stream.recovery == StreamRecovery::Fatal {
            anyhow::bail!("event ingestion stopped and recovery is fatal");
        }

        match registry
            .scan(market_registry.as_ref(), ledger.as_ref())
            .await
        {
            Ok(candidates) => {
                if candidates.is_empty() {
                    debug!("no liquidation candidates");
                }
                for candidate in &candidates {
                    info!(
                        account = %candidate.address,
                        repay = %candidate.repay_market,
                        seize = %candidate.seize_market,
                        revenue_eth = %candidate.expected_revenue_eth,
                        attested = ?candidate.prices_to_report.symbols,
                        "LIQUIDATION candidate ready for executor"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "scan failed");
            }
        }
    }
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
  ███████╗███████╗███╗   ██╗████████╗██╗███╗   ██╗███████╗██╗
  ██╔════╝██╔════╝████╗  ██║╚══██╔══╝██║████╗  ██║██╔════╝██║
  ███████╗█████╗  ██╔██╗ ██║   ██║   ██║██╔██╗ ██║█████╗  ██║
  ╚════██║██╔══╝  ██║╚██╗██║   ██║   ██║██║╚██╗██║██╔══╝  ██║
  ███████║███████╗██║ ╚████║   ██║   ██║██║ ╚████║███████╗███████╗
  ╚══════╝╚══════╝╚═╝  ╚═══╝   ╚═╝   ╚═╝╚═╝  ╚═══╝╚══════╝╚══════╝

                 compound market watchdog v0.3.0
"#
    );
}
