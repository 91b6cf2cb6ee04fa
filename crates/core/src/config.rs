//! Runtime configuration.
//!
//! All deployment parameters load from a TOML file: chain endpoints, the
//! comptroller and per-market cToken addresses, the initial watch list, scan
//! timing, stream recovery policy, and price feed settings. Every field has
//! a serde default so partial files work. There is no global config
//! singleton; the registry and collaborators receive plain values.

use std::time::Duration;

use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::market::{MarketId, MarketMap};
use crate::math::Dec;

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotConfig {
    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub markets: MarketsConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub feed: FeedConfig,
}

/// Chain endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Expected chain id; startup fails on mismatch.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    #[serde(default = "default_rpc_http")]
    pub rpc_http: String,

    #[serde(default = "default_rpc_ws")]
    pub rpc_ws: String,
}

fn default_chain_id() -> u64 {
    1
}
fn default_rpc_http() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_rpc_ws() -> String {
    "ws://127.0.0.1:8546".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            rpc_http: default_rpc_http(),
            rpc_ws: default_rpc_ws(),
        }
    }
}

/// Deployed market addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsConfig {
    #[serde(default = "default_comptroller")]
    pub comptroller: Address,

    /// cToken address per market id.
    #[serde(default)]
    pub ctokens: Vec<MarketEntry>,
}

fn default_comptroller() -> Address {
    // Mainnet Unitroller.
    address!("3d9819210a31b4961b30ef54be2aed79b9c9cd3b")
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            comptroller: default_comptroller(),
            ctokens: Vec::new(),
        }
    }
}

impl MarketsConfig {
    pub fn market_map(&self) -> MarketMap {
        MarketMap::new(self.ctokens.iter().map(|e| (e.market, e.ctoken)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEntry {
    pub market: MarketId,
    pub ctoken: Address,
}

/// Watched address set behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Addresses registered at startup.
    #[serde(default)]
    pub addresses: Vec<Address>,

    /// Refetch an account from chain after a state-drift warning.
    #[serde(default = "default_refetch_on_drift")]
    pub refetch_on_drift: bool,
}

fn default_refetch_on_drift() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            refetch_on_drift: default_refetch_on_drift(),
        }
    }
}

/// Scan cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,

    /// Concurrent chain reads during hydration and rate snapshots.
    #[serde(default = "default_snapshot_concurrency")]
    pub snapshot_concurrency: usize,

    /// Candidates below this expected revenue are logged but not reported.
    #[serde(default)]
    pub min_revenue_eth: Dec,
}

fn default_scan_interval() -> u64 {
    15
}
fn default_snapshot_concurrency() -> usize {
    8
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval(),
            snapshot_concurrency: default_snapshot_concurrency(),
            min_revenue_eth: Dec::ZERO,
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// What to do when the event stream ends or errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRecovery {
    /// Resubscribe with backoff (default).
    Reconnect,
    /// Treat permanent stream failure as fatal.
    Fatal,
}

/// Event stream and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_recovery")]
    pub recovery: StreamRecovery,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_recovery() -> StreamRecovery {
    StreamRecovery::Reconnect
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            recovery: default_recovery(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Bounded exponential backoff, shared by RPC retries and resubscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,

    #[serde(default = "default_backoff_attempts")]
    pub max_attempts: u32,
}

fn default_backoff_base_ms() -> u64 {
    250
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_backoff_attempts() -> u32 {
    6
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            max_attempts: default_backoff_attempts(),
        }
    }
}

impl BackoffConfig {
    /// Delay before the given retry attempt (0-based), doubling up to the
    /// cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(exp.min(self.max_ms))
    }
}

/// Price feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Reporter endpoint serving signed price messages.
    #[serde(default = "default_feed_endpoint")]
    pub endpoint: String,

    /// Messages older than this are not postable.
    #[serde(default = "default_feed_max_age")]
    pub max_age_secs: u64,

    /// Maximum relative deviation between a fresh message price and the
    /// price the evaluation used (e.g. 0.05 = 5%).
    #[serde(default = "default_feed_deviation")]
    pub max_deviation: Dec,
}

fn default_feed_endpoint() -> String {
    "https://api.pro.coinbase.com/oracle".to_string()
}
fn default_feed_max_age() -> u64 {
    300
}
fn default_feed_deviation() -> Dec {
    "0.05".parse().expect("static literal")
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_feed_endpoint(),
            max_age_secs: default_feed_max_age(),
            max_deviation: default_feed_deviation(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Log the loaded configuration.
    pub fn log_config(&self) {
        tracing::info!(
            chain_id = self.chain.chain_id,
            rpc_http = %self.chain.rpc_http,
            rpc_ws = %self.chain.rpc_ws,
            "Chain endpoints"
        );
        tracing::info!(
            comptroller = %self.markets.comptroller,
            markets = self.markets.ctokens.len(),
            watched = self.watch.addresses.len(),
            "Deployment"
        );
        tracing::info!(
            scan_interval_secs = self.scan.interval_secs,
            snapshot_concurrency = self.scan.snapshot_concurrency,
            min_revenue_eth = %self.scan.min_revenue_eth,
            recovery = ?self.stream.recovery,
            "Scan settings"
        );
    }
}
