//! Collaborator interfaces consumed by the decision core.
//!
//! The core never talks to the chain, the comptroller, or the price feed
//! directly; it consumes these traits. Production implementations live in
//! the `sentinel-chain` and `sentinel-feed` crates, tests use in-crate
//! mocks.

use std::pin::Pin;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::event::MarketEvent;
use crate::market::MarketId;
use crate::math::Dec;

/// One market's view of an account, as read from chain during hydration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountSnapshot {
    /// cToken balance.
    pub supplied: Dec,
    /// Current owed underlying.
    pub borrow_balance: Dec,
    /// Market borrow index at `at_block`. The pair (`borrow_balance`,
    /// `borrow_index`) seeds the principal/index-snapshot replica fields.
    pub borrow_index: Dec,
}

/// On-demand storage reads against the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    async fn borrow_index(&self, market: MarketId, at_block: u64) -> Result<Dec>;

    async fn exchange_rate_stored(&self, market: MarketId, at_block: u64) -> Result<Dec>;

    async fn account_snapshot(
        &self,
        market: MarketId,
        account: Address,
        at_block: u64,
    ) -> Result<AccountSnapshot>;
}

pub type EventStream = Pin<Box<dyn Stream<Item = MarketEvent> + Send>>;

/// Stream of decoded market events from a starting block onward.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, from_block: u64) -> Result<EventStream>;
}

/// Comptroller-wide risk parameters and per-account market membership.
/// Implementations serve from cache; these calls never suspend.
pub trait MarketRegistry: Send + Sync {
    fn collateral_factor(&self, market: MarketId) -> Dec;

    fn close_factor(&self) -> Dec;

    fn liquidation_incentive(&self) -> Dec;

    /// Whether the account has entered the market as collateral.
    fn is_collateral(&self, account: &Address, market: MarketId) -> bool;
}

/// Signed oracle price messages in the shape the on-chain liquidation entry
/// point accepts.
#[derive(Debug, Clone, Default)]
pub struct PostableAttestations {
    pub messages: Vec<Bytes>,
    pub signatures: Vec<Bytes>,
    pub symbols: Vec<String>,
}

/// Per-asset prices and postable attestations.
#[async_trait]
pub trait PriceLedger: Send + Sync {
    /// Cached price of the market's underlying in ETH units. Never
    /// suspends.
    fn price(&self, market: MarketId) -> Result<Dec>;

    /// Assemble attestations for `symbols`, valid against the prices
    /// (`edges`) the evaluation used. `None` when the message set is stale
    /// or has drifted from the edges.
    async fn postable_format(
        &self,
        symbols: &[&'static str],
        edges: &[Dec],
    ) -> Option<PostableAttestations>;
}
