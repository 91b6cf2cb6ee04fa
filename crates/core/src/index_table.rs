//! Latest observed accrual index per market.

use tracing::debug;

use crate::error::{Error, Result};
use crate::market::{MarketId, PerMarket};
use crate::math::Dec;

/// Table of the most recent borrow index seen per market.
///
/// The table does not enforce monotonicity: the applier rejects regressing
/// `AccrueInterest` events before they get here, and reorg recovery is
/// allowed to rewrite entries wholesale.
#[derive(Debug, Clone, Default)]
pub struct BorrowIndexTable {
    entries: PerMarket<Option<Dec>>,
}

impl BorrowIndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current index for the market.
    pub fn get(&self, market: MarketId) -> Result<Dec> {
        self.entries[market].ok_or(Error::UninitializedIndex(market))
    }

    /// Unconditional write.
    pub fn set(&mut self, market: MarketId, index: Dec) {
        debug!(market = %market, index = %index, "borrow index updated");
        self.entries[market] = Some(index);
    }

    /// Write only if `index` is above the current entry (or the entry is
    /// unset). Used when folding hydration snapshots in.
    pub fn set_max(&mut self, market: MarketId, index: Dec) {
        match self.entries[market] {
            Some(current) if current >= index => {}
            _ => self.set(market, index),
        }
    }

    pub fn is_initialized(&self, market: MarketId) -> bool {
        self.entries[market].is_some()
    }

    pub fn initialized_count(&self) -> usize {
        self.entries.iter().filter(|(_, e)| e.is_some()).count()
    }
}
