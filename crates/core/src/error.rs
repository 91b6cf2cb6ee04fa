//! Error kinds surfaced by the decision core.
//!
//! Recovered conditions (state drift, reorgs, unpostable attestations) are
//! not errors: they are logged and handled in place. What remains here is
//! what callers must react to.

use thiserror::Error;

use crate::market::MarketId;

#[derive(Debug, Error)]
pub enum Error {
    /// A market's borrow index was read before being populated. Fatal for
    /// the scan that hit it.
    #[error("borrow index for {0} read before initialization")]
    UninitializedIndex(MarketId),

    /// A chain read failed after exhausting its retry budget.
    #[error("chain read failed: {0}")]
    ChainRead(String),

    /// No fresh price is cached for the market.
    #[error("no fresh price for {0}")]
    StalePrice(MarketId),

    /// A decimal literal could not be parsed.
    #[error("invalid decimal literal: {0:?}")]
    InvalidDecimal(String),

    /// The RPC endpoint reports a different chain than configured.
    #[error("unknown chain id {0}")]
    UnknownChain(u64),
}

pub type Result<T> = std::result::Result<T, Error>;
