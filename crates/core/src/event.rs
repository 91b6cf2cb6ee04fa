//! Decoded market events.
//!
//! The event source delivers one [`MarketEvent`] per decoded cToken log,
//! tagged with its chain position and confirmation status. Kinds are a flat
//! enum; the applier dispatches with a single match.

use alloy::primitives::Address;

use crate::market::MarketId;
use crate::math::Dec;

/// Confirmation status of a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Confirmed,
    /// A previously delivered event invalidated by a reorg.
    Reverted,
}

/// A decoded cToken log with its chain position.
#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub market: MarketId,
    pub block_number: u64,
    pub log_index: u64,
    pub status: EventStatus,
    pub kind: EventKind,
}

/// Payload of a market event. Amounts are already converted to [`Dec`] in
/// the units noted per variant.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// New accrual index for the market (1e18 mantissa on the wire).
    AccrueInterest { borrow_index: Dec },
    /// `mint_tokens` is the minted cToken amount.
    Mint { minter: Address, mint_tokens: Dec },
    /// `redeem_tokens` is the burned cToken amount.
    Redeem { redeemer: Address, redeem_tokens: Dec },
    /// `account_borrows` is the borrower's post-event total owed underlying.
    Borrow {
        borrower: Address,
        borrow_amount: Dec,
        account_borrows: Dec,
    },
    RepayBorrow {
        borrower: Address,
        repay_amount: Dec,
        account_borrows: Dec,
    },
    /// Seizure of `seize_tokens` cTokens in `collateral_market`. The debt
    /// side arrives as the preceding `RepayBorrow` on the debt market.
    LiquidateBorrow {
        borrower: Address,
        seize_tokens: Dec,
        collateral_market: MarketId,
    },
    /// cToken transfer. Mint/redeem/seize emit paired transfers that the
    /// applier deduplicates.
    Transfer {
        from: Address,
        to: Address,
        tokens: Dec,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AccrueInterest { .. } => "AccrueInterest",
            EventKind::Mint { .. } => "Mint",
            EventKind::Redeem { .. } => "Redeem",
            EventKind::Borrow { .. } => "Borrow",
            EventKind::RepayBorrow { .. } => "RepayBorrow",
            EventKind::LiquidateBorrow { .. } => "LiquidateBorrow",
            EventKind::Transfer { .. } => "Transfer",
        }
    }

    /// Accounts whose replica this event can touch.
    pub fn touched_accounts(&self) -> impl Iterator<Item = Address> + '_ {
        let (a, b) = match self {
            EventKind::AccrueInterest { .. } => (None, None),
            EventKind::Mint { minter, .. } => (Some(*minter), None),
            EventKind::Redeem { redeemer, .. } => (Some(*redeemer), None),
            EventKind::Borrow { borrower, .. } => (Some(*borrower), None),
            EventKind::RepayBorrow { borrower, .. } => (Some(*borrower), None),
            EventKind::LiquidateBorrow { borrower, .. } => (Some(*borrower), None),
            EventKind::Transfer { from, to, .. } => (Some(*from), Some(*to)),
        };
        a.into_iter().chain(b)
    }
}
