//! Per-account replica of borrow and supply positions.
//!
//! One [`BorrowerState`] per watched address, created on registration,
//! hydrated once from a chain snapshot, and afterwards mutated only by the
//! event applier. Owed underlying is reconstructed lazily as
//! `borrow_principal * current_index / index_at_principal`; the replica
//! itself stores the principal and the index snapshot taken when the
//! principal was last written.

use alloy::primitives::Address;
use tracing::warn;

use crate::interfaces::AccountSnapshot;
use crate::market::{MarketId, PerMarket};
use crate::math::Dec;

/// One market's slice of a borrower's position.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketPosition {
    /// cToken balance held.
    pub supplied: Dec,
    /// Borrowed underlying normalized by `index_at_principal`.
    pub borrow_principal: Dec,
    /// Market borrow index at the last principal write. Zero iff
    /// `borrow_principal` is zero.
    pub index_at_principal: Dec,
}

impl MarketPosition {
    pub fn is_empty(&self) -> bool {
        self.supplied.is_zero() && self.borrow_principal.is_zero()
    }
}

/// Replica of a single watched account across all markets.
#[derive(Debug, Clone)]
pub struct BorrowerState {
    pub address: Address,
    positions: PerMarket<MarketPosition>,
    /// Highest block whose events have been applied.
    pub last_updated_block: u64,
}

impl BorrowerState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            positions: PerMarket::default(),
            last_updated_block: 0,
        }
    }

    pub fn position(&self, market: MarketId) -> &MarketPosition {
        &self.positions[market]
    }

    /// Whether the account holds anything worth evaluating.
    pub fn has_exposure(&self) -> bool {
        self.positions.iter().any(|(_, p)| !p.is_empty())
    }

    /// Overwrite one market from a chain snapshot (hydration and reorg
    /// recovery). The snapshot's borrow balance is current owed, so the
    /// index snapshot is the market index at the read block.
    pub fn load_snapshot(&mut self, market: MarketId, snapshot: &AccountSnapshot, block: u64) {
        let position = &mut self.positions[market];
        position.supplied = snapshot.supplied;
        if snapshot.borrow_balance.is_zero() {
            position.borrow_principal = Dec::ZERO;
            position.index_at_principal = Dec::ZERO;
        } else {
            position.borrow_principal = snapshot.borrow_balance;
            position.index_at_principal = snapshot.borrow_index;
        }
        self.bump_block(block);
    }

    /// `Mint`: credit freshly minted cTokens.
    pub fn apply_mint(&mut self, market: MarketId, mint_tokens: Dec, block: u64) {
        self.positions[market].supplied += mint_tokens;
        self.bump_block(block);
    }

    /// `Redeem`: burn cTokens, saturating at zero. Returns `true` when the
    /// balance drifted (redeem exceeded the replica's supply).
    pub fn apply_redeem(&mut self, market: MarketId, redeem_tokens: Dec, block: u64) -> bool {
        let drifted = self.debit_supplied(market, redeem_tokens, "redeem");
        self.bump_block(block);
        drifted
    }

    /// `Borrow` / `RepayBorrow`: both rewrite the principal to the event's
    /// post-action total and snapshot the current market index. A zero total
    /// clears the index snapshot too, keeping the both-zero invariant.
    pub fn apply_borrow_snapshot(
        &mut self,
        market: MarketId,
        account_borrows: Dec,
        borrow_index: Dec,
        block: u64,
    ) {
        let position = &mut self.positions[market];
        if account_borrows.is_zero() {
            position.borrow_principal = Dec::ZERO;
            position.index_at_principal = Dec::ZERO;
        } else {
            position.borrow_principal = account_borrows;
            position.index_at_principal = borrow_index;
        }
        self.bump_block(block);
    }

    /// `LiquidateBorrow`: collateral seizure on the collateral market. The
    /// debt side was already applied by the preceding `RepayBorrow`.
    pub fn apply_seize(&mut self, collateral: MarketId, seize_tokens: Dec, block: u64) -> bool {
        let drifted = self.debit_supplied(collateral, seize_tokens, "seize");
        self.bump_block(block);
        drifted
    }

    /// Incoming side of a user-to-user cToken transfer.
    pub fn apply_transfer_in(&mut self, market: MarketId, tokens: Dec, block: u64) {
        self.positions[market].supplied += tokens;
        self.bump_block(block);
    }

    /// Outgoing side of a user-to-user cToken transfer.
    pub fn apply_transfer_out(&mut self, market: MarketId, tokens: Dec, block: u64) -> bool {
        let drifted = self.debit_supplied(market, tokens, "transfer");
        self.bump_block(block);
        drifted
    }

    fn debit_supplied(&mut self, market: MarketId, tokens: Dec, action: &'static str) -> bool {
        let position = &mut self.positions[market];
        match position.supplied.checked_sub(tokens) {
            Some(remaining) => {
                position.supplied = remaining;
                false
            }
            None => {
                warn!(
                    account = %self.address,
                    market = %market,
                    action,
                    supplied = %position.supplied,
                    debit = %tokens,
                    "state drift: debit exceeds replica supply, saturating to zero"
                );
                position.supplied = Dec::ZERO;
                true
            }
        }
    }

    fn bump_block(&mut self, block: u64) {
        if block > self.last_updated_block {
            self.last_updated_block = block;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Dec {
        s.parse().unwrap()
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_mint_and_redeem() {
        let mut state = BorrowerState::new(addr(1));
        state.apply_mint(MarketId::CDai, dec("100"), 10);
        assert_eq!(state.position(MarketId::CDai).supplied, dec("100"));

        let drifted = state.apply_redeem(MarketId::CDai, dec("40"), 11);
        assert!(!drifted);
        assert_eq!(state.position(MarketId::CDai).supplied, dec("60"));
        assert_eq!(state.last_updated_block, 11);
    }

    #[test]
    fn test_redeem_saturates_and_reports_drift() {
        let mut state = BorrowerState::new(addr(1));
        state.apply_mint(MarketId::CDai, dec("5"), 10);

        let drifted = state.apply_redeem(MarketId::CDai, dec("7"), 11);
        assert!(drifted);
        assert_eq!(state.position(MarketId::CDai).supplied, Dec::ZERO);
    }

    #[test]
    fn test_borrow_snapshot_sets_both_fields() {
        let mut state = BorrowerState::new(addr(1));
        state.apply_borrow_snapshot(MarketId::CUsdc, dec("250"), dec("1.1"), 20);

        let position = state.position(MarketId::CUsdc);
        assert_eq!(position.borrow_principal, dec("250"));
        assert_eq!(position.index_at_principal, dec("1.1"));
    }

    #[test]
    fn test_full_repay_clears_index_snapshot() {
        let mut state = BorrowerState::new(addr(1));
        state.apply_borrow_snapshot(MarketId::CUsdc, dec("250"), dec("1.1"), 20);
        state.apply_borrow_snapshot(MarketId::CUsdc, Dec::ZERO, dec("1.2"), 21);

        let position = state.position(MarketId::CUsdc);
        assert!(position.borrow_principal.is_zero());
        assert!(position.index_at_principal.is_zero());
    }

    #[test]
    fn test_seize_debits_collateral_market() {
        let mut state = BorrowerState::new(addr(1));
        state.apply_mint(MarketId::CEth, dec("10"), 5);
        let drifted = state.apply_seize(MarketId::CEth, dec("4"), 6);
        assert!(!drifted);
        assert_eq!(state.position(MarketId::CEth).supplied, dec("6"));
    }

    #[test]
    fn test_transfer_both_sides() {
        let mut sender = BorrowerState::new(addr(1));
        let mut receiver = BorrowerState::new(addr(2));
        sender.apply_mint(MarketId::CBat, dec("3"), 1);

        assert!(!sender.apply_transfer_out(MarketId::CBat, dec("2"), 2));
        receiver.apply_transfer_in(MarketId::CBat, dec("2"), 2);

        assert_eq!(sender.position(MarketId::CBat).supplied, dec("1"));
        assert_eq!(receiver.position(MarketId::CBat).supplied, dec("2"));
    }

    #[test]
    fn test_load_snapshot_zero_borrow_keeps_invariant() {
        let mut state = BorrowerState::new(addr(1));
        let snapshot = AccountSnapshot {
            supplied: dec("12"),
            borrow_balance: Dec::ZERO,
            borrow_index: dec("1.3"),
        };
        state.load_snapshot(MarketId::CZrx, &snapshot, 99);

        let position = state.position(MarketId::CZrx);
        assert_eq!(position.supplied, dec("12"));
        assert!(position.index_at_principal.is_zero());
        assert_eq!(state.last_updated_block, 99);
    }

    #[test]
    fn test_exposure() {
        let mut state = BorrowerState::new(addr(1));
        assert!(!state.has_exposure());
        state.apply_mint(MarketId::CUni, dec("0.00000001"), 1);
        assert!(state.has_exposure());
    }
}
