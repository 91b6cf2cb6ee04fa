//! Health evaluation and repay/seize pair selection.
//!
//! [`evaluate`] is a pure function of the borrower replica, the index table,
//! and the per-market rate/price snapshots: no I/O, no suspension, no
//! internal state. Attestation collection is the registry's job; the
//! evaluator returns a [`CandidateDraft`] naming the symbols and price edges
//! a candidate needs attested.

use alloy::primitives::Address;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::borrower::BorrowerState;
use crate::error::Result;
use crate::index_table::BorrowIndexTable;
use crate::interfaces::{MarketRegistry, PostableAttestations};
use crate::market::{MarketId, PerMarket};
use crate::math::Dec;

/// A liquidation opportunity ready for the executor.
#[derive(Debug, Clone)]
pub struct LiquidationCandidate {
    pub address: Address,
    /// Market whose debt the liquidator repays.
    pub repay_market: MarketId,
    /// Market whose collateral the liquidator seizes.
    pub seize_market: MarketId,
    /// Signed price messages the liquidation call must post.
    pub prices_to_report: PostableAttestations,
    pub expected_revenue_eth: Dec,
}

/// Evaluation result minus attestations.
#[derive(Debug, Clone)]
pub struct CandidateDraft {
    pub address: Address,
    pub repay_market: MarketId,
    pub seize_market: MarketId,
    pub health: Dec,
    pub expected_revenue_eth: Dec,
    /// Underlying symbols whose prices must be attested on-chain.
    pub attest_symbols: SmallVec<[&'static str; 2]>,
    /// The prices used in this evaluation, one per symbol.
    pub attest_edges: SmallVec<[Dec; 2]>,
}

impl CandidateDraft {
    pub fn into_candidate(self, prices_to_report: PostableAttestations) -> LiquidationCandidate {
        LiquidationCandidate {
            address: self.address,
            repay_market: self.repay_market,
            seize_market: self.seize_market,
            prices_to_report,
            expected_revenue_eth: self.expected_revenue_eth,
        }
    }
}

/// Evaluate one borrower against a consistent snapshot.
///
/// `rates` are per-market exchange rates (underlying per cToken), `prices`
/// per-market underlying prices in ETH units (`None` when the ledger has no
/// fresh price). Returns `Ok(None)` for accounts that are healthy, have no
/// debt, have no seizable collateral, or whose evaluation hit a missing
/// price. `Err` only for an uninitialized borrow index, which fails the
/// whole scan.
pub fn evaluate(
    borrower: &BorrowerState,
    indexes: &BorrowIndexTable,
    rates: &PerMarket<Dec>,
    prices: &PerMarket<Option<Dec>>,
    params: &dyn MarketRegistry,
) -> Result<Option<CandidateDraft>> {
    let mut supply_eth: PerMarket<Dec> = PerMarket::default();
    let mut borrow_eth: PerMarket<Dec> = PerMarket::default();
    let mut total_collateral_eth = Dec::ZERO;
    let mut total_borrow_eth = Dec::ZERO;

    for market in MarketId::ALL {
        let position = borrower.position(market);
        if position.is_empty() {
            continue;
        }

        let price = match prices[market] {
            Some(price) => price,
            None => {
                warn!(
                    account = %borrower.address,
                    market = %market,
                    "no price for exposed market, skipping account"
                );
                return Ok(None);
            }
        };

        let borrow_underlying = if position.borrow_principal.is_zero() {
            Dec::ZERO
        } else {
            let current = indexes.get(market)?;
            let at_principal = position.index_at_principal;
            if at_principal.is_zero() || at_principal > current {
                // Stale-event bug per protocol semantics; clamp the accrual
                // ratio to 1 rather than shrink or blow up the debt.
                warn!(
                    account = %borrower.address,
                    market = %market,
                    current = %current,
                    at_principal = %at_principal,
                    "inconsistent index snapshot for open borrow"
                );
                position.borrow_principal
            } else {
                position.borrow_principal * current / at_principal
            }
        };

        let supply_underlying = position.supplied * rates[market];

        supply_eth[market] = supply_underlying * price;
        borrow_eth[market] = borrow_underlying * price;

        total_collateral_eth += supply_eth[market] * params.collateral_factor(market);
        total_borrow_eth += borrow_eth[market];
    }

    if total_borrow_eth.is_zero() {
        // No debt: health is infinite.
        return Ok(None);
    }

    let health = total_collateral_eth / total_borrow_eth;
    if health >= Dec::ONE {
        return Ok(None);
    }

    // Largest debt; id order breaks ties.
    let mut repay_market = None;
    let mut repay_best = Dec::ZERO;
    for market in MarketId::ALL {
        if borrow_eth[market] > repay_best {
            repay_best = borrow_eth[market];
            repay_market = Some(market);
        }
    }
    let repay_market = match repay_market {
        Some(market) => market,
        None => return Ok(None),
    };

    // Largest supply among markets entered as collateral; id order breaks
    // ties.
    let mut seize_market = None;
    let mut seize_best = Dec::ZERO;
    for market in MarketId::ALL {
        if supply_eth[market] > seize_best && params.is_collateral(&borrower.address, market) {
            seize_best = supply_eth[market];
            seize_market = Some(market);
        }
    }
    let seize_market = match seize_market {
        Some(market) => market,
        None => {
            debug!(account = %borrower.address, "underwater but no entered collateral");
            return Ok(None);
        }
    };

    let incentive = params.liquidation_incentive();
    let max_repay_eth = borrow_eth[repay_market] * params.close_factor();
    let max_seize_eth = (max_repay_eth * incentive).min(supply_eth[seize_market]);
    let expected_revenue_eth = if incentive > Dec::ONE {
        max_seize_eth.saturating_sub(max_seize_eth / incentive)
    } else {
        Dec::ZERO
    };
    if expected_revenue_eth.is_zero() {
        debug!(account = %borrower.address, "liquidatable but zero expected revenue");
        return Ok(None);
    }

    let mut attest_symbols: SmallVec<[&'static str; 2]> = SmallVec::new();
    let mut attest_edges: SmallVec<[Dec; 2]> = SmallVec::new();
    for market in [repay_market, seize_market] {
        let symbol = market.underlying_symbol();
        if !attest_symbols.contains(&symbol) {
            attest_symbols.push(symbol);
            // Exposed markets always carry a price at this point.
            attest_edges.push(prices[market].unwrap_or(Dec::ZERO));
        }
    }

    debug!(
        account = %borrower.address,
        health = %health,
        repay = %repay_market,
        seize = %seize_market,
        revenue_eth = %expected_revenue_eth,
        "liquidation candidate"
    );

    Ok(Some(CandidateDraft {
        address: borrower.address,
        repay_market,
        seize_market,
        health,
        expected_revenue_eth,
        attest_symbols,
        attest_edges,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn dec(s: &str) -> Dec {
        s.parse().unwrap()
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    /// Fixed comptroller parameters for tests.
    struct Params {
        collateral_factors: PerMarket<Dec>,
        close_factor: Dec,
        incentive: Dec,
        entered_all: bool,
    }

    impl Default for Params {
        fn default() -> Self {
            Self {
                collateral_factors: PerMarket::from_fn(|_| dec("0.75")),
                close_factor: dec("0.5"),
                incentive: dec("1.08"),
                entered_all: true,
            }
        }
    }

    impl MarketRegistry for Params {
        fn collateral_factor(&self, market: MarketId) -> Dec {
            self.collateral_factors[market]
        }

        fn close_factor(&self) -> Dec {
            self.close_factor
        }

        fn liquidation_incentive(&self) -> Dec {
            self.incentive
        }

        fn is_collateral(&self, _account: &Address, _market: MarketId) -> bool {
            self.entered_all
        }
    }

    fn uniform_rates(rate: &str) -> PerMarket<Dec> {
        let rate = dec(rate);
        PerMarket::from_fn(|_| rate)
    }

    fn uniform_prices(price: &str) -> PerMarket<Option<Dec>> {
        let price = dec(price);
        PerMarket::from_fn(|_| Some(price))
    }

    fn unit_indexes() -> BorrowIndexTable {
        let mut table = BorrowIndexTable::new();
        for market in MarketId::ALL {
            table.set(market, Dec::ONE);
        }
        table
    }

    /// Scenario S1: supplied 100 cTokens at rate 0.02 and factor 0.75 covers
    /// a 1.0 borrow with health 1.5.
    fn s1_borrower() -> BorrowerState {
        let mut borrower = BorrowerState::new(addr(1));
        borrower.apply_mint(MarketId::CDai, dec("100"), 1);
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("1"), Dec::ONE, 1);
        borrower
    }

    #[test]
    fn test_healthy_borrower_is_not_a_candidate() {
        let borrower = s1_borrower();
        let result = evaluate(
            &borrower,
            &unit_indexes(),
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &Params::default(),
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_underwater_borrower_is_a_candidate() {
        // S2: doubling the debt pushes health to 0.75.
        let mut borrower = s1_borrower();
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("2"), Dec::ONE, 2);

        let draft = evaluate(
            &borrower,
            &unit_indexes(),
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &Params::default(),
        )
        .unwrap()
        .expect("candidate");

        assert_eq!(draft.health, dec("0.75"));
        assert_eq!(draft.repay_market, MarketId::CDai);
        assert_eq!(draft.seize_market, MarketId::CDai);
        // maxRepay = 2 * 0.5 = 1; maxSeize = min(1.08, 2.0) = 1.08;
        // revenue = 1.08 - 1.08/1.08 = 0.08.
        assert_eq!(draft.expected_revenue_eth, dec("0.08"));
        assert_eq!(draft.attest_symbols.as_slice(), ["DAI"]);
    }

    #[test]
    fn test_accrual_alone_creates_candidate() {
        // S3: same account as S1 but the index doubled since the principal
        // snapshot; current owed doubles without any Borrow event.
        let borrower = s1_borrower();
        let mut indexes = unit_indexes();
        indexes.set(MarketId::CDai, dec("2"));

        let draft = evaluate(
            &borrower,
            &indexes,
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &Params::default(),
        )
        .unwrap()
        .expect("candidate");
        assert_eq!(draft.health, dec("0.75"));
    }

    #[test]
    fn test_zero_debt_means_infinite_health() {
        let mut borrower = BorrowerState::new(addr(1));
        borrower.apply_mint(MarketId::CDai, dec("100"), 1);

        let result = evaluate(
            &borrower,
            &unit_indexes(),
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &Params::default(),
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_seize_market_picked_by_eth_value() {
        // S5: more cTokens in cBAT but more ETH value in cETH.
        let mut borrower = BorrowerState::new(addr(1));
        borrower.apply_mint(MarketId::CEth, dec("10"), 1);
        borrower.apply_mint(MarketId::CBat, dec("1000"), 1);
        borrower.apply_borrow_snapshot(MarketId::CUsdc, dec("1000"), Dec::ONE, 1);

        let rates = uniform_rates("0.02");
        let mut prices = uniform_prices("0.001");
        prices[MarketId::CEth] = Some(Dec::ONE);
        // 10 cETH * 0.02 * 1.0  = 0.2 ETH supplied value
        // 1000 cBAT * 0.02 * 0.001 = 0.02 ETH supplied value
        // 1000 USDC * 0.001 = 1.0 ETH borrowed value -> underwater

        let draft = evaluate(
            &borrower,
            &unit_indexes(),
            &rates,
            &prices,
            &Params::default(),
        )
        .unwrap()
        .expect("candidate");

        assert_eq!(draft.seize_market, MarketId::CEth);
        assert_eq!(draft.repay_market, MarketId::CUsdc);
        assert_eq!(draft.attest_symbols.as_slice(), ["USDC", "ETH"]);
    }

    #[test]
    fn test_seize_restricted_to_entered_markets() {
        let mut borrower = s1_borrower();
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("2"), Dec::ONE, 2);

        let params = Params {
            entered_all: false,
            ..Params::default()
        };
        let result = evaluate(
            &borrower,
            &unit_indexes(),
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &params,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_uninitialized_index_fails_scan() {
        let mut borrower = BorrowerState::new(addr(1));
        borrower.apply_mint(MarketId::CDai, dec("100"), 1);
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("2"), Dec::ONE, 1);

        let result = evaluate(
            &borrower,
            &BorrowIndexTable::new(),
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &Params::default(),
        );
        assert!(matches!(result, Err(Error::UninitializedIndex(_))));
    }

    #[test]
    fn test_missing_price_drops_account() {
        let mut borrower = s1_borrower();
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("2"), Dec::ONE, 2);

        let mut prices = uniform_prices("1");
        prices[MarketId::CDai] = None;

        let result = evaluate(
            &borrower,
            &unit_indexes(),
            &uniform_rates("0.02"),
            &prices,
            &Params::default(),
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let mut borrower = s1_borrower();
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("2"), Dec::ONE, 2);
        let indexes = unit_indexes();
        let rates = uniform_rates("0.02");
        let prices = uniform_prices("1");
        let params = Params::default();

        let a = evaluate(&borrower, &indexes, &rates, &prices, &params)
            .unwrap()
            .expect("candidate");
        let b = evaluate(&borrower, &indexes, &rates, &prices, &params)
            .unwrap()
            .expect("candidate");

        assert_eq!(a.health, b.health);
        assert_eq!(a.expected_revenue_eth, b.expected_revenue_eth);
        assert_eq!(a.repay_market, b.repay_market);
        assert_eq!(a.seize_market, b.seize_market);
    }

    #[test]
    fn test_candidate_soundness() {
        // Every reported draft has health < 1 and positive revenue.
        let mut borrower = s1_borrower();
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("2"), Dec::ONE, 2);

        let draft = evaluate(
            &borrower,
            &unit_indexes(),
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &Params::default(),
        )
        .unwrap()
        .expect("candidate");
        assert!(draft.health < Dec::ONE);
        assert!(draft.expected_revenue_eth > Dec::ZERO);
    }

    #[test]
    fn test_stale_index_snapshot_clamps() {
        // index_at_principal ahead of the table: debt must not shrink.
        let mut borrower = s1_borrower();
        borrower.apply_borrow_snapshot(MarketId::CDai, dec("2"), dec("3"), 2);

        let draft = evaluate(
            &borrower,
            &unit_indexes(),
            &uniform_rates("0.02"),
            &uniform_prices("1"),
            &Params::default(),
        )
        .unwrap()
        .expect("candidate");
        // Ratio clamped to 1: owed stays 2.0, health 0.75.
        assert_eq!(draft.health, dec("0.75"));
    }
}
