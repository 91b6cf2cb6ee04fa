//! Borrower registry: watched set, hydration, and the scan entry point.
//!
//! The registry owns the borrower map and the borrow index table behind one
//! reader-writer lock. Event application mutates under the exclusive lock;
//! `scan` takes the shared lock exactly once to copy a consistent view and
//! evaluates outside it. No lock is ever held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use futures::future::try_join_all;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::borrower::BorrowerState;
use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::health::{self, LiquidationCandidate};
use crate::index_table::BorrowIndexTable;
use crate::interfaces::{ChainReader, MarketRegistry, PriceLedger};
use crate::market::{MarketId, PerMarket};
use crate::math::Dec;

/// Relative tolerance for [`BorrowerRegistry::verify`].
const VERIFY_TOLERANCE: &str = "0.000000000001";

struct RegistryState {
    borrowers: HashMap<Address, BorrowerState>,
    indexes: BorrowIndexTable,
}

/// Owner of the watched borrower set.
pub struct BorrowerRegistry {
    state: RwLock<RegistryState>,
    reader: Arc<dyn ChainReader>,
    snapshot_concurrency: usize,
    min_revenue_eth: Dec,
}

/// Point-in-time registry counters for logging.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    pub watched: usize,
    pub indexes_initialized: usize,
}

impl BorrowerRegistry {
    pub fn new(reader: Arc<dyn ChainReader>, scan: &ScanConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                borrowers: HashMap::new(),
                indexes: BorrowIndexTable::new(),
            }),
            reader,
            snapshot_concurrency: scan.snapshot_concurrency.max(1),
            min_revenue_eth: scan.min_revenue_eth,
        }
    }

    /// Populate the borrow index table for every market at head. Returns the
    /// head block so the caller can start the event subscription there.
    pub async fn init(&self) -> Result<u64> {
        let head = self.reader.block_number().await?;
        let indexes = try_join_all(MarketId::ALL.iter().map(|&market| async move {
            Ok::<_, Error>((market, self.reader.borrow_index(market, head).await?))
        }))
        .await?;

        let mut state = self.state.write();
        for (market, index) in indexes {
            state.indexes.set(market, index);
        }
        info!(head, markets = MarketId::COUNT, "borrow index table initialized");
        Ok(head)
    }

    /// Watch new addresses, hydrating each from a full snapshot at head.
    /// Already-watched addresses are left untouched.
    pub async fn register(&self, addresses: &[Address]) -> Result<()> {
        let fresh: Vec<Address> = {
            let state = self.state.read();
            addresses
                .iter()
                .filter(|a| !state.borrowers.contains_key(*a))
                .copied()
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        let head = self.reader.block_number().await?;
        let hydrated: Vec<Result<HydratedAccount>> = stream::iter(fresh.iter().copied())
            .map(|address| self.hydrate_account(address, head))
            .buffer_unordered(self.snapshot_concurrency)
            .collect()
            .await;

        let mut inserted = 0usize;
        let mut state = self.state.write();
        for result in hydrated {
            let account = result?;
            for (market, index) in &account.observed_indexes {
                state.indexes.set_max(*market, *index);
            }
            state.borrowers.insert(account.state.address, account.state);
            inserted += 1;
        }
        info!(
            requested = addresses.len(),
            inserted,
            watched = state.borrowers.len(),
            head,
            "borrowers registered"
        );
        Ok(())
    }

    /// Stop watching an address. Subsequent events for it are ignored.
    pub fn unregister(&self, address: &Address) -> bool {
        let removed = self.state.write().borrowers.remove(address).is_some();
        if removed {
            info!(account = %address, "borrower unregistered");
        }
        removed
    }

    pub fn is_watched(&self, address: &Address) -> bool {
        self.state.read().borrowers.contains_key(address)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            watched: state.borrowers.len(),
            indexes_initialized: state.indexes.initialized_count(),
        }
    }

    /// Enumerate liquidation candidates against a consistent snapshot.
    ///
    /// Exchange rates are read at a pinned head block (parallel reads), the
    /// borrower map and index table are copied in one shared-lock pass, and
    /// evaluation runs on the copies. Candidates missing a postable
    /// attestation are dropped. Results are sorted by expected revenue,
    /// descending.
    pub async fn scan(
        &self,
        market_registry: &dyn MarketRegistry,
        price_ledger: &dyn PriceLedger,
    ) -> Result<Vec<LiquidationCandidate>> {
        let head = self.reader.block_number().await?;

        let rate_list = try_join_all(MarketId::ALL.iter().map(|&market| async move {
            Ok::<_, Error>((market, self.reader.exchange_rate_stored(market, head).await?))
        }))
        .await?;
        let mut rates: PerMarket<Dec> = PerMarket::default();
        for (market, rate) in rate_list {
            rates[market] = rate;
        }

        let prices: PerMarket<Option<Dec>> = PerMarket::from_fn(|market| {
            match price_ledger.price(market) {
                Ok(price) => Some(price),
                Err(e) => {
                    debug!(market = %market, error = %e, "no ledger price");
                    None
                }
            }
        });

        // One shared-lock pass: copy-on-read of everything evaluation needs.
        let (indexes, borrowers) = {
            let state = self.state.read();
            (
                state.indexes.clone(),
                state.borrowers.values().cloned().collect::<Vec<_>>(),
            )
        };

        let mut drafts = Vec::new();
        for borrower in &borrowers {
            if let Some(draft) =
                health::evaluate(borrower, &indexes, &rates, &prices, market_registry)?
            {
                if draft.expected_revenue_eth < self.min_revenue_eth {
                    debug!(
                        account = %draft.address,
                        revenue_eth = %draft.expected_revenue_eth,
                        "candidate below revenue floor"
                    );
                    continue;
                }
                drafts.push(draft);
            }
        }

        let mut candidates = Vec::with_capacity(drafts.len());
        for draft in drafts {
            match price_ledger
                .postable_format(&draft.attest_symbols, &draft.attest_edges)
                .await
            {
                Some(attestations) => candidates.push(draft.into_candidate(attestations)),
                None => {
                    debug!(
                        account = %draft.address,
                        symbols = ?draft.attest_symbols,
                        "dropping candidate: no postable attestation"
                    );
                }
            }
        }

        candidates.sort_by(|a, b| b.expected_revenue_eth.cmp(&a.expected_revenue_eth));
        info!(
            head,
            scanned = borrowers.len(),
            candidates = candidates.len(),
            "scan complete"
        );
        Ok(candidates)
    }

    /// Replace an account's replica with a fresh chain snapshot. Returns
    /// `false` when the address is not watched.
    pub async fn rehydrate(&self, address: &Address) -> Result<bool> {
        if !self.is_watched(address) {
            return Ok(false);
        }
        let head = self.reader.block_number().await?;
        let account = self.hydrate_account(*address, head).await?;

        let mut state = self.state.write();
        for (market, index) in &account.observed_indexes {
            state.indexes.set_max(*market, *index);
        }
        state.borrowers.insert(*address, account.state);
        debug!(account = %address, head, "account rehydrated");
        Ok(true)
    }

    /// Sampled consistency audit: compare the replica against a fresh chain
    /// snapshot within a relative tolerance.
    pub async fn verify(&self, address: &Address) -> Result<bool> {
        let replica = match self.state.read().borrowers.get(address) {
            Some(state) => state.clone(),
            None => return Ok(false),
        };
        let head = self.reader.block_number().await?;
        let indexes = self.state.read().indexes.clone();
        let tolerance: Dec = VERIFY_TOLERANCE.parse().expect("static literal");

        for market in MarketId::ALL {
            let fresh = self.reader.account_snapshot(market, *address, head).await?;
            let position = replica.position(market);

            let owed = if position.borrow_principal.is_zero() {
                Dec::ZERO
            } else {
                let current = indexes.get(market).unwrap_or(position.index_at_principal);
                position.borrow_principal * current / position.index_at_principal
            };

            if !close_to(position.supplied, fresh.supplied, tolerance)
                || !close_to(owed, fresh.borrow_balance, tolerance)
            {
                warn!(
                    account = %address,
                    market = %market,
                    replica_supplied = %position.supplied,
                    chain_supplied = %fresh.supplied,
                    replica_owed = %owed,
                    chain_owed = %fresh.borrow_balance,
                    "replica diverged from chain"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    // Applier-facing mutators. All are synchronous and run under the
    // exclusive lock.

    /// Apply an `AccrueInterest` index. A regression below the current value
    /// is rejected with a warning; returns whether the write happened.
    pub fn apply_accrue(&self, market: MarketId, index: Dec) -> bool {
        let mut state = self.state.write();
        match state.indexes.get(market) {
            Ok(current) if index < current => {
                warn!(
                    market = %market,
                    current = %current,
                    incoming = %index,
                    "rejecting non-monotonic borrow index"
                );
                false
            }
            _ => {
                state.indexes.set(market, index);
                true
            }
        }
    }

    /// Current borrow index for a market.
    pub fn current_index(&self, market: MarketId) -> Result<Dec> {
        self.state.read().indexes.get(market)
    }

    /// Mutate one watched borrower. Returns `None` when the address is not
    /// watched.
    pub fn with_borrower_mut<R>(
        &self,
        address: &Address,
        f: impl FnOnce(&mut BorrowerState) -> R,
    ) -> Option<R> {
        let mut state = self.state.write();
        state.borrowers.get_mut(address).map(f)
    }

    /// Re-read one market's borrow index from chain (reorg recovery).
    pub async fn reload_index(&self, market: MarketId) -> Result<()> {
        let head = self.reader.block_number().await?;
        let index = self.reader.borrow_index(market, head).await?;
        self.state.write().indexes.set(market, index);
        debug!(market = %market, index = %index, head, "borrow index reloaded");
        Ok(())
    }

    async fn hydrate_account(&self, address: Address, head: u64) -> Result<HydratedAccount> {
        let snapshots = try_join_all(MarketId::ALL.iter().map(|&market| {
            let reader = &self.reader;
            async move {
                let snapshot = reader.account_snapshot(market, address, head).await?;
                Ok::<_, Error>((market, snapshot))
            }
        }))
        .await?;

        let mut state = BorrowerState::new(address);
        let mut observed_indexes = Vec::new();
        for (market, snapshot) in snapshots {
            state.load_snapshot(market, &snapshot, head);
            if !snapshot.borrow_index.is_zero() {
                observed_indexes.push((market, snapshot.borrow_index));
            }
        }
        Ok(HydratedAccount {
            state,
            observed_indexes,
        })
    }
}

struct HydratedAccount {
    state: BorrowerState,
    observed_indexes: Vec<(MarketId, Dec)>,
}

fn close_to(a: Dec, b: Dec, tolerance: Dec) -> bool {
    let diff = a.max(b).saturating_sub(a.min(b));
    diff <= a.max(b) * tolerance
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::interfaces::{AccountSnapshot, PostableAttestations};
    use async_trait::async_trait;
    use std::collections::HashMap;

    pub(crate) fn dec(s: &str) -> Dec {
        s.parse().unwrap()
    }

    pub(crate) fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    /// In-memory chain fixture.
    pub(crate) struct MockReader {
        pub head: parking_lot::Mutex<u64>,
        pub indexes: parking_lot::Mutex<HashMap<MarketId, Dec>>,
        pub rates: parking_lot::Mutex<HashMap<MarketId, Dec>>,
        pub snapshots: parking_lot::Mutex<HashMap<(Address, MarketId), AccountSnapshot>>,
    }

    impl MockReader {
        pub fn new(head: u64) -> Self {
            let mut indexes = HashMap::new();
            let mut rates = HashMap::new();
            for market in MarketId::ALL {
                indexes.insert(market, Dec::ONE);
                rates.insert(market, dec("0.02"));
            }
            Self {
                head: parking_lot::Mutex::new(head),
                indexes: parking_lot::Mutex::new(indexes),
                rates: parking_lot::Mutex::new(rates),
                snapshots: parking_lot::Mutex::new(HashMap::new()),
            }
        }

        pub fn set_snapshot(&self, address: Address, market: MarketId, snapshot: AccountSnapshot) {
            self.snapshots.lock().insert((address, market), snapshot);
        }
    }

    #[async_trait]
    impl ChainReader for MockReader {
        async fn block_number(&self) -> Result<u64> {
            Ok(*self.head.lock())
        }

        async fn borrow_index(&self, market: MarketId, _at_block: u64) -> Result<Dec> {
            Ok(self.indexes.lock()[&market])
        }

        async fn exchange_rate_stored(&self, market: MarketId, _at_block: u64) -> Result<Dec> {
            Ok(self.rates.lock()[&market])
        }

        async fn account_snapshot(
            &self,
            market: MarketId,
            account: Address,
            _at_block: u64,
        ) -> Result<AccountSnapshot> {
            Ok(self
                .snapshots
                .lock()
                .get(&(account, market))
                .copied()
                .unwrap_or_default())
        }
    }

    /// Fixed comptroller parameters; every market entered.
    pub(crate) struct MockParams;

    impl MarketRegistry for MockParams {
        fn collateral_factor(&self, _market: MarketId) -> Dec {
            dec("0.75")
        }

        fn close_factor(&self) -> Dec {
            dec("0.5")
        }

        fn liquidation_incentive(&self) -> Dec {
            dec("1.08")
        }

        fn is_collateral(&self, _account: &Address, _market: MarketId) -> bool {
            true
        }
    }

    /// Price ledger returning a flat 1.0 price; `postable` toggles whether
    /// attestations assemble.
    pub(crate) struct MockLedger {
        pub postable: bool,
    }

    #[async_trait]
    impl PriceLedger for MockLedger {
        fn price(&self, _market: MarketId) -> Result<Dec> {
            Ok(Dec::ONE)
        }

        async fn postable_format(
            &self,
            symbols: &[&'static str],
            _edges: &[Dec],
        ) -> Option<PostableAttestations> {
            self.postable.then(|| PostableAttestations {
                messages: Vec::new(),
                signatures: Vec::new(),
                symbols: symbols.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    fn underwater_snapshot() -> AccountSnapshot {
        // 100 cTokens at rate 0.02 and factor 0.75 against 2.0 owed:
        // health 0.75.
        AccountSnapshot {
            supplied: dec("100"),
            borrow_balance: dec("2"),
            borrow_index: Dec::ONE,
        }
    }

    #[tokio::test]
    async fn test_init_populates_every_market() {
        let reader = Arc::new(MockReader::new(100));
        let registry = BorrowerRegistry::new(reader, &ScanConfig::default());

        let head = registry.init().await.unwrap();
        assert_eq!(head, 100);
        assert_eq!(registry.stats().indexes_initialized, MarketId::COUNT);
        for market in MarketId::ALL {
            assert_eq!(registry.current_index(market).unwrap(), Dec::ONE);
        }
    }

    #[tokio::test]
    async fn test_register_hydrates_and_is_idempotent() {
        let reader = Arc::new(MockReader::new(100));
        let borrower = addr(1);
        reader.set_snapshot(borrower, MarketId::CDai, underwater_snapshot());

        let registry = BorrowerRegistry::new(reader.clone(), &ScanConfig::default());
        registry.init().await.unwrap();
        registry.register(&[borrower]).await.unwrap();
        assert!(registry.is_watched(&borrower));

        // Mutate the chain fixture; a second register must not re-hydrate.
        reader.set_snapshot(
            borrower,
            MarketId::CDai,
            AccountSnapshot {
                supplied: dec("1"),
                ..underwater_snapshot()
            },
        );
        registry.register(&[borrower]).await.unwrap();

        let supplied = registry
            .with_borrower_mut(&borrower, |b| b.position(MarketId::CDai).supplied)
            .unwrap();
        assert_eq!(supplied, dec("100"));
    }

    #[tokio::test]
    async fn test_scan_reports_underwater_borrower() {
        let reader = Arc::new(MockReader::new(100));
        let borrower = addr(1);
        reader.set_snapshot(borrower, MarketId::CDai, underwater_snapshot());

        let registry = BorrowerRegistry::new(reader, &ScanConfig::default());
        registry.init().await.unwrap();
        registry.register(&[borrower]).await.unwrap();

        let candidates = registry
            .scan(&MockParams, &MockLedger { postable: true })
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].address, borrower);
        assert_eq!(candidates[0].repay_market, MarketId::CDai);
        assert_eq!(candidates[0].seize_market, MarketId::CDai);
        assert!(candidates[0].expected_revenue_eth > Dec::ZERO);
        assert_eq!(candidates[0].prices_to_report.symbols, ["DAI"]);
    }

    #[tokio::test]
    async fn test_scan_drops_unpostable_candidates() {
        let reader = Arc::new(MockReader::new(100));
        let borrower = addr(1);
        reader.set_snapshot(borrower, MarketId::CDai, underwater_snapshot());

        let registry = BorrowerRegistry::new(reader, &ScanConfig::default());
        registry.init().await.unwrap();
        registry.register(&[borrower]).await.unwrap();

        let candidates = registry
            .scan(&MockParams, &MockLedger { postable: false })
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_stops_watching() {
        let reader = Arc::new(MockReader::new(100));
        let borrower = addr(1);
        reader.set_snapshot(borrower, MarketId::CDai, underwater_snapshot());

        let registry = BorrowerRegistry::new(reader, &ScanConfig::default());
        registry.init().await.unwrap();
        registry.register(&[borrower]).await.unwrap();
        assert!(registry.unregister(&borrower));
        assert!(!registry.is_watched(&borrower));

        let candidates = registry
            .scan(&MockParams, &MockLedger { postable: true })
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_verify_detects_divergence() {
        let reader = Arc::new(MockReader::new(100));
        let borrower = addr(1);
        reader.set_snapshot(borrower, MarketId::CDai, underwater_snapshot());

        let registry = BorrowerRegistry::new(reader.clone(), &ScanConfig::default());
        registry.init().await.unwrap();
        registry.register(&[borrower]).await.unwrap();
        assert!(registry.verify(&borrower).await.unwrap());

        // Drift the chain fixture away from the replica.
        reader.set_snapshot(
            borrower,
            MarketId::CDai,
            AccountSnapshot {
                supplied: dec("50"),
                ..underwater_snapshot()
            },
        );
        assert!(!registry.verify(&borrower).await.unwrap());

        // Rehydration reconciles.
        assert!(registry.rehydrate(&borrower).await.unwrap());
        assert!(registry.verify(&borrower).await.unwrap());
    }

    #[tokio::test]
    async fn test_accrue_rejects_regression() {
        let reader = Arc::new(MockReader::new(100));
        let registry = BorrowerRegistry::new(reader, &ScanConfig::default());
        registry.init().await.unwrap();

        assert!(registry.apply_accrue(MarketId::CDai, dec("1.5")));
        assert!(!registry.apply_accrue(MarketId::CDai, dec("1.2")));
        assert_eq!(registry.current_index(MarketId::CDai).unwrap(), dec("1.5"));
        // Equal value is not a regression.
        assert!(registry.apply_accrue(MarketId::CDai, dec("1.5")));
    }
}
