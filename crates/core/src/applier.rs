//! Event application against the borrower registry.
//!
//! One ingestion entry point: the event source multiplexes every market and
//! kind into [`EventApplier::apply`]. The applier filters by the watched
//! set, enforces per-market `(block, log_index)` ordering, deduplicates the
//! transfers that mint/redeem/seize emit as side effects, and drives reorg
//! recovery by refetching the touched accounts.

use std::sync::Arc;

use alloy::primitives::Address;
use futures::StreamExt;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::config::{StreamConfig, StreamRecovery};
use crate::error::{Error, Result};
use crate::event::{EventKind, EventStatus, MarketEvent};
use crate::interfaces::EventSource;
use crate::market::{MarketId, MarketMap, PerMarket};
use crate::math::Dec;
use crate::registry::BorrowerRegistry;

/// Expected debit leg of a seizure's paired cToken transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeizeEcho {
    market: MarketId,
    from: Address,
    tokens: Dec,
    block: u64,
}

/// Translates the decoded event stream into registry mutations.
pub struct EventApplier {
    registry: Arc<BorrowerRegistry>,
    markets: Arc<MarketMap>,
    refetch_on_drift: bool,
    /// Last applied `(block, log_index)` per market.
    cursors: Mutex<PerMarket<Option<(u64, u64)>>>,
    /// Seize debits already applied, awaiting their paired transfer.
    seize_echoes: Mutex<SmallVec<[SeizeEcho; 4]>>,
}

impl EventApplier {
    pub fn new(
        registry: Arc<BorrowerRegistry>,
        markets: Arc<MarketMap>,
        refetch_on_drift: bool,
    ) -> Self {
        Self {
            registry,
            markets,
            refetch_on_drift,
            cursors: Mutex::new(PerMarket::default()),
            seize_echoes: Mutex::new(SmallVec::new()),
        }
    }

    /// Consume the event stream, resubscribing per the recovery policy.
    pub async fn run(
        &self,
        source: Arc<dyn EventSource>,
        from_block: u64,
        stream: &StreamConfig,
    ) -> Result<()> {
        let mut next_from = from_block;
        let mut attempt = 0u32;
        loop {
            match source.subscribe(next_from).await {
                Ok(mut events) => {
                    info!(from_block = next_from, "event subscription active");
                    attempt = 0;
                    while let Some(event) = events.next().await {
                        next_from = next_from.max(event.block_number);
                        if let Err(e) = self.apply(event).await {
                            warn!(error = %e, "failed to apply event");
                        }
                    }
                    warn!("event stream ended");
                }
                Err(e) => {
                    warn!(error = %e, "event subscription failed");
                }
            }

            match stream.recovery {
                StreamRecovery::Fatal => {
                    return Err(Error::ChainRead("event stream terminated".to_string()));
                }
                StreamRecovery::Reconnect => {
                    let delay = stream.backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(delay_ms = delay.as_millis() as u64, "resubscribing after backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Apply one event. Confirmed events mutate synchronously under the
    /// registry's exclusive lock; reverted events and detected gaps trigger
    /// account refetches.
    pub async fn apply(&self, event: MarketEvent) -> Result<()> {
        if event.status == EventStatus::Reverted {
            return self.recover_reverted(event).await;
        }

        let position = (event.block_number, event.log_index);
        enum CursorOutcome {
            Duplicate,
            Gap(u64, u64),
            Advanced,
        }
        let outcome = {
            let mut cursors = self.cursors.lock();
            match cursors[event.market] {
                Some(last) if position == last => CursorOutcome::Duplicate,
                Some(last) if position < last => CursorOutcome::Gap(last.0, last.1),
                _ => {
                    cursors[event.market] = Some(position);
                    CursorOutcome::Advanced
                }
            }
        };
        match outcome {
            CursorOutcome::Duplicate => {
                debug!(
                    market = %event.market,
                    block = event.block_number,
                    log_index = event.log_index,
                    "duplicate event dropped"
                );
                return Ok(());
            }
            CursorOutcome::Gap(block, log_index) => {
                return self.recover_gap(event, (block, log_index)).await;
            }
            CursorOutcome::Advanced => {}
        }
        self.prune_echoes(event.block_number);

        let mut drifted: SmallVec<[Address; 2]> = SmallVec::new();
        match &event.kind {
            EventKind::AccrueInterest { borrow_index } => {
                self.registry.apply_accrue(event.market, *borrow_index);
            }
            EventKind::Mint { minter, mint_tokens } => {
                self.registry.with_borrower_mut(minter, |b| {
                    b.apply_mint(event.market, *mint_tokens, event.block_number);
                });
            }
            EventKind::Redeem {
                redeemer,
                redeem_tokens,
            } => {
                let drift = self.registry.with_borrower_mut(redeemer, |b| {
                    b.apply_redeem(event.market, *redeem_tokens, event.block_number)
                });
                if drift == Some(true) {
                    drifted.push(*redeemer);
                }
            }
            EventKind::Borrow {
                borrower,
                account_borrows,
                ..
            }
            | EventKind::RepayBorrow {
                borrower,
                account_borrows,
                ..
            } => {
                if self.registry.is_watched(borrower) {
                    // The on-chain event carries no index; the preceding
                    // AccrueInterest in the same transaction keeps the table
                    // current.
                    match self.registry.current_index(event.market) {
                        Ok(index) => {
                            self.registry.with_borrower_mut(borrower, |b| {
                                b.apply_borrow_snapshot(
                                    event.market,
                                    *account_borrows,
                                    index,
                                    event.block_number,
                                );
                            });
                        }
                        Err(e) => {
                            warn!(
                                account = %borrower,
                                market = %event.market,
                                error = %e,
                                "borrow event without index, refetching account"
                            );
                            drifted.push(*borrower);
                        }
                    }
                }
            }
            EventKind::LiquidateBorrow {
                borrower,
                seize_tokens,
                collateral_market,
            } => {
                let drift = self.registry.with_borrower_mut(borrower, |b| {
                    b.apply_seize(*collateral_market, *seize_tokens, event.block_number)
                });
                if drift.is_some() {
                    // The collateral cToken also emits the seizure as a
                    // borrower -> liquidator transfer; suppress that debit.
                    self.seize_echoes.lock().push(SeizeEcho {
                        market: *collateral_market,
                        from: *borrower,
                        tokens: *seize_tokens,
                        block: event.block_number,
                    });
                }
                if drift == Some(true) {
                    drifted.push(*borrower);
                }
            }
            EventKind::Transfer { from, to, tokens } => {
                if self.is_protocol_transfer(event.market, from, to) {
                    debug!(
                        market = %event.market,
                        from = %from,
                        to = %to,
                        "protocol transfer dropped (mint/redeem pair)"
                    );
                } else {
                    if self.registry.is_watched(from) {
                        if self.consume_echo(event.market, from, *tokens, event.block_number) {
                            debug!(
                                market = %event.market,
                                account = %from,
                                "seize transfer debit already applied"
                            );
                        } else {
                            let drift = self.registry.with_borrower_mut(from, |b| {
                                b.apply_transfer_out(event.market, *tokens, event.block_number)
                            });
                            if drift == Some(true) {
                                drifted.push(*from);
                            }
                        }
                    }
                    self.registry.with_borrower_mut(to, |b| {
                        b.apply_transfer_in(event.market, *tokens, event.block_number);
                    });
                }
            }
        }

        if self.refetch_on_drift {
            for address in drifted {
                if let Err(e) = self.registry.rehydrate(&address).await {
                    warn!(account = %address, error = %e, "drift refetch failed");
                }
            }
        }
        Ok(())
    }

    /// Reorg recovery: refetch everything the reverted event touched.
    /// Post-condition is equivalence with a full re-hydration.
    async fn recover_reverted(&self, event: MarketEvent) -> Result<()> {
        warn!(
            market = %event.market,
            block = event.block_number,
            kind = event.kind.name(),
            "reorg detected, recovering"
        );

        if matches!(event.kind, EventKind::AccrueInterest { .. }) {
            self.registry.reload_index(event.market).await?;
        }
        for account in event.kind.touched_accounts() {
            if self.registry.rehydrate(&account).await? {
                info!(account = %account, "account refetched after reorg");
            }
        }

        // Replayed events from the surviving chain may land at or below the
        // old cursor.
        self.cursors.lock()[event.market] = None;
        Ok(())
    }

    /// Out-of-order delivery: the snapshot supersedes the event.
    async fn recover_gap(&self, event: MarketEvent, last: (u64, u64)) -> Result<()> {
        warn!(
            market = %event.market,
            block = event.block_number,
            log_index = event.log_index,
            cursor_block = last.0,
            cursor_log_index = last.1,
            kind = event.kind.name(),
            "event behind cursor, refetching touched accounts"
        );
        for account in event.kind.touched_accounts() {
            self.registry.rehydrate(&account).await?;
        }
        Ok(())
    }

    /// Mint is `cToken -> minter` (minted from the zero address on some
    /// deployments), redeem is `redeemer -> cToken`; both legs are already
    /// covered by the Mint/Redeem events themselves.
    fn is_protocol_transfer(&self, market: MarketId, from: &Address, to: &Address) -> bool {
        if from.is_zero() || to.is_zero() {
            return true;
        }
        match self.markets.address_of(market) {
            Some(ctoken) => *from == ctoken || *to == ctoken,
            None => false,
        }
    }

    fn consume_echo(&self, market: MarketId, from: &Address, tokens: Dec, block: u64) -> bool {
        let mut echoes = self.seize_echoes.lock();
        let expected = SeizeEcho {
            market,
            from: *from,
            tokens,
            block,
        };
        match echoes.iter().position(|e| *e == expected) {
            Some(i) => {
                echoes.remove(i);
                true
            }
            None => false,
        }
    }

    /// Echoes pair within a transaction; anything from an older block is
    /// stale.
    fn prune_echoes(&self, current_block: u64) {
        self.seize_echoes.lock().retain(|e| e.block >= current_block);
    }
}
