//! Websocket event source for cToken logs.
//!
//! Subscribes to every configured cToken with one filter, decodes the seven
//! market event kinds, and delivers them as a single stream: a sorted
//! historical backfill from the requested start block, then live logs.
//! Removed logs surface as reverted events for the applier's reorg path.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

use sentinel_core::{
    Dec, Error, EventKind, EventSource, EventStatus, EventStream, MarketEvent, MarketId, MarketMap,
    Result,
};

use crate::ctoken::ctoken_signatures;

/// `EventSource` over a websocket endpoint.
pub struct WsEventSource {
    ws_url: String,
    markets: Arc<MarketMap>,
}

impl WsEventSource {
    pub fn new(ws_url: impl Into<String>, markets: Arc<MarketMap>) -> Self {
        Self {
            ws_url: ws_url.into(),
            markets,
        }
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn subscribe(&self, from_block: u64) -> Result<EventStream> {
        let addresses = self.markets.addresses();
        info!(
            ws_url = %self.ws_url,
            markets = addresses.len(),
            from_block,
            "subscribing to cToken events"
        );

        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .map_err(|e| Error::ChainRead(format!("ws connect: {e}")))?;

        // Open the live subscription before backfilling so nothing falls in
        // between.
        let live_filter = Filter::new()
            .address(addresses.clone())
            .event_signature(ctoken_signatures::market_signatures());
        let subscription = provider
            .subscribe_logs(&live_filter)
            .await
            .map_err(|e| Error::ChainRead(format!("subscribe_logs: {e}")))?;

        let head = provider
            .get_block_number()
            .await
            .map_err(|e| Error::ChainRead(format!("blockNumber: {e}")))?;

        let mut backfill = Vec::new();
        if from_block <= head {
            let backfill_filter = Filter::new()
                .address(addresses)
                .event_signature(ctoken_signatures::market_signatures())
                .from_block(from_block)
                .to_block(head);
            let logs = provider
                .get_logs(&backfill_filter)
                .await
                .map_err(|e| Error::ChainRead(format!("getLogs: {e}")))?;
            backfill = logs
                .iter()
                .filter_map(|log| decode_log(log, &self.markets))
                .collect();
            backfill.sort_by_key(|e| (e.block_number, e.log_index));
            info!(from_block, head, events = backfill.len(), "backfill decoded");
        }

        let markets = self.markets.clone();
        // The provider rides in the stream state so the websocket stays
        // open.
        let live = futures::stream::unfold(
            (provider, subscription.into_stream(), markets),
            |(provider, mut stream, markets)| async move {
                loop {
                    match stream.next().await {
                        Some(log) => {
                            if let Some(event) = decode_log(&log, &markets) {
                                return Some((event, (provider, stream, markets)));
                            }
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(futures::stream::iter(backfill).chain(live)))
    }
}

/// Decode one cToken log into a market event. Logs from unconfigured
/// contracts and undecodable payloads return `None`.
pub fn decode_log(log: &Log, markets: &MarketMap) -> Option<MarketEvent> {
    let market = markets.market_of(&log.address())?;
    let topics = log.topics();
    let sig = *topics.first()?;
    let data = &log.data().data;

    let word = |i: usize| -> Option<U256> {
        data.get(i * 32..(i + 1) * 32).map(U256::from_be_slice)
    };
    let word_address = |i: usize| -> Option<Address> {
        data.get(i * 32 + 12..(i + 1) * 32).map(Address::from_slice)
    };

    let kind = if sig == ctoken_signatures::ACCRUE_INTEREST {
        // AccrueInterest(cashPrior, interestAccumulated, borrowIndex, totalBorrows)
        EventKind::AccrueInterest {
            borrow_index: Dec::from_mantissa(word(2)?, 18),
        }
    } else if sig == ctoken_signatures::MINT {
        // Mint(minter, mintAmount, mintTokens)
        EventKind::Mint {
            minter: word_address(0)?,
            mint_tokens: Dec::from_mantissa(word(2)?, market.ctoken_decimals()),
        }
    } else if sig == ctoken_signatures::REDEEM {
        // Redeem(redeemer, redeemAmount, redeemTokens)
        EventKind::Redeem {
            redeemer: word_address(0)?,
            redeem_tokens: Dec::from_mantissa(word(2)?, market.ctoken_decimals()),
        }
    } else if sig == ctoken_signatures::BORROW {
        // Borrow(borrower, borrowAmount, accountBorrows, totalBorrows)
        EventKind::Borrow {
            borrower: word_address(0)?,
            borrow_amount: Dec::from_mantissa(word(1)?, market.underlying_decimals()),
            account_borrows: Dec::from_mantissa(word(2)?, market.underlying_decimals()),
        }
    } else if sig == ctoken_signatures::REPAY_BORROW {
        // RepayBorrow(payer, borrower, repayAmount, accountBorrows, totalBorrows)
        EventKind::RepayBorrow {
            borrower: word_address(1)?,
            repay_amount: Dec::from_mantissa(word(2)?, market.underlying_decimals()),
            account_borrows: Dec::from_mantissa(word(3)?, market.underlying_decimals()),
        }
    } else if sig == ctoken_signatures::LIQUIDATE_BORROW {
        // LiquidateBorrow(liquidator, borrower, repayAmount, cTokenCollateral, seizeTokens)
        let collateral_address = word_address(3)?;
        let collateral_market = match markets.market_of(&collateral_address) {
            Some(m) => m,
            None => {
                warn!(
                    market = %market,
                    collateral = %collateral_address,
                    "seizure into unconfigured market dropped"
                );
                return None;
            }
        };
        EventKind::LiquidateBorrow {
            borrower: word_address(1)?,
            seize_tokens: Dec::from_mantissa(word(4)?, collateral_market.ctoken_decimals()),
            collateral_market,
        }
    } else if sig == ctoken_signatures::TRANSFER {
        // Transfer(address indexed from, address indexed to, uint256 amount)
        if topics.len() < 3 {
            return None;
        }
        EventKind::Transfer {
            from: Address::from_slice(&topics[1][12..]),
            to: Address::from_slice(&topics[2][12..]),
            tokens: Dec::from_mantissa(word(0)?, market.ctoken_decimals()),
        }
    } else {
        return None;
    };

    let status = if log.removed {
        EventStatus::Reverted
    } else {
        EventStatus::Confirmed
    };
    debug!(
        market = %market,
        kind = kind.name(),
        block = log.block_number.unwrap_or(0),
        removed = log.removed,
        "decoded cToken log"
    );

    Some(MarketEvent {
        market,
        block_number: log.block_number.unwrap_or(0),
        log_index: log.log_index.unwrap_or(0),
        status,
        kind,
    })
}
