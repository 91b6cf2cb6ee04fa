//! RPC-backed chain reader.
//!
//! Storage reads against cToken contracts through Alloy typed calls, pinned
//! to a block and wrapped in bounded-backoff retry. Raw mantissas are
//! converted to `Dec` at this boundary: cToken balances are 8-decimal,
//! borrow balances use the underlying's decimals, borrow indexes are 1e18,
//! and exchange rates carry `18 + underlying_decimals - 8` decimals.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use tracing::info;

use sentinel_core::{
    AccountSnapshot, BackoffConfig, ChainReader, Dec, Error, MarketId, MarketMap, Result,
};

use crate::ctoken::ICToken;
use crate::retry::with_retry;

/// `ChainReader` over a JSON-RPC HTTP endpoint.
pub struct RpcChainReader {
    http_url: String,
    markets: Arc<MarketMap>,
    backoff: BackoffConfig,
}

impl RpcChainReader {
    /// Build a reader and verify the endpoint serves the expected chain.
    pub async fn connect(
        http_url: &str,
        expected_chain_id: u64,
        markets: Arc<MarketMap>,
        backoff: BackoffConfig,
    ) -> Result<Self> {
        let reader = Self {
            http_url: http_url.to_string(),
            markets,
            backoff,
        };

        let chain_id = with_retry(&reader.backoff, "chainId", || async {
            let provider = ProviderBuilder::new().on_http(reader.http_url.parse()?);
            Ok(provider.get_chain_id().await?)
        })
        .await?;
        if chain_id != expected_chain_id {
            return Err(Error::UnknownChain(chain_id));
        }
        info!(chain_id, url = %reader.http_url, "chain reader connected");
        Ok(reader)
    }

    fn market_address(&self, market: MarketId) -> Result<Address> {
        self.markets
            .address_of(market)
            .ok_or_else(|| Error::ChainRead(format!("no cToken address configured for {market}")))
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn block_number(&self) -> Result<u64> {
        with_retry(&self.backoff, "blockNumber", || async {
            let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
            Ok(provider.get_block_number().await?)
        })
        .await
    }

    async fn borrow_index(&self, market: MarketId, at_block: u64) -> Result<Dec> {
        let address = self.market_address(market)?;
        with_retry(&self.backoff, "borrowIndex", || async move {
            let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
            let raw = ICToken::new(address, &provider)
                .borrowIndex()
                .block(at_block.into())
                .call()
                .await?
                ._0;
            Ok(Dec::from_mantissa(raw, 18))
        })
        .await
    }

    async fn exchange_rate_stored(&self, market: MarketId, at_block: u64) -> Result<Dec> {
        let address = self.market_address(market)?;
        let decimals = 18 + market.underlying_decimals() - market.ctoken_decimals();
        with_retry(&self.backoff, "exchangeRateStored", || async move {
            let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
            let raw = ICToken::new(address, &provider)
                .exchangeRateStored()
                .block(at_block.into())
                .call()
                .await?
                ._0;
            Ok(Dec::from_mantissa(raw, decimals))
        })
        .await
    }

    async fn account_snapshot(
        &self,
        market: MarketId,
        account: Address,
        at_block: u64,
    ) -> Result<AccountSnapshot> {
        let address = self.market_address(market)?;
        let underlying_decimals = market.underlying_decimals();
        with_retry(&self.backoff, "getAccountSnapshot", || async move {
            let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
            let contract = ICToken::new(address, &provider);

            let snapshot_call = contract.getAccountSnapshot(account).block(at_block.into());
            let index_call = contract.borrowIndex().block(at_block.into());
            let (snapshot, index) = tokio::join!(snapshot_call.call(), index_call.call());

            let snapshot = snapshot?;
            if !snapshot._0.is_zero() {
                anyhow::bail!("getAccountSnapshot error code {}", snapshot._0);
            }
            Ok(AccountSnapshot {
                supplied: Dec::from_mantissa(snapshot._1, market.ctoken_decimals()),
                borrow_balance: Dec::from_mantissa(snapshot._2, underlying_decimals),
                borrow_index: Dec::from_mantissa(index?._0, 18),
            })
        })
        .await
    }
}
