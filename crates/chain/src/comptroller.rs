//! Comptroller-backed market registry.
//!
//! Risk parameters are read over RPC into a local cache on `refresh`; the
//! `MarketRegistry` trait is served entirely from that cache so health
//! evaluation never suspends. Per-account market membership is primed
//! explicitly for the watched set.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use sentinel_core::{
    BackoffConfig, Dec, MarketId, MarketMap, MarketRegistry, PerMarket, Result,
};

use crate::ctoken::IComptroller;
use crate::retry::with_retry;

#[derive(Debug, Clone, Default)]
struct RiskParams {
    close_factor: Dec,
    liquidation_incentive: Dec,
    collateral_factors: PerMarket<Dec>,
}

/// `MarketRegistry` backed by the comptroller contract.
pub struct RpcMarketRegistry {
    http_url: String,
    comptroller: Address,
    markets: Arc<MarketMap>,
    backoff: BackoffConfig,
    params: RwLock<RiskParams>,
    membership: DashMap<(Address, MarketId), bool>,
}

impl RpcMarketRegistry {
    pub fn new(
        http_url: impl Into<String>,
        comptroller: Address,
        markets: Arc<MarketMap>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            http_url: http_url.into(),
            comptroller,
            markets,
            backoff,
            params: RwLock::new(RiskParams::default()),
            membership: DashMap::new(),
        }
    }

    /// Re-read close factor, liquidation incentive, and every market's
    /// collateral factor.
    pub async fn refresh(&self) -> Result<()> {
        let comptroller = self.comptroller;

        let close_factor = with_retry(&self.backoff, "closeFactorMantissa", || async move {
            let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
            let raw = IComptroller::new(comptroller, &provider)
                .closeFactorMantissa()
                .call()
                .await?
                ._0;
            Ok(Dec::from_mantissa(raw, 18))
        })
        .await?;

        let liquidation_incentive =
            with_retry(&self.backoff, "liquidationIncentiveMantissa", || async move {
                let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
                let raw = IComptroller::new(comptroller, &provider)
                    .liquidationIncentiveMantissa()
                    .call()
                    .await?
                    ._0;
                Ok(Dec::from_mantissa(raw, 18))
            })
            .await?;

        let mut collateral_factors: PerMarket<Dec> = PerMarket::default();
        for market in MarketId::ALL {
            let Some(ctoken) = self.markets.address_of(market) else {
                continue;
            };
            let factor = with_retry(&self.backoff, "markets", || async move {
                let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
                let listing = IComptroller::new(comptroller, &provider)
                    .markets(ctoken)
                    .call()
                    .await?;
                if !listing.isListed {
                    warn!(market = %market, "cToken not listed on comptroller");
                }
                Ok(Dec::from_mantissa(listing.collateralFactorMantissa, 18))
            })
            .await?;
            collateral_factors[market] = factor;
        }

        let mut params = self.params.write();
        params.close_factor = close_factor;
        params.liquidation_incentive = liquidation_incentive;
        params.collateral_factors = collateral_factors;
        info!(
            close_factor = %params.close_factor,
            liquidation_incentive = %params.liquidation_incentive,
            "comptroller parameters refreshed"
        );
        Ok(())
    }

    /// Cache market membership for the given accounts.
    pub async fn prime_membership(&self, accounts: &[Address]) -> Result<()> {
        for &account in accounts {
            for market in MarketId::ALL {
                let Some(ctoken) = self.markets.address_of(market) else {
                    continue;
                };
                let comptroller = self.comptroller;
                let entered = with_retry(&self.backoff, "checkMembership", || async move {
                    let provider = ProviderBuilder::new().on_http(self.http_url.parse()?);
                    Ok(IComptroller::new(comptroller, &provider)
                        .checkMembership(account, ctoken)
                        .call()
                        .await?
                        ._0)
                })
                .await?;
                self.membership.insert((account, market), entered);
            }
        }
        info!(accounts = accounts.len(), "market membership primed");
        Ok(())
    }
}

impl MarketRegistry for RpcMarketRegistry {
    fn collateral_factor(&self, market: MarketId) -> Dec {
        self.params.read().collateral_factors[market]
    }

    fn close_factor(&self) -> Dec {
        self.params.read().close_factor
    }

    fn liquidation_incentive(&self) -> Dec {
        self.params.read().liquidation_incentive
    }

    fn is_collateral(&self, account: &Address, market: MarketId) -> bool {
        self.membership
            .get(&(*account, market))
            .map(|entered| *entered)
            .unwrap_or(false)
    }
}
