//! Price ledger backed by the reporter feed.
//!
//! Prices are cached per symbol in USD and served in ETH units (the
//! protocol's accounting numeraire) by dividing through the ETH price.
//! Postable attestations are assembled from a fresh reporter fetch and only
//! returned when the message set is recent and its prices sit within the
//! configured deviation of the evaluation-time edges.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use sentinel_core::config::FeedConfig;
use sentinel_core::{Dec, Error, MarketId, PostableAttestations, PriceLedger, Result};

use crate::reporter::{ReporterClient, ReporterPayload};

#[derive(Debug, Clone, Copy)]
struct PricePoint {
    usd: Dec,
    fetched_at: u64,
}

/// `PriceLedger` over the reporter feed.
pub struct FeedPriceLedger {
    client: ReporterClient,
    max_age_secs: u64,
    max_deviation: Dec,
    /// USD price per underlying symbol.
    cache: DashMap<&'static str, PricePoint>,
}

impl FeedPriceLedger {
    pub fn new(client: ReporterClient, config: &FeedConfig) -> Self {
        Self {
            client,
            max_age_secs: config.max_age_secs,
            max_deviation: config.max_deviation,
            cache: DashMap::new(),
        }
    }

    /// Pull the current message set into the price cache. Returns the number
    /// of symbols updated.
    pub async fn refresh(&self) -> anyhow::Result<usize> {
        let payload = self.client.fetch().await?;
        let now = unix_now();
        let mut updated = 0usize;
        for market in MarketId::ALL {
            let symbol = market.underlying_symbol();
            if let Some(&usd) = payload.prices.get(symbol) {
                self.cache.insert(
                    symbol,
                    PricePoint {
                        usd,
                        fetched_at: now,
                    },
                );
                updated += 1;
            }
        }
        debug!(updated, "price cache refreshed");
        Ok(updated)
    }

    fn fresh_usd(&self, symbol: &'static str) -> Option<Dec> {
        let point = self.cache.get(symbol)?;
        if unix_now().saturating_sub(point.fetched_at) > self.max_age_secs {
            return None;
        }
        Some(point.usd)
    }

    #[cfg(test)]
    fn seed(&self, symbol: &'static str, usd: Dec, fetched_at: u64) {
        self.cache.insert(symbol, PricePoint { usd, fetched_at });
    }
}

#[async_trait]
impl PriceLedger for FeedPriceLedger {
    fn price(&self, market: MarketId) -> Result<Dec> {
        let eth_usd = self
            .fresh_usd(MarketId::CEth.underlying_symbol())
            .ok_or(Error::StalePrice(market))?;
        if eth_usd.is_zero() {
            return Err(Error::StalePrice(market));
        }
        let usd = self
            .fresh_usd(market.underlying_symbol())
            .ok_or(Error::StalePrice(market))?;
        Ok(usd / eth_usd)
    }

    async fn postable_format(
        &self,
        symbols: &[&'static str],
        edges: &[Dec],
    ) -> Option<PostableAttestations> {
        let payload = match self.client.fetch().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "reporter fetch failed, attestation unavailable");
                return None;
            }
        };

        let age = unix_now().saturating_sub(payload.timestamp);
        if age > self.max_age_secs {
            debug!(age, "reporter message set too old to post");
            return None;
        }
        if !edges_hold(&payload, symbols, edges, self.max_deviation) {
            return None;
        }

        Some(PostableAttestations {
            messages: payload.messages,
            signatures: payload.signatures,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// Check that the payload's ETH-unit prices sit within `max_deviation` of
/// the evaluation-time edges for every requested symbol.
fn edges_hold(
    payload: &ReporterPayload,
    symbols: &[&'static str],
    edges: &[Dec],
    max_deviation: Dec,
) -> bool {
    let Some(&eth_usd) = payload.prices.get("ETH") else {
        debug!("reporter payload has no ETH price");
        return false;
    };
    if eth_usd.is_zero() {
        return false;
    }

    for (&symbol, &edge) in symbols.iter().zip(edges.iter()) {
        let Some(&usd) = payload.prices.get(symbol) else {
            debug!(symbol, "reporter payload missing symbol");
            return false;
        };
        let price = usd / eth_usd;
        let diff = price.max(edge).saturating_sub(price.min(edge));
        if diff > edge * max_deviation {
            warn!(
                symbol,
                posted = %price,
                edge = %edge,
                "reporter price drifted past the evaluation edge"
            );
            return false;
        }
    }
    true
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn dec(s: &str) -> Dec {
        s.parse().unwrap()
    }

    fn ledger() -> FeedPriceLedger {
        FeedPriceLedger::new(
            ReporterClient::new("http://127.0.0.1:0"),
            &FeedConfig::default(),
        )
    }

    fn payload(prices: &[(&str, &str)]) -> ReporterPayload {
        ReporterPayload {
            timestamp: unix_now(),
            messages: Vec::new(),
            signatures: Vec::new(),
            prices: prices
                .iter()
                .map(|(s, p)| (s.to_string(), dec(p)))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_price_is_quoted_in_eth() {
        let ledger = ledger();
        let now = unix_now();
        ledger.seed("ETH", dec("2000"), now);
        ledger.seed("DAI", dec("1"), now);

        let price = ledger.price(MarketId::CDai).unwrap();
        assert_eq!(price, dec("0.0005"));
        // ETH itself is exactly 1.
        assert_eq!(ledger.price(MarketId::CEth).unwrap(), Dec::ONE);
    }

    #[test]
    fn test_stale_cache_is_rejected() {
        let ledger = ledger();
        let old = unix_now().saturating_sub(3_600);
        ledger.seed("ETH", dec("2000"), old);
        ledger.seed("DAI", dec("1"), old);

        assert!(matches!(
            ledger.price(MarketId::CDai),
            Err(Error::StalePrice(MarketId::CDai))
        ));
    }

    #[test]
    fn test_missing_symbol_is_rejected() {
        let ledger = ledger();
        ledger.seed("ETH", dec("2000"), unix_now());
        assert!(ledger.price(MarketId::CBat).is_err());
    }

    #[test]
    fn test_edges_hold_within_deviation() {
        let payload = payload(&[("ETH", "2000"), ("DAI", "1")]);
        // Edge matches the payload exactly.
        assert!(edges_hold(&payload, &["DAI"], &[dec("0.0005")], dec("0.05")));
        // Edge 10% away from the posted price fails a 5% band.
        assert!(!edges_hold(
            &payload,
            &["DAI"],
            &[dec("0.00055")],
            dec("0.05")
        ));
        // Missing symbol fails.
        assert!(!edges_hold(&payload, &["ZRX"], &[dec("0.0001")], dec("0.05")));
    }
}
