//! Supported money markets.
//!
//! The watched market set is fixed at build time: one [`MarketId`] per
//! cToken. The id is an index type, so per-market state lives in dense
//! [`PerMarket`] arrays rather than hash maps. cToken contract addresses are
//! deployment configuration and are bound to ids through [`MarketMap`].

use std::collections::HashMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Identifier of a supported market, one per cToken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarketId {
    #[serde(rename = "cETH")]
    CEth,
    #[serde(rename = "cDAI")]
    CDai,
    #[serde(rename = "cUSDC")]
    CUsdc,
    #[serde(rename = "cUSDT")]
    CUsdt,
    #[serde(rename = "cWBTC")]
    CWbtc,
    #[serde(rename = "cBAT")]
    CBat,
    #[serde(rename = "cZRX")]
    CZrx,
    #[serde(rename = "cUNI")]
    CUni,
}

impl MarketId {
    pub const COUNT: usize = 8;

    /// All markets in id order. Tie-breaks in candidate selection follow
    /// this order.
    pub const ALL: [MarketId; Self::COUNT] = [
        MarketId::CEth,
        MarketId::CDai,
        MarketId::CUsdc,
        MarketId::CUsdt,
        MarketId::CWbtc,
        MarketId::CBat,
        MarketId::CZrx,
        MarketId::CUni,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// cToken symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            MarketId::CEth => "cETH",
            MarketId::CDai => "cDAI",
            MarketId::CUsdc => "cUSDC",
            MarketId::CUsdt => "cUSDT",
            MarketId::CWbtc => "cWBTC",
            MarketId::CBat => "cBAT",
            MarketId::CZrx => "cZRX",
            MarketId::CUni => "cUNI",
        }
    }

    /// Symbol of the underlying asset, as attested by the price feed.
    pub const fn underlying_symbol(self) -> &'static str {
        match self {
            MarketId::CEth => "ETH",
            MarketId::CDai => "DAI",
            MarketId::CUsdc => "USDC",
            MarketId::CUsdt => "USDT",
            MarketId::CWbtc => "BTC",
            MarketId::CBat => "BAT",
            MarketId::CZrx => "ZRX",
            MarketId::CUni => "UNI",
        }
    }

    /// Decimals of the underlying token.
    pub const fn underlying_decimals(self) -> u32 {
        match self {
            MarketId::CUsdc | MarketId::CUsdt => 6,
            MarketId::CWbtc => 8,
            _ => 18,
        }
    }

    /// cToken decimals (uniform across the protocol).
    pub const fn ctoken_decimals(self) -> u32 {
        8
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Dense per-market table indexed by [`MarketId`].
#[derive(Debug, Clone)]
pub struct PerMarket<T> {
    slots: [T; MarketId::COUNT],
}

impl<T> PerMarket<T> {
    pub fn from_fn(mut f: impl FnMut(MarketId) -> T) -> Self {
        Self {
            slots: std::array::from_fn(|i| f(MarketId::ALL[i])),
        }
    }

    /// Iterate in id order.
    pub fn iter(&self) -> impl Iterator<Item = (MarketId, &T)> {
        MarketId::ALL.iter().copied().zip(self.slots.iter())
    }
}

impl<T: Default> Default for PerMarket<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<MarketId> for PerMarket<T> {
    type Output = T;

    fn index(&self, market: MarketId) -> &T {
        &self.slots[market.index()]
    }
}

impl<T> IndexMut<MarketId> for PerMarket<T> {
    fn index_mut(&mut self, market: MarketId) -> &mut T {
        &mut self.slots[market.index()]
    }
}

/// Bidirectional binding between market ids and deployed cToken addresses.
#[derive(Debug, Clone, Default)]
pub struct MarketMap {
    by_market: HashMap<MarketId, Address>,
    by_address: HashMap<Address, MarketId>,
}

impl MarketMap {
    pub fn new(entries: impl IntoIterator<Item = (MarketId, Address)>) -> Self {
        let mut map = Self::default();
        for (market, address) in entries {
            map.by_market.insert(market, address);
            map.by_address.insert(address, market);
        }
        map
    }

    pub fn market_of(&self, address: &Address) -> Option<MarketId> {
        self.by_address.get(address).copied()
    }

    pub fn address_of(&self, market: MarketId) -> Option<Address> {
        self.by_market.get(&market).copied()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.by_address.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_market.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_market.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_id_order_is_dense() {
        for (i, market) in MarketId::ALL.iter().enumerate() {
            assert_eq!(market.index(), i);
        }
    }

    #[test]
    fn test_per_market_indexing() {
        let mut table: PerMarket<u64> = PerMarket::default();
        table[MarketId::CDai] = 7;
        assert_eq!(table[MarketId::CDai], 7);
        assert_eq!(table[MarketId::CEth], 0);
        assert_eq!(table.iter().count(), MarketId::COUNT);
    }

    #[test]
    fn test_market_map_lookup() {
        let ceth = address!("4ddc2d193948926d02f9b1fe9e1daa0718270ed5");
        let map = MarketMap::new([(MarketId::CEth, ceth)]);
        assert_eq!(map.market_of(&ceth), Some(MarketId::CEth));
        assert_eq!(map.address_of(MarketId::CEth), Some(ceth));
        assert_eq!(map.market_of(&Address::ZERO), None);
    }

    #[test]
    fn test_serde_uses_symbols() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            market: MarketId,
        }

        let rendered = toml::to_string(&Wrapper { market: MarketId::CWbtc }).unwrap();
        assert!(rendered.contains("cWBTC"));

        let parsed: Wrapper = toml::from_str("market = \"cUSDC\"").unwrap();
        assert_eq!(parsed.market, MarketId::CUsdc);
    }
}
