//! Reporter client for signed oracle price messages.
//!
//! The open price feed publishes a payload of ABI-encoded price messages,
//! their signatures, and the decoded prices per symbol. The on-chain entry
//! point accepts the messages verbatim, so the client keeps them as opaque
//! bytes.

use std::collections::HashMap;

use alloy::primitives::Bytes;
use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use sentinel_core::Dec;

/// Decoded reporter payload.
#[derive(Debug, Clone)]
pub struct ReporterPayload {
    /// Reporter-side unix timestamp of the message set.
    pub timestamp: u64,
    pub messages: Vec<Bytes>,
    pub signatures: Vec<Bytes>,
    /// USD price per symbol.
    pub prices: HashMap<String, Dec>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    timestamp: String,
    messages: Vec<String>,
    signatures: Vec<String>,
    prices: HashMap<String, String>,
}

impl TryFrom<RawPayload> for ReporterPayload {
    type Error = anyhow::Error;

    fn try_from(raw: RawPayload) -> anyhow::Result<Self> {
        let timestamp = raw.timestamp.parse().context("reporter timestamp")?;
        let messages = raw
            .messages
            .iter()
            .map(|m| m.parse::<Bytes>().context("reporter message hex"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let signatures = raw
            .signatures
            .iter()
            .map(|s| s.parse::<Bytes>().context("reporter signature hex"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let prices = raw
            .prices
            .into_iter()
            .map(|(symbol, price)| {
                let price: Dec = price
                    .parse()
                    .map_err(|e| anyhow::anyhow!("price for {symbol}: {e}"))?;
                Ok((symbol, price))
            })
            .collect::<anyhow::Result<HashMap<_, _>>>()?;
        Ok(Self {
            timestamp,
            messages,
            signatures,
            prices,
        })
    }
}

/// HTTP client for the reporter endpoint.
pub struct ReporterClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ReporterClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Fetch the current message set.
    pub async fn fetch(&self) -> anyhow::Result<ReporterPayload> {
        let raw: RawPayload = self
            .http
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let payload = ReporterPayload::try_from(raw)?;
        debug!(
            timestamp = payload.timestamp,
            messages = payload.messages.len(),
            symbols = payload.prices.len(),
            "reporter payload fetched"
        );
        Ok(payload)
    }
}
