use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{value_as_f64, Fetcher};
use crate::error::{AppError, Result};
use crate::types::RawPair;

pub const EXCHANGE: &str = "hyperliquid";

/// Perp universe from `{"type":"meta"}`, priced from `{"type":"allMids"}`.
pub struct HyperliquidFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HyperliquidFetcher {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn info(&self, kind: &str) -> Result<Value> {
        let url = format!("{}/info", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "type": kind }))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Fetcher for HyperliquidFetcher {
    fn exchange(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_pairs(&self) -> Result<Vec<RawPair>> {
        let meta = self.info("meta").await?;
        let mids = self.info("allMids").await?;
        let pairs = parse_pairs(&meta, &mids)?;
        debug!(exchange = EXCHANGE, pairs = pairs.len(), "Parsed Hyperliquid mids");
        Ok(pairs)
    }
}

/// Only universe assets that have a mid are returned.
pub fn parse_pairs(meta: &Value, mids: &Value) -> Result<Vec<RawPair>> {
    let universe = meta
        .get("universe")
        .and_then(|u| u.as_array())
        .ok_or_else(|| AppError::Fetch("hyperliquid meta has no universe array".to_string()))?;
    let mids = mids
        .as_object()
        .ok_or_else(|| AppError::Fetch("hyperliquid allMids is not an object".to_string()))?;

    Ok(universe
        .iter()
        .filter_map(|asset| asset.get("name").and_then(|n| n.as_str()))
        .filter_map(|name| {
            let price = mids.get(name).and_then(value_as_f64)?;
            Some(RawPair::new(name, price))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_universe_with_mids() {
        let meta = json!({"universe": [{"name": "BTC"}, {"name": "ETH"}, {"name": "NOMID"}]});
        let mids = json!({"BTC": "65000.5", "ETH": 3100.25, "@107": "1.0"});

        let pairs = parse_pairs(&meta, &mids).unwrap();
        assert_eq!(
            pairs,
            vec![RawPair::new("BTC", 65000.5), RawPair::new("ETH", 3100.25)]
        );
    }

    #[test]
    fn missing_universe_is_an_error() {
        assert!(parse_pairs(&json!({}), &json!({})).is_err());
    }
}
