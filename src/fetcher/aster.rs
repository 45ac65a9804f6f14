use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{first_positive, first_str, strip_quote, Fetcher};
use crate::error::{AppError, Result};
use crate::types::RawPair;

pub const EXCHANGE: &str = "aster";

/// Binance-style futures ticker; `BTCUSDT` is stored as `BTC`.
pub struct AsterFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl AsterFetcher {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Fetcher for AsterFetcher {
    fn exchange(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_pairs(&self) -> Result<Vec<RawPair>> {
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pairs = parse_pairs(&body)?;
        debug!(exchange = EXCHANGE, pairs = pairs.len(), "Parsed Aster tickers");
        Ok(pairs)
    }
}

pub fn parse_pairs(body: &Value) -> Result<Vec<RawPair>> {
    let tickers = body
        .as_array()
        .ok_or_else(|| AppError::Fetch("aster ticker response is not a list".to_string()))?;

    Ok(tickers
        .iter()
        .filter_map(|t| {
            let symbol = first_str(t, &["symbol", "pair"])?;
            let price = first_positive(t, &["price", "lastPrice", "markPrice"])?;
            Some(RawPair::new(strip_quote(symbol), price))
        })
        .collect())
}
