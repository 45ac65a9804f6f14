use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{first_positive, first_str, strip_quote, Fetcher};
use crate::error::{AppError, Result};
use crate::types::RawPair;

pub const EXCHANGE: &str = "extended";

/// Market list with embedded `marketStats`; `ENA-USD` is stored as `ENA`.
pub struct ExtendedFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ExtendedFetcher {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Fetcher for ExtendedFetcher {
    fn exchange(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_pairs(&self) -> Result<Vec<RawPair>> {
        let url = format!("{}/api/v1/info/markets", self.base_url);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pairs = parse_pairs(&body)?;
        debug!(exchange = EXCHANGE, pairs = pairs.len(), "Parsed Extended markets");
        Ok(pairs)
    }
}

pub fn parse_pairs(body: &Value) -> Result<Vec<RawPair>> {
    let markets = body
        .get("data")
        .unwrap_or(body)
        .as_array()
        .ok_or_else(|| AppError::Fetch("extended markets response is not a list".to_string()))?;

    Ok(markets
        .iter()
        .filter_map(|m| {
            let symbol = first_str(m, &["name", "symbol", "uiName"])?;
            let price = market_price(m)?;
            Some(RawPair::new(strip_quote(symbol), price))
        })
        .collect())
}

/// Top-level price fields, then `marketStats` mark/last/index, then bid/ask mid.
fn market_price(m: &Value) -> Option<f64> {
    if let Some(p) = first_positive(m, &["price", "lastPrice", "markPrice"]) {
        return Some(p);
    }
    let stats = m.get("marketStats")?;
    if let Some(p) = first_positive(stats, &["markPrice", "lastPrice", "indexPrice"]) {
        return Some(p);
    }
    let bid = first_positive(stats, &["bidPrice"])?;
    let ask = first_positive(stats, &["askPrice"])?;
    Some((bid + ask) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_market_stats() {
        let body = json!({
            "status": "OK",
            "data": [
                {"name": "BTC-USD", "marketStats": {"markPrice": "65002.5", "lastPrice": "65000"}},
                {"name": "ENA-USD", "marketStats": {"markPrice": "0", "lastPrice": "0.51"}},
                {"name": "XRP-USD", "marketStats": {"bidPrice": "2.00", "askPrice": "2.02"}},
                {"name": "EMPTY-USD", "marketStats": {}}
            ]
        });
        let pairs = parse_pairs(&body).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], RawPair::new("BTC", 65002.5));
        assert_eq!(pairs[1], RawPair::new("ENA", 0.51));
        assert_eq!(pairs[2].symbol, "XRP");
        assert!((pairs[2].price - 2.01).abs() < 1e-9);
    }

    #[test]
    fn non_list_data_is_an_error() {
        assert!(parse_pairs(&json!({"status": "ERROR", "error": {}})).is_err());
    }
}
