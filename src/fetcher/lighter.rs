use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{value_as_f64, Fetcher};
use crate::error::{AppError, Result};
use crate::types::RawPair;

pub const EXCHANGE: &str = "lighter";

/// Last trade price per market from `orderBookDetails`.
pub struct LighterFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl LighterFetcher {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Fetcher for LighterFetcher {
    fn exchange(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_pairs(&self) -> Result<Vec<RawPair>> {
        let url = format!("{}/api/v1/orderBookDetails", self.base_url);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pairs = parse_pairs(&body)?;
        debug!(exchange = EXCHANGE, pairs = pairs.len(), "Parsed Lighter order books");
        Ok(pairs)
    }
}

/// The API reports failures in-band: `code != 200` carries a `message`.
pub fn parse_pairs(body: &Value) -> Result<Vec<RawPair>> {
    let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    if code != 200 {
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(AppError::Fetch(format!("lighter API code {code}: {message}")));
    }

    let details = body
        .get("order_book_details")
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();

    Ok(details
        .iter()
        .filter_map(|market| {
            let symbol = market.get("symbol")?.as_str()?;
            let price = market.get("last_trade_price").and_then(value_as_f64)?;
            Some(RawPair::new(symbol, price))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_last_trade_price() {
        let body = json!({
            "code": 200,
            "order_book_details": [
                {"symbol": "ETH", "last_trade_price": 3101.2},
                {"symbol": "BTC", "last_trade_price": "65010"},
                {"symbol": "NEW"}
            ]
        });
        let pairs = parse_pairs(&body).unwrap();
        assert_eq!(
            pairs,
            vec![RawPair::new("ETH", 3101.2), RawPair::new("BTC", 65010.0)]
        );
    }

    #[test]
    fn in_band_error_code_fails_the_fetch() {
        let body = json!({"code": 500, "message": "maintenance"});
        let err = parse_pairs(&body).unwrap_err();
        assert!(err.to_string().contains("maintenance"));
    }
}
