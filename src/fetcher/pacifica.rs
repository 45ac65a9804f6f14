use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{first_positive, Fetcher};
use crate::error::{AppError, Result};
use crate::types::RawPair;

pub const EXCHANGE: &str = "pacifica";

/// Mark price (falling back to mid, then oracle) from the public prices endpoint.
pub struct PacificaFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl PacificaFetcher {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Fetcher for PacificaFetcher {
    fn exchange(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_pairs(&self) -> Result<Vec<RawPair>> {
        let url = format!("{}/api/v1/info/prices", self.base_url);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pairs = parse_pairs(&body)?;
        debug!(exchange = EXCHANGE, pairs = pairs.len(), "Parsed Pacifica prices");
        Ok(pairs)
    }
}

pub fn parse_pairs(body: &Value) -> Result<Vec<RawPair>> {
    let items = body
        .get("data")
        .unwrap_or(body)
        .as_array()
        .ok_or_else(|| AppError::Fetch("pacifica prices response is not a list".to_string()))?;

    Ok(items
        .iter()
        .filter_map(|p| {
            let symbol = p.get("symbol")?.as_str()?;
            let price = first_positive(p, &["mark", "mid", "oracle"])?;
            Some(RawPair::new(symbol, price))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_mark_then_mid_then_oracle() {
        let body = json!({
            "success": true,
            "data": [
                {"symbol": "BTC", "mark": "65000", "mid": "64990", "oracle": "64980"},
                {"symbol": "ETH", "mark": null, "mid": "3100", "oracle": "3099"},
                {"symbol": "SOL", "oracle": 150.5},
                {"symbol": "DEAD"}
            ]
        });
        let pairs = parse_pairs(&body).unwrap();
        assert_eq!(
            pairs,
            vec![
                RawPair::new("BTC", 65000.0),
                RawPair::new("ETH", 3100.0),
                RawPair::new("SOL", 150.5),
            ]
        );
    }

    #[test]
    fn bare_list_is_accepted() {
        let body = json!([{"symbol": "BTC", "mark": 1.0}]);
        assert_eq!(parse_pairs(&body).unwrap().len(), 1);
    }
}
