//! Exchange price sources.
//!
//! Each fetcher reduces its exchange's payload to canonical [`RawPair`]
//! records; every source-specific field guess stays in its own module.

pub mod aster;
pub mod extended;
pub mod hyperliquid;
pub mod lighter;
pub mod pacifica;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::types::RawPair;

pub use aster::AsterFetcher;
pub use extended::ExtendedFetcher;
pub use hyperliquid::HyperliquidFetcher;
pub use lighter::LighterFetcher;
pub use pacifica::PacificaFetcher;

/// One exchange's "list every symbol with its current price" call.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Exchange name as stored in `price_snapshot.exchange`.
    fn exchange(&self) -> &str;

    /// May fail or return an empty list; the caller isolates both.
    async fn fetch_pairs(&self) -> Result<Vec<RawPair>>;
}

/// Build a fetcher for every configured exchange that has an implementation.
pub fn default_fetchers(cfg: &Config) -> Result<Vec<Arc<dyn Fetcher>>> {
    let client = build_client(Duration::from_secs(cfg.fetch_timeout_secs))?;
    let mut fetchers: Vec<Arc<dyn Fetcher>> = Vec::new();

    for name in &cfg.known_exchanges {
        let fetcher: Arc<dyn Fetcher> = match name.as_str() {
            hyperliquid::EXCHANGE => Arc::new(HyperliquidFetcher::new(
                client.clone(),
                cfg.hyperliquid_api_url.clone(),
            )),
            lighter::EXCHANGE => {
                Arc::new(LighterFetcher::new(client.clone(), cfg.lighter_api_url.clone()))
            }
            pacifica::EXCHANGE => {
                Arc::new(PacificaFetcher::new(client.clone(), cfg.pacifica_api_url.clone()))
            }
            aster::EXCHANGE => {
                Arc::new(AsterFetcher::new(client.clone(), cfg.aster_api_url.clone()))
            }
            extended::EXCHANGE => {
                Arc::new(ExtendedFetcher::new(client.clone(), cfg.extended_api_url.clone()))
            }
            other => {
                warn!(exchange = other, "No fetcher implemented for configured exchange, skipping");
                continue;
            }
        };
        fetchers.push(fetcher);
    }

    Ok(fetchers)
}

pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Numbers arrive as JSON numbers or numeric strings depending on the source.
pub(crate) fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

/// First key in `keys` holding a positive price.
pub(crate) fn first_positive(obj: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(value_as_f64))
        .find(|p| *p > 0.0)
}

/// First key in `keys` holding a non-blank string.
pub(crate) fn first_str<'a>(obj: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// `BTCUSDT` → `BTC`, `ENA-USD` → `ENA`, `ETH/USDC` → `ETH`.
pub(crate) fn strip_quote(symbol: &str) -> String {
    let s = symbol.trim().to_uppercase();
    for sep in ['-', '/'] {
        if let Some((base, quote)) = s.split_once(sep) {
            if matches!(quote, "USD" | "USDT" | "USDC") && !base.is_empty() {
                return base.to_string();
            }
        }
    }
    for quote in ["USDT", "USDC", "USD"] {
        if let Some(base) = s.strip_suffix(quote) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    s
}
