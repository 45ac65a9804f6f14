use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::MAX_PRICE;

// ---------------------------------------------------------------------------
// Fetcher output
// ---------------------------------------------------------------------------

/// Canonical `{symbol, price}` record every fetcher reduces its payload to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPair {
    pub symbol: String,
    pub price: f64,
}

impl RawPair {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self { symbol: symbol.into(), price }
    }
}

// ---------------------------------------------------------------------------
// Snapshots and comparisons
// ---------------------------------------------------------------------------

/// Latest known price of one symbol on one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub exchange: String,
    pub price: f64,
    /// Nanosecond UTC epoch timestamp.
    pub updated_at: i64,
}

/// Spread between two exchanges for one symbol. `exchange_a < exchange_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceComparison {
    pub symbol: String,
    pub exchange_a: String,
    pub exchange_b: String,
    pub price_a: f64,
    pub price_b: f64,
    pub abs_diff: f64,
    pub pct_diff: f64,
    /// Nanosecond UTC epoch timestamp.
    pub computed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExchangeStat {
    pub exchange: String,
    pub symbol_count: i64,
}

// ---------------------------------------------------------------------------
// User preferences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: i64,
    /// Sorted, deduplicated exchange names.
    pub exchanges: Vec<String>,
    pub interval_minutes: u32,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Trim + uppercase. Returns None for a blank symbol.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_uppercase())
    }
}

/// Finite, strictly positive, below the sanity ceiling.
pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0 && price < MAX_PRICE
}

pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
