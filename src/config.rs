use crate::error::{AppError, Result};

pub const HYPERLIQUID_API_URL: &str = "https://api.hyperliquid.xyz";
pub const LIGHTER_API_URL: &str = "https://mainnet.zklighter.elliot.ai";
pub const PACIFICA_API_URL: &str = "https://api.pacifica.fi";
pub const ASTER_API_URL: &str = "https://fapi.asterdex.com";
pub const EXTENDED_API_URL: &str = "https://starknet.app.extended.exchange";

/// Exchanges tracked when KNOWN_EXCHANGES is not set.
pub const DEFAULT_EXCHANGES: &[&str] = &["hyperliquid", "lighter", "pacifica", "aster", "extended"];

/// Prices at or above this are treated as garbage from the source.
pub const MAX_PRICE: f64 = 1e12;

/// Allowed push interval range (minutes), inclusive.
pub const MIN_PUSH_INTERVAL_MINUTES: u32 = 1;
pub const MAX_PUSH_INTERVAL_MINUTES: u32 = 60;

/// Push interval for users who never picked one.
pub const DEFAULT_PUSH_INTERVAL_MINUTES: u32 = 5;

/// Refresh cycle period in seconds: fetch all, prune, recompute.
pub const REFRESH_INTERVAL_SECS: u64 = 300;

/// Per-exchange fetch timeout (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 20;

/// Snapshots not refreshed for this long are pruned (seconds). 0 disables.
pub const SNAPSHOT_MAX_AGE_SECS: u64 = 3600;

/// Rows returned by a top-N query when the caller does not pass a limit.
pub const DEFAULT_TOP_N: i64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Exchange names accepted by maintenance and preference validation
    /// (KNOWN_EXCHANGES, comma-separated).
    pub known_exchanges: Vec<String>,
    pub refresh_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub snapshot_max_age_secs: u64,
    pub top_n: i64,
    pub hyperliquid_api_url: String,
    pub lighter_api_url: String,
    pub pacifica_api_url: String,
    pub aster_api_url: String,
    pub extended_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let known_exchanges = match std::env::var("KNOWN_EXCHANGES") {
            Ok(raw) => parse_exchange_list(&raw),
            Err(_) => DEFAULT_EXCHANGES.iter().map(|s| s.to_string()).collect(),
        };
        if known_exchanges.is_empty() {
            return Err(AppError::Config(
                "KNOWN_EXCHANGES must list at least one exchange".to_string(),
            ));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "spreads.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            known_exchanges,
            refresh_interval_secs: std::env::var("REFRESH_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|&s| s > 0)
                .unwrap_or(REFRESH_INTERVAL_SECS),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|&s| s > 0)
                .unwrap_or(FETCH_TIMEOUT_SECS),
            snapshot_max_age_secs: std::env::var("SNAPSHOT_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(SNAPSHOT_MAX_AGE_SECS),
            top_n: std::env::var("TOP_N")
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_TOP_N),
            hyperliquid_api_url: env_url("HYPERLIQUID_API_URL", HYPERLIQUID_API_URL),
            lighter_api_url: env_url("LIGHTER_API_URL", LIGHTER_API_URL),
            pacifica_api_url: env_url("PACIFICA_API_URL", PACIFICA_API_URL),
            aster_api_url: env_url("ASTER_API_URL", ASTER_API_URL),
            extended_api_url: env_url("EXTENDED_API_URL", EXTENDED_API_URL),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "spreads.db".to_string(),
            api_port: 3000,
            known_exchanges: DEFAULT_EXCHANGES.iter().map(|s| s.to_string()).collect(),
            refresh_interval_secs: REFRESH_INTERVAL_SECS,
            fetch_timeout_secs: FETCH_TIMEOUT_SECS,
            snapshot_max_age_secs: SNAPSHOT_MAX_AGE_SECS,
            top_n: DEFAULT_TOP_N,
            hyperliquid_api_url: HYPERLIQUID_API_URL.to_string(),
            lighter_api_url: LIGHTER_API_URL.to_string(),
            pacifica_api_url: PACIFICA_API_URL.to_string(),
            aster_api_url: ASTER_API_URL.to_string(),
            extended_api_url: EXTENDED_API_URL.to_string(),
        }
    }
}

fn env_url(key: &str, default: &str) -> String {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// `" Hyperliquid, lighter,,aster "` → `["hyperliquid", "lighter", "aster"]`.
pub fn parse_exchange_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_list_is_trimmed_lowercased_and_deduplicated() {
        let list = parse_exchange_list(" Hyperliquid, lighter,,aster ,LIGHTER");
        assert_eq!(list, vec!["hyperliquid", "lighter", "aster"]);
    }

    #[test]
    fn blank_exchange_list_is_empty() {
        assert!(parse_exchange_list(" , ,").is_empty());
    }
}
