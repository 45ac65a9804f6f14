use std::collections::{BTreeMap, HashSet};

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{
    is_valid_price, normalize_symbol, now_ns, ExchangeStat, PriceSnapshot, RawPair,
};

/// Outcome of one `upsert` batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    /// Rows inserted or overwritten.
    pub written: usize,
    /// Entries skipped for a blank symbol or an invalid price.
    pub rejected: usize,
    /// Entries whose individual write failed in the storage engine.
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// Durable table of current prices, one row per (symbol, exchange).
#[derive(Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Validate and write one exchange's batch.
    ///
    /// Invalid entries are skipped and counted, a failing row is logged and
    /// skipped; neither aborts the batch. Within a batch the last entry for a
    /// symbol wins.
    pub async fn upsert(&self, exchange: &str, entries: &[RawPair]) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();

        // symbol → price, keeping the last occurrence
        let mut valid: BTreeMap<String, f64> = BTreeMap::new();
        for entry in entries {
            match normalize_symbol(&entry.symbol) {
                Some(symbol) if is_valid_price(entry.price) => {
                    valid.insert(symbol, entry.price);
                }
                _ => {
                    stats.rejected += 1;
                    debug!(
                        exchange,
                        symbol = %entry.symbol,
                        price = entry.price,
                        "Rejected snapshot entry"
                    );
                }
            }
        }

        if valid.is_empty() {
            return Ok(stats);
        }

        let updated_at = now_ns();
        let mut tx = self.pool.begin().await?;
        for (symbol, price) in &valid {
            let res = sqlx::query(
                r#"
                INSERT INTO price_snapshot (symbol, exchange, price, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(symbol, exchange) DO UPDATE SET
                    price = excluded.price,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(symbol)
            .bind(exchange)
            .bind(price)
            .bind(updated_at)
            .execute(&mut *tx)
            .await;

            match res {
                Ok(_) => stats.written += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(exchange, symbol = %symbol, "Snapshot write failed: {e}");
                }
            }
        }
        tx.commit().await?;

        Ok(stats)
    }

    /// Delete every row for `exchange` whose symbol is not in `valid_symbols`.
    /// Returns the number of rows removed.
    pub async fn sync_exchange_snapshot(
        &self,
        exchange: &str,
        valid_symbols: &[String],
    ) -> Result<u64> {
        let keep: HashSet<String> = valid_symbols
            .iter()
            .filter_map(|s| normalize_symbol(s))
            .collect();

        let stored: Vec<String> =
            sqlx::query_scalar("SELECT symbol FROM price_snapshot WHERE exchange = ?")
                .bind(exchange)
                .fetch_all(&self.pool)
                .await?;

        let retired: Vec<&String> = stored.iter().filter(|s| !keep.contains(*s)).collect();
        if retired.is_empty() {
            return Ok(0);
        }

        let mut removed = 0u64;
        let mut tx = self.pool.begin().await?;
        for symbol in retired {
            let res = sqlx::query("DELETE FROM price_snapshot WHERE exchange = ? AND symbol = ?")
                .bind(exchange)
                .bind(symbol)
                .execute(&mut *tx)
                .await?;
            removed += res.rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }

    /// Current rows. Filtered by exchange → ordered by symbol; otherwise by (exchange, symbol).
    pub async fn latest(&self, exchange: Option<&str>) -> Result<Vec<PriceSnapshot>> {
        let rows = match exchange {
            Some(ex) => {
                sqlx::query_as::<_, PriceSnapshot>(
                    r#"
                    SELECT symbol, exchange, price, updated_at
                    FROM price_snapshot
                    WHERE exchange = ? AND price IS NOT NULL
                    ORDER BY symbol
                    "#,
                )
                .bind(ex)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PriceSnapshot>(
                    r#"
                    SELECT symbol, exchange, price, updated_at
                    FROM price_snapshot
                    WHERE price IS NOT NULL
                    ORDER BY exchange, symbol
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Distinct symbol count per exchange.
    pub async fn exchange_stats(&self) -> Result<Vec<ExchangeStat>> {
        let rows = sqlx::query_as::<_, ExchangeStat>(
            r#"
            SELECT exchange, COUNT(DISTINCT symbol) AS symbol_count
            FROM price_snapshot
            GROUP BY exchange
            ORDER BY exchange
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_snapshot")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::memory_pool;

    fn pairs(items: &[(&str, f64)]) -> Vec<RawPair> {
        items.iter().map(|(s, p)| RawPair::new(*s, *p)).collect()
    }

    #[tokio::test]
    async fn second_upsert_overwrites_price() {
        let store = SnapshotStore::new(memory_pool().await);

        store.upsert("ex1", &pairs(&[("BTC", 100.0)])).await.unwrap();
        store.upsert("ex1", &pairs(&[("BTC", 101.5)])).await.unwrap();

        let rows = store.latest(Some("ex1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "BTC");
        assert!((rows[0].price - 101.5).abs() < 1e-9, "price={}", rows[0].price);
    }

    #[tokio::test]
    async fn invalid_prices_rejected_individually() {
        let store = SnapshotStore::new(memory_pool().await);

        let stats = store
            .upsert(
                "ex1",
                &pairs(&[
                    ("BTC", 0.0),
                    ("ETH", f64::NAN),
                    ("SOL", -5.0),
                    ("DOGE", 0.12),
                    ("XRP", 1e13),
                    ("  ", 1.0),
                    ("ARB", 1.1),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.rejected, 5);
        assert_eq!(stats.failed, 0);
        let symbols: Vec<String> = store
            .latest(Some("ex1"))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.symbol)
            .collect();
        assert_eq!(symbols, vec!["ARB", "DOGE"]);
    }

    #[tokio::test]
    async fn symbols_are_normalized_before_write() {
        let store = SnapshotStore::new(memory_pool().await);

        let stats = store
            .upsert("ex1", &pairs(&[(" btc ", 100.0), ("BTC", 102.0)]))
            .await
            .unwrap();

        assert_eq!(stats.written, 1);
        let rows = store.latest(None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "BTC");
        assert!((rows[0].price - 102.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failing_row_is_skipped_and_counted() {
        let pool = memory_pool().await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_bad BEFORE INSERT ON price_snapshot
            WHEN NEW.symbol = 'BAD'
            BEGIN
                SELECT RAISE(ABORT, 'rejected by trigger');
            END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        let store = SnapshotStore::new(pool);

        let stats = store
            .upsert("ex1", &pairs(&[("BAD", 1.0), ("GOOD", 2.0)]))
            .await
            .unwrap();

        assert_eq!(stats, UpsertStats { written: 1, rejected: 0, failed: 1 });
        let rows = store.latest(None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "GOOD");
    }

    #[tokio::test]
    async fn sync_retires_unlisted_symbols() {
        let store = SnapshotStore::new(memory_pool().await);
        store
            .upsert("ex1", &pairs(&[("BTC", 100.0), ("ETH", 10.0)]))
            .await
            .unwrap();
        store.upsert("ex2", &pairs(&[("ETH", 10.5)])).await.unwrap();

        let removed = store
            .sync_exchange_snapshot("ex1", &["BTC".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, 1);
        let ex1: Vec<String> = store
            .latest(Some("ex1"))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.symbol)
            .collect();
        assert_eq!(ex1, vec!["BTC"]);
        // Other exchanges untouched
        assert_eq!(store.latest(Some("ex2")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_orders_by_exchange_then_symbol() {
        let store = SnapshotStore::new(memory_pool().await);
        store
            .upsert("lighter", &pairs(&[("ETH", 10.0), ("BTC", 100.0)]))
            .await
            .unwrap();
        store
            .upsert("aster", &pairs(&[("SOL", 1.0), ("BTC", 101.0)]))
            .await
            .unwrap();

        let keys: Vec<(String, String)> = store
            .latest(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.exchange, r.symbol))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("aster".to_string(), "BTC".to_string()),
                ("aster".to_string(), "SOL".to_string()),
                ("lighter".to_string(), "BTC".to_string()),
                ("lighter".to_string(), "ETH".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn exchange_stats_counts_symbols() {
        let store = SnapshotStore::new(memory_pool().await);
        store
            .upsert("a", &pairs(&[("BTC", 1.0), ("ETH", 2.0)]))
            .await
            .unwrap();
        store.upsert("b", &pairs(&[("BTC", 1.0)])).await.unwrap();

        let stats = store.exchange_stats().await.unwrap();
        assert_eq!(
            stats,
            vec![
                ExchangeStat { exchange: "a".to_string(), symbol_count: 2 },
                ExchangeStat { exchange: "b".to_string(), symbol_count: 1 },
            ]
        );
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
