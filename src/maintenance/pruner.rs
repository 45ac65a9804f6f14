use std::time::Duration;

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;

use crate::config::MAX_PRICE;
use crate::error::{AppError, Result};
use crate::types::now_ns;

/// Rows removed by one `prune` pass, by reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub unlisted_exchange: u64,
    pub invalid_price: u64,
    pub duplicate: u64,
    pub stale: u64,
    pub orphaned_comparisons: u64,
}

impl PruneStats {
    pub fn total(&self) -> u64 {
        self.unlisted_exchange
            + self.invalid_price
            + self.duplicate
            + self.stale
            + self.orphaned_comparisons
    }
}

/// Enforces snapshot invariants once per refresh cycle, between the
/// per-exchange writes and the comparison rebuild.
#[derive(Clone)]
pub struct MaintenanceJob {
    pool: SqlitePool,
    /// Snapshots older than this are dropped. Zero disables the age check.
    max_snapshot_age: Duration,
}

impl MaintenanceJob {
    pub fn new(pool: SqlitePool, max_snapshot_age: Duration) -> Self {
        Self { pool, max_snapshot_age }
    }

    /// Delete snapshots that break an invariant, then comparisons that lost a
    /// snapshot. Running it twice in a row deletes nothing the second time.
    pub async fn prune(&self, valid_exchanges: &[String]) -> Result<PruneStats> {
        if valid_exchanges.is_empty() {
            return Err(AppError::Config(
                "prune needs at least one valid exchange".to_string(),
            ));
        }

        let mut stats = PruneStats::default();
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("DELETE FROM price_snapshot WHERE exchange NOT IN (");
        let mut list = qb.separated(", ");
        for ex in valid_exchanges {
            list.push_bind(ex.clone());
        }
        qb.push(")");
        stats.unlisted_exchange = qb.build().execute(&mut *tx).await?.rows_affected();

        // NaN is stored as NULL by SQLite; +inf is caught by the upper bound.
        stats.invalid_price = sqlx::query(
            r#"
            DELETE FROM price_snapshot
            WHERE price IS NULL
               OR typeof(price) NOT IN ('real', 'integer')
               OR price <= 0
               OR price >= ?
               OR trim(symbol) = ''
            "#,
        )
        .bind(MAX_PRICE)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        stats.duplicate = sqlx::query(
            r#"
            DELETE FROM price_snapshot
            WHERE rowid IN (
                SELECT rowid FROM (
                    SELECT rowid,
                           ROW_NUMBER() OVER (
                               PARTITION BY symbol, exchange
                               ORDER BY updated_at DESC, rowid DESC
                           ) AS rn
                    FROM price_snapshot
                )
                WHERE rn > 1
            )
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if !self.max_snapshot_age.is_zero() {
            let age_ns = self.max_snapshot_age.as_nanos().min(i64::MAX as u128) as i64;
            let cutoff = now_ns().saturating_sub(age_ns);
            stats.stale = sqlx::query("DELETE FROM price_snapshot WHERE updated_at < ?")
                .bind(cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        stats.orphaned_comparisons = sqlx::query(
            r#"
            DELETE FROM price_comparison
            WHERE NOT EXISTS (
                    SELECT 1 FROM price_snapshot s
                    WHERE s.symbol = price_comparison.symbol
                      AND s.exchange = price_comparison.exchange_a
                )
               OR NOT EXISTS (
                    SELECT 1 FROM price_snapshot s
                    WHERE s.symbol = price_comparison.symbol
                      AND s.exchange = price_comparison.exchange_b
                )
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        info!(
            unlisted = stats.unlisted_exchange,
            invalid = stats.invalid_price,
            duplicate = stats.duplicate,
            stale = stats.stale,
            orphaned = stats.orphaned_comparisons,
            "Maintenance pruned {} rows",
            stats.total(),
        );
        Ok(stats)
    }
}
