use std::collections::{BTreeMap, BTreeSet};

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;

use crate::error::Result;
use crate::types::{is_valid_price, now_ns, PriceComparison, PriceSnapshot};

const COMPARISON_COLUMNS: &str =
    "symbol, exchange_a, exchange_b, price_a, price_b, abs_diff, pct_diff, computed_at";

/// Rebuilds and queries the pairwise spread table.
#[derive(Clone)]
pub struct DifferenceEngine {
    pool: SqlitePool,
}

impl DifferenceEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the whole comparison table with every same-symbol snapshot pair.
    ///
    /// Rows are computed up front and swapped in under one transaction, so a
    /// concurrent reader sees either the previous table or the new one.
    /// Returns the number of comparisons written.
    pub async fn recompute(&self) -> Result<usize> {
        let snapshots = sqlx::query_as::<_, PriceSnapshot>(
            r#"
            SELECT symbol, exchange, price, updated_at
            FROM price_snapshot
            WHERE price IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let comparisons = compute_comparisons(&snapshots, now_ns());

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM price_comparison")
            .execute(&mut *tx)
            .await?;
        for c in &comparisons {
            sqlx::query(
                r#"
                INSERT INTO price_comparison (
                    symbol, exchange_a, exchange_b, price_a, price_b,
                    abs_diff, pct_diff, computed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&c.symbol)
            .bind(&c.exchange_a)
            .bind(&c.exchange_b)
            .bind(c.price_a)
            .bind(c.price_b)
            .bind(c.abs_diff)
            .bind(c.pct_diff)
            .bind(c.computed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            snapshots = snapshots.len(),
            comparisons = comparisons.len(),
            "Recomputed {} comparisons from {} snapshots",
            comparisons.len(),
            snapshots.len(),
        );
        Ok(comparisons.len())
    }

    /// Largest percentage spreads first; ties broken by symbol, then exchange pair.
    pub async fn top_differences(&self, limit: i64) -> Result<Vec<PriceComparison>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, PriceComparison>(&format!(
            r#"
            SELECT {COMPARISON_COLUMNS}
            FROM price_comparison
            ORDER BY pct_diff DESC, symbol ASC, exchange_a ASC, exchange_b ASC
            LIMIT ?
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Like [`top_differences`](Self::top_differences), keeping only pairs whose
    /// two exchanges are both in `exchanges`. Fewer than two distinct names
    /// yields an empty list.
    pub async fn top_differences_filtered(
        &self,
        exchanges: &[String],
        limit: i64,
    ) -> Result<Vec<PriceComparison>> {
        let selected: Vec<String> = exchanges
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if selected.len() < 2 || limit <= 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {COMPARISON_COLUMNS} FROM price_comparison WHERE exchange_a IN "
        ));
        push_in_list(&mut qb, &selected);
        qb.push(" AND exchange_b IN ");
        push_in_list(&mut qb, &selected);
        qb.push(" ORDER BY pct_diff DESC, symbol ASC, exchange_a ASC, exchange_b ASC LIMIT ");
        qb.push_bind(limit);

        let rows = qb
            .build_query_as::<PriceComparison>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_comparison")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn push_in_list(qb: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    qb.push("(");
    let mut list = qb.separated(", ");
    for v in values {
        list.push_bind(v.clone());
    }
    qb.push(")");
}

/// Every unordered exchange pair per symbol, `exchange_a < exchange_b`.
/// Output is ordered by (symbol, exchange_a, exchange_b).
pub fn compute_comparisons(snapshots: &[PriceSnapshot], computed_at: i64) -> Vec<PriceComparison> {
    // symbol → exchange → price
    let mut by_symbol: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
    for s in snapshots {
        if !is_valid_price(s.price) {
            continue;
        }
        by_symbol
            .entry(s.symbol.as_str())
            .or_default()
            .insert(s.exchange.as_str(), s.price);
    }

    let mut out = Vec::new();
    for (symbol, quotes) in &by_symbol {
        let quotes: Vec<(&str, f64)> = quotes.iter().map(|(e, p)| (*e, *p)).collect();
        for (i, &(exchange_a, price_a)) in quotes.iter().enumerate() {
            for &(exchange_b, price_b) in &quotes[i + 1..] {
                let (abs_diff, pct_diff) = spread(price_a, price_b);
                out.push(PriceComparison {
                    symbol: symbol.to_string(),
                    exchange_a: exchange_a.to_string(),
                    exchange_b: exchange_b.to_string(),
                    price_a,
                    price_b,
                    abs_diff,
                    pct_diff,
                    computed_at,
                });
            }
        }
    }
    out
}

/// `(|a - b|, |a - b| / mean(a, b) * 100)`. Both prices must be positive.
pub fn spread(price_a: f64, price_b: f64) -> (f64, f64) {
    let abs_diff = (price_a - price_b).abs();
    let mean = (price_a + price_b) / 2.0;
    (abs_diff, abs_diff / mean * 100.0)
}
