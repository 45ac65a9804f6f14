use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::Config;
use crate::detector::DifferenceEngine;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::maintenance::{MaintenanceJob, PruneStats};
use crate::state::SnapshotStore;
use crate::types::{is_valid_price, normalize_symbol, now_ns};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// At least one valid entry was written and the exchange was synced.
    Stored,
    /// The fetch succeeded but yielded nothing valid; stored rows were left alone.
    Empty,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub exchange: String,
    pub status: FetchStatus,
    pub written: usize,
    pub rejected: usize,
    pub retired: u64,
}

impl ExchangeOutcome {
    fn new(exchange: &str, status: FetchStatus) -> Self {
        Self {
            exchange: exchange.to_string(),
            status,
            written: 0,
            rejected: 0,
            retired: 0,
        }
    }
}

/// Summary of one fetch → persist → prune → recompute pass.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcomes: Vec<ExchangeOutcome>,
    pub pruned: PruneStats,
    pub comparisons: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FetchStatus::Failed | FetchStatus::TimedOut))
            .count()
    }
}

// ---------------------------------------------------------------------------
// RefreshOrchestrator
// ---------------------------------------------------------------------------

/// Drives the periodic refresh cycle. Fetches run concurrently and each one
/// persists its own result; prune and recompute run once every fetch settled.
pub struct RefreshOrchestrator {
    fetchers: Vec<Arc<dyn Fetcher>>,
    known_exchanges: Vec<String>,
    refresh_interval: Duration,
    fetch_timeout: Duration,
    store: SnapshotStore,
    maintenance: MaintenanceJob,
    engine: DifferenceEngine,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl RefreshOrchestrator {
    pub fn new(
        cfg: &Config,
        fetchers: Vec<Arc<dyn Fetcher>>,
        store: SnapshotStore,
        maintenance: MaintenanceJob,
        engine: DifferenceEngine,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            fetchers,
            known_exchanges: cfg.known_exchanges.clone(),
            refresh_interval: Duration::from_secs(cfg.refresh_interval_secs),
            fetch_timeout: Duration::from_secs(cfg.fetch_timeout_secs),
            store,
            maintenance,
            engine,
            health,
            latency,
        }
    }

    /// First cycle runs immediately. Returns once `shutdown` flips to true
    /// (or its sender is dropped); a cycle already in progress is finished first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            exchanges = self.fetchers.len(),
            interval_secs = self.refresh_interval.as_secs(),
            "Refresh loop started",
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.refresh_once().await {
                error!("Refresh cycle failed: {e}");
            }
        }

        info!("Refresh loop stopped");
    }

    pub async fn refresh_once(&self) -> Result<CycleReport> {
        let started = Instant::now();

        let outcomes = join_all(
            self.fetchers
                .iter()
                .map(|f| self.fetch_and_store(f.as_ref())),
        )
        .await;

        let pruned = self.maintenance.prune(&self.known_exchanges).await?;
        let comparisons = self.engine.recompute().await?;

        let report = CycleReport {
            outcomes,
            pruned,
            comparisons,
            elapsed: started.elapsed(),
        };

        self.health
            .record_cycle(now_ns().max(0) as u64, report.failures() as u64);
        self.latency.record(report.elapsed);

        let stored = report
            .outcomes
            .iter()
            .filter(|o| o.status == FetchStatus::Stored)
            .count();
        let written: usize = report.outcomes.iter().map(|o| o.written).sum();
        let rejected: usize = report.outcomes.iter().map(|o| o.rejected).sum();
        info!(
            stored,
            written,
            rejected,
            failed = report.failures(),
            pruned = report.pruned.total(),
            comparisons,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Refresh cycle complete: {stored}/{} exchanges stored, {comparisons} comparisons",
            report.outcomes.len(),
        );

        Ok(report)
    }

    /// Never fails: every error is logged and folded into the outcome.
    async fn fetch_and_store(&self, fetcher: &dyn Fetcher) -> ExchangeOutcome {
        let exchange = fetcher.exchange();

        let pairs = match timeout(self.fetch_timeout, fetcher.fetch_pairs()).await {
            Ok(Ok(pairs)) => pairs,
            Ok(Err(e)) => {
                warn!(exchange, "Fetch failed: {e}");
                return ExchangeOutcome::new(exchange, FetchStatus::Failed);
            }
            Err(_) => {
                warn!(
                    exchange,
                    timeout_secs = self.fetch_timeout.as_secs(),
                    "Fetch timed out",
                );
                return ExchangeOutcome::new(exchange, FetchStatus::TimedOut);
            }
        };

        let valid_symbols: Vec<String> = pairs
            .iter()
            .filter(|p| is_valid_price(p.price))
            .filter_map(|p| normalize_symbol(&p.symbol))
            .collect();
        if valid_symbols.is_empty() {
            info!(
                exchange,
                received = pairs.len(),
                "Fetch returned no valid entries, keeping stored rows"
            );
            let mut outcome = ExchangeOutcome::new(exchange, FetchStatus::Empty);
            outcome.rejected = pairs.len();
            return outcome;
        }

        let stats = match self.store.upsert(exchange, &pairs).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(exchange, "Snapshot upsert failed: {e}");
                return ExchangeOutcome::new(exchange, FetchStatus::Failed);
            }
        };

        let retired = match self.store.sync_exchange_snapshot(exchange, &valid_symbols).await {
            Ok(n) => n,
            Err(e) => {
                warn!(exchange, "Snapshot sync failed: {e}");
                0
            }
        };

        info!(
            exchange,
            written = stats.written,
            rejected = stats.rejected,
            failed = stats.failed,
            retired,
            "Stored {} prices from {exchange}",
            stats.written,
        );

        ExchangeOutcome {
            exchange: exchange.to_string(),
            status: FetchStatus::Stored,
            written: stats.written,
            rejected: stats.rejected,
            retired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::db::pool::memory_pool;
    use crate::error::AppError;
    use crate::types::RawPair;

    enum Behaviour {
        Pairs(Vec<RawPair>),
        Fail,
        Hang,
    }

    struct StubFetcher {
        name: &'static str,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        fn exchange(&self) -> &str {
            self.name
        }

        async fn fetch_pairs(&self) -> Result<Vec<RawPair>> {
            match &self.behaviour {
                Behaviour::Pairs(p) => Ok(p.clone()),
                Behaviour::Fail => Err(AppError::Fetch("boom".to_string())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn stub(name: &'static str, behaviour: Behaviour) -> Arc<dyn Fetcher> {
        Arc::new(StubFetcher { name, behaviour })
    }

    fn prices(items: &[(&str, f64)]) -> Behaviour {
        Behaviour::Pairs(items.iter().map(|(s, p)| RawPair::new(*s, *p)).collect())
    }

    struct Harness {
        orchestrator: RefreshOrchestrator,
        store: SnapshotStore,
        engine: DifferenceEngine,
        health: Arc<HealthState>,
    }

    async fn harness(known: &[&str], fetchers: Vec<Arc<dyn Fetcher>>) -> Harness {
        let pool = memory_pool().await;
        let cfg = Config {
            known_exchanges: known.iter().map(|s| s.to_string()).collect(),
            fetch_timeout_secs: 1,
            ..Config::default()
        };
        let store = SnapshotStore::new(pool.clone());
        let engine = DifferenceEngine::new(pool.clone());
        let health = Arc::new(HealthState::new());
        let orchestrator = RefreshOrchestrator::new(
            &cfg,
            fetchers,
            store.clone(),
            MaintenanceJob::new(pool, Duration::ZERO),
            engine.clone(),
            Arc::clone(&health),
            Arc::new(LatencyStats::new().unwrap()),
        );
        Harness { orchestrator, store, engine, health }
    }

    #[tokio::test]
    async fn cycle_stores_and_compares() {
        let h = harness(
            &["a", "b"],
            vec![
                stub("a", prices(&[("BTC", 100.0), ("ETH", 10.0)])),
                stub("b", prices(&[("BTC", 105.0)])),
            ],
        )
        .await;

        let report = h.orchestrator.refresh_once().await.unwrap();

        assert_eq!(report.failures(), 0);
        assert_eq!(report.comparisons, 1);
        let top = h.engine.top_differences(10).await.unwrap();
        assert_eq!(top[0].symbol, "BTC");
        assert!((top[0].pct_diff - 4.878).abs() < 1e-3);
        assert_eq!(h.health.cycles_completed(), 1);
        assert!(h.health.last_cycle_at_ns() > 0);
    }

    #[tokio::test]
    async fn failing_exchange_does_not_block_others() {
        let h = harness(
            &["a", "b", "c"],
            vec![
                stub("a", prices(&[("BTC", 100.0)])),
                stub("b", Behaviour::Fail),
                stub("c", prices(&[("BTC", 102.0)])),
            ],
        )
        .await;

        let report = h.orchestrator.refresh_once().await.unwrap();

        assert_eq!(report.failures(), 1);
        let failed = report.outcomes.iter().find(|o| o.exchange == "b").unwrap();
        assert_eq!(failed.status, FetchStatus::Failed);
        let top = h.engine.top_differences(10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!((top[0].exchange_a.as_str(), top[0].exchange_b.as_str()), ("a", "c"));
        assert_eq!(h.health.fetch_failures(), 1);
    }

    #[tokio::test]
    async fn slow_exchange_times_out() {
        let h = harness(
            &["a", "b", "slow"],
            vec![
                stub("a", prices(&[("ETH", 10.0)])),
                stub("b", prices(&[("ETH", 11.0)])),
                stub("slow", Behaviour::Hang),
            ],
        )
        .await;

        let report = h.orchestrator.refresh_once().await.unwrap();

        let slow = report.outcomes.iter().find(|o| o.exchange == "slow").unwrap();
        assert_eq!(slow.status, FetchStatus::TimedOut);
        assert!(report.elapsed < Duration::from_secs(10));
        assert_eq!(report.comparisons, 1);
    }

    #[tokio::test]
    async fn empty_fetch_keeps_previous_rows() {
        let h = harness(&["a"], vec![stub("a", prices(&[]))]).await;
        h.store
            .upsert("a", &[RawPair::new("BTC", 100.0)])
            .await
            .unwrap();

        let report = h.orchestrator.refresh_once().await.unwrap();

        assert_eq!(report.outcomes[0].status, FetchStatus::Empty);
        assert_eq!(h.store.latest(Some("a")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delisted_symbol_is_retired() {
        let h = harness(&["a"], vec![stub("a", prices(&[("BTC", 100.0)]))]).await;
        h.store
            .upsert("a", &[RawPair::new("BTC", 99.0), RawPair::new("OLD", 1.0)])
            .await
            .unwrap();

        let report = h.orchestrator.refresh_once().await.unwrap();

        assert_eq!(report.outcomes[0].retired, 1);
        let symbols: Vec<String> = h
            .store
            .latest(Some("a"))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.symbol)
            .collect();
        assert_eq!(symbols, vec!["BTC"]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness(&["a"], vec![stub("a", prices(&[("BTC", 1.0)]))]).await;
        let store = h.store.clone();
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(h.orchestrator.run(rx));
        // First tick fires immediately
        for _ in 0..50 {
            if store.count().await.unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.count().await.unwrap(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }
}
