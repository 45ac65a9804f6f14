use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::parse_exchange_list;
use crate::detector::DifferenceEngine;
use crate::error::AppError;
use crate::prefs::user_store::validate_interval;
use crate::prefs::UserPreferenceStore;
use crate::push::PushScheduler;
use crate::state::SnapshotStore;
use crate::types::{ExchangeStat, PriceComparison, PriceSnapshot, UserPreference};

/// Upper bound on any `limit` query parameter.
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct ApiState {
    pub snapshots: SnapshotStore,
    pub engine: DifferenceEngine,
    pub prefs: UserPreferenceStore,
    pub push: Arc<PushScheduler>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub default_limit: i64,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/snapshots", get(get_snapshots))
        .route("/comparisons/top", get(get_top_comparisons))
        .route("/exchanges", get(get_known_exchanges))
        .route("/stats/exchanges", get(get_exchange_stats))
        .route("/stats/latency", get(get_stats_latency))
        .route(
            "/users/:id/preferences",
            get(get_preferences).put(put_preferences),
        )
        .route("/users/:id/exchanges/:exchange/toggle", post(toggle_exchange))
        .route("/users/:id/top", get(get_user_top))
        .route("/users/:id/push", post(push_now))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct SnapshotsQuery {
    pub exchange: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct TopQuery {
    pub limit: Option<i64>,
    /// Comma-separated exchange names.
    pub exchanges: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct PreferencesUpdate {
    pub exchanges: Option<Vec<String>>,
    pub interval_minutes: Option<u32>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_cycle_at_ns: u64,
    pub cycles_completed: u64,
    pub fetch_failures: u64,
    pub snapshot_rows: i64,
    pub comparison_rows: i64,
}

#[derive(Serialize)]
pub struct PushResponse {
    pub sent: bool,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        last_cycle_at_ns: state.health.last_cycle_at_ns(),
        cycles_completed: state.health.cycles_completed(),
        fetch_failures: state.health.fetch_failures(),
        snapshot_rows: state.snapshots.count().await?,
        comparison_rows: state.engine.count().await?,
    }))
}

async fn get_snapshots(
    State(state): State<ApiState>,
    Query(params): Query<SnapshotsQuery>,
) -> Result<Json<Vec<PriceSnapshot>>, AppError> {
    let exchange = params
        .exchange
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    Ok(Json(state.snapshots.latest(exchange.as_deref()).await?))
}

async fn get_top_comparisons(
    State(state): State<ApiState>,
    Query(params): Query<TopQuery>,
) -> Result<Json<Vec<PriceComparison>>, AppError> {
    let limit = resolve_limit(params.limit, state.default_limit);
    let rows = match params.exchanges.as_deref() {
        Some(raw) => {
            let selection = parse_exchange_list(raw);
            state.engine.top_differences_filtered(&selection, limit).await?
        }
        None => state.engine.top_differences(limit).await?,
    };
    Ok(Json(rows))
}

async fn get_known_exchanges(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.prefs.known_exchanges())
}

async fn get_exchange_stats(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ExchangeStat>>, AppError> {
    Ok(Json(state.snapshots.exchange_stats().await?))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50, p95, p99) = state.latency.percentiles();
    let to_ms = |us: Option<u64>| us.map(|v| v as f64 / 1_000.0);
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: to_ms(p50),
        p95_ms: to_ms(p95),
        p99_ms: to_ms(p99),
    })
}

async fn get_preferences(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserPreference>, AppError> {
    Ok(Json(state.prefs.get(user_id).await?))
}

async fn put_preferences(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
    Json(body): Json<PreferencesUpdate>,
) -> Result<Json<UserPreference>, AppError> {
    // Reject a bad interval before the selection is written
    if let Some(minutes) = body.interval_minutes {
        validate_interval(minutes)?;
    }

    if let Some(exchanges) = &body.exchanges {
        state.prefs.set_selection(user_id, exchanges).await?;
    }
    if let Some(minutes) = body.interval_minutes {
        state.prefs.set_interval(user_id, minutes).await?;
    }
    state.push.schedule(user_id).await?;

    Ok(Json(state.prefs.get(user_id).await?))
}

async fn toggle_exchange(
    State(state): State<ApiState>,
    Path((user_id, exchange)): Path<(i64, String)>,
) -> Result<Json<UserPreference>, AppError> {
    state.prefs.toggle_exchange(user_id, &exchange).await?;
    state.push.schedule(user_id).await?;
    Ok(Json(state.prefs.get(user_id).await?))
}

async fn get_user_top(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<PriceComparison>>, AppError> {
    let selection = state.prefs.get_selection(user_id).await?;
    let limit = resolve_limit(params.limit, state.default_limit);
    Ok(Json(
        state.engine.top_differences_filtered(&selection, limit).await?,
    ))
}

/// Send the user's top spreads immediately, outside their timer.
async fn push_now(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> Result<Json<PushResponse>, AppError> {
    let sent = state.push.push_now(user_id).await?;
    Ok(Json(PushResponse { sent }))
}

fn resolve_limit(requested: Option<i64>, default: i64) -> i64 {
    requested.unwrap_or(default).min(MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::memory_pool;
    use crate::push::LogNotifier;
    use crate::types::RawPair;

    async fn state() -> ApiState {
        let pool = memory_pool().await;
        let snapshots = SnapshotStore::new(pool.clone());
        snapshots
            .upsert("aster", &[RawPair::new("BTC", 100.0), RawPair::new("ETH", 10.0)])
            .await
            .unwrap();
        snapshots
            .upsert("lighter", &[RawPair::new("BTC", 102.0), RawPair::new("ETH", 10.5)])
            .await
            .unwrap();
        snapshots
            .upsert("pacifica", &[RawPair::new("BTC", 100.5)])
            .await
            .unwrap();
        let engine = DifferenceEngine::new(pool.clone());
        engine.recompute().await.unwrap();

        let known: Vec<String> = ["aster", "lighter", "pacifica"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let prefs = UserPreferenceStore::new(pool, &known);
        let push = Arc::new(PushScheduler::new(
            prefs.clone(),
            engine.clone(),
            Arc::new(LogNotifier),
            10,
        ));
        ApiState {
            snapshots,
            engine,
            prefs,
            push,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new().unwrap()),
            default_limit: 10,
        }
    }

    #[tokio::test]
    async fn top_comparisons_filter_by_exchange_list() {
        let st = state().await;

        let Json(all) = get_top_comparisons(State(st.clone()), Query(TopQuery::default()))
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].symbol, "ETH");

        let Json(filtered) = get_top_comparisons(
            State(st),
            Query(TopQuery {
                limit: Some(5),
                exchanges: Some("Aster, pacifica".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].exchange_b, "pacifica");
    }

    #[tokio::test]
    async fn preference_update_reschedules_push() {
        let st = state().await;

        let Json(pref) = put_preferences(
            State(st.clone()),
            Path(42),
            Json(PreferencesUpdate {
                exchanges: Some(vec!["lighter".to_string(), "aster".to_string()]),
                interval_minutes: Some(15),
            }),
        )
        .await
        .unwrap();

        assert_eq!(pref.exchanges, vec!["aster", "lighter"]);
        assert_eq!(pref.interval_minutes, 15);
        assert!(st.push.is_scheduled(42));

        let Json(top) = get_user_top(State(st.clone()), Path(42), Query(LimitQuery::default()))
            .await
            .unwrap();
        assert_eq!(top.len(), 2);
        st.push.shutdown();
    }

    #[tokio::test]
    async fn bad_interval_leaves_selection_untouched() {
        let st = state().await;

        let res = put_preferences(
            State(st.clone()),
            Path(7),
            Json(PreferencesUpdate {
                exchanges: Some(vec!["aster".to_string(), "lighter".to_string()]),
                interval_minutes: Some(0),
            }),
        )
        .await;

        assert!(matches!(res, Err(AppError::InvalidInput(_))));
        assert!(st.prefs.get_selection(7).await.unwrap().is_empty());
        assert!(!st.push.is_scheduled(7));
    }

    #[tokio::test]
    async fn push_now_requires_two_exchanges() {
        let st = state().await;
        let Json(res) = push_now(State(st.clone()), Path(5)).await.unwrap();
        assert!(!res.sent);

        st.prefs
            .set_selection(5, &["aster".to_string(), "lighter".to_string()])
            .await
            .unwrap();
        let Json(res) = push_now(State(st), Path(5)).await.unwrap();
        assert!(res.sent);
    }

    #[tokio::test]
    async fn toggle_route_flips_exchange() {
        let st = state().await;
        let Json(pref) = toggle_exchange(State(st.clone()), Path((3, "pacifica".to_string())))
            .await
            .unwrap();
        assert_eq!(pref.exchanges, vec!["pacifica"]);
        st.push.shutdown();
    }
}
