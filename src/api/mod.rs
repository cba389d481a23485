pub mod health;
pub mod leaderboard;
pub mod positions;

use crate::config::Config;
use crate::db::Repository;
use crate::engine::{PositionLedger, RankingService, SettlementEngine, TriggerMonitor};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub ledger: Arc<PositionLedger>,
    pub settlement: Arc<SettlementEngine>,
    pub monitor: Arc<TriggerMonitor>,
    pub ranking: Arc<RankingService>,
}

impl AppState {
    pub fn new(
        repo: Arc<Repository>,
        config: Config,
        ledger: Arc<PositionLedger>,
        settlement: Arc<SettlementEngine>,
        monitor: Arc<TriggerMonitor>,
        ranking: Arc<RankingService>,
    ) -> Self {
        Self {
            repo,
            config,
            ledger,
            settlement,
            monitor,
            ranking,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/positions/open", post(positions::open_position))
        .route("/v1/positions/close", post(positions::close_positions))
        .route("/v1/positions", get(positions::get_open_positions))
        .route("/v1/positions/history", get(positions::get_closed_positions))
        .route("/v1/monitor/sweep", post(positions::sweep))
        .route("/v1/leaderboard", get(leaderboard::get_leaderboard))
        .layer(cors)
        .with_state(state)
}
