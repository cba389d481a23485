use axum::extract::State;
use axum::Json;

use crate::api::AppState;
use crate::error::AppError;

/// Liveness: the process is up.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Readiness: the database answers a query. Also reports how many open
/// positions the trigger monitor is watching.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.repo.ping().await?;
    let watched = state.monitor.watched_count().await;
    Ok(Json(serde_json::json!({
        "status": "ready",
        "watchedPositions": watched,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
