use axum::http::StatusCode;
use papertrade::api::{self, AppState};
use papertrade::config::Config;
use papertrade::db::init_db;
use papertrade::domain::{Decimal, UserId};
use papertrade::engine::{
    monitor::event_channel, AllowAll, PositionLedger, RankingService, SettlementEngine,
    TriggerMonitor,
};
use papertrade::oracle::MockOracle;
use papertrade::{PositionStatus, Repository};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    state: AppState,
    oracle: Arc<MockOracle>,
    _temp: TempDir,
}

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn test_config() -> Config {
    Config {
        port: 0,
        database_path: ":memory:".to_string(),
        oracle_api_url: "http://example.invalid".to_string(),
        display_currency: "USDT".to_string(),
        seed_balance: d("10000"),
        monitor_interval_ms: 10,
        oracle_timeout_ms: 1000,
    }
}

async fn setup_test_app(oracle: MockOracle) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let repo = Arc::new(Repository::new(pool));
    let oracle = Arc::new(oracle);
    let config = test_config();
    let (events, _event_rx) = event_channel();

    let ledger = Arc::new(PositionLedger::new(
        repo.clone(),
        oracle.clone(),
        Arc::new(AllowAll),
        events.clone(),
        config.seed_balance,
    ));
    let settlement = Arc::new(SettlementEngine::new(
        repo.clone(),
        oracle.clone(),
        config.display_currency.clone(),
        config.seed_balance,
        events,
    ));
    let monitor = Arc::new(TriggerMonitor::new(
        repo.clone(),
        oracle.clone(),
        settlement.clone(),
        Duration::from_millis(config.monitor_interval_ms),
    ));
    let ranking = Arc::new(RankingService::new(
        repo.clone(),
        oracle.clone(),
        config.display_currency.clone(),
        config.seed_balance,
    ));

    let state = AppState::new(repo, config, ledger, settlement, monitor, ranking);
    let app = api::create_router(state.clone());

    TestApp {
        app,
        state,
        oracle,
        _temp: temp_dir,
    }
}

async fn open_position(
    test_app: &TestApp,
    user: &str,
    side: &str,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
) -> String {
    let mut body = serde_json::json!({
        "user": user,
        "symbol": "BTC/USDT",
        "market": "futures",
        "side": side,
        "quantity": 2,
        "leverage": 10,
    });
    if let Some(sl) = stop_loss {
        body["stopLoss"] = serde_json::json!(sl);
    }
    if let Some(tp) = take_profit {
        body["takeProfit"] = serde_json::json!(tp);
    }

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/positions/open")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let res = test_app.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    json["position"]["id"].as_str().unwrap().to_string()
}

async fn position_status(test_app: &TestApp, id: &str) -> PositionStatus {
    let id = uuid::Uuid::parse_str(id).unwrap();
    test_app
        .state
        .repo
        .get_position(id)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn test_stop_loss_fires_on_tick() {
    let test_app = setup_test_app(MockOracle::new().with_price("BTC/USDT", "100")).await;
    let id = open_position(&test_app, "alice", "long", Some(95.0), None).await;

    test_app.state.monitor.bootstrap().await.unwrap();
    test_app.state.monitor.tick().await;
    assert_eq!(position_status(&test_app, &id).await, PositionStatus::Open);

    test_app.oracle.set_price("BTC/USDT", "94");
    test_app.state.monitor.tick().await;
    assert_eq!(position_status(&test_app, &id).await, PositionStatus::Closed);
}

#[tokio::test]
async fn test_take_profit_fires_for_short() {
    let test_app = setup_test_app(MockOracle::new().with_price("BTC/USDT", "100")).await;
    // Short takes profit when the price falls to the level.
    let id = open_position(&test_app, "alice", "short", None, Some(80.0)).await;

    test_app.state.monitor.bootstrap().await.unwrap();
    test_app.oracle.set_price("BTC/USDT", "79");
    test_app.state.monitor.tick().await;

    assert_eq!(position_status(&test_app, &id).await, PositionStatus::Closed);
}

#[tokio::test]
async fn test_liquidation_wins_over_stop_loss() {
    let test_app = setup_test_app(MockOracle::new().with_price("BTC/USDT", "100")).await;
    // 10x long: liquidation at 90; stop at 95.
    let id = open_position(&test_app, "alice", "long", Some(95.0), None).await;

    test_app.state.monitor.bootstrap().await.unwrap();
    test_app.oracle.set_price("BTC/USDT", "85");
    test_app.state.monitor.tick().await;

    assert_eq!(
        position_status(&test_app, &id).await,
        PositionStatus::Liquidated
    );

    // Liquidation settled at the liquidation price: pnl exactly -margin.
    let stored = test_app
        .state
        .repo
        .get_position(uuid::Uuid::parse_str(&id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.exit_price, Some(d("90")));
    assert_eq!(stored.pnl, Some(d("-20")));
}

#[tokio::test]
async fn test_sweep_endpoint_closes_breached_positions() {
    let test_app = setup_test_app(MockOracle::new().with_price("BTC/USDT", "100")).await;
    let id = open_position(&test_app, "alice", "long", Some(95.0), None).await;
    // Not bootstrapped: the live index never saw this position.

    test_app.oracle.set_price("BTC/USDT", "94");
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/monitor/sweep")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = test_app.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["closed"], serde_json::json!(1));

    assert_eq!(position_status(&test_app, &id).await, PositionStatus::Closed);
}

#[tokio::test]
async fn test_price_outage_leaves_positions_watched() {
    let test_app = setup_test_app(MockOracle::new().with_price("BTC/USDT", "94")).await;
    // Opened below the stop already; the first tick with prices available
    // must close it even after an outage tick in between.
    let id = open_position(&test_app, "alice", "long", None, Some(200.0)).await;
    test_app.state.monitor.bootstrap().await.unwrap();

    test_app
        .oracle
        .fail_with(papertrade::oracle::OracleError::Timeout);
    test_app.state.monitor.tick().await;
    assert_eq!(position_status(&test_app, &id).await, PositionStatus::Open);

    test_app.oracle.clear_failure();
    test_app.oracle.set_price("BTC/USDT", "201");
    test_app.state.monitor.tick().await;
    assert_eq!(position_status(&test_app, &id).await, PositionStatus::Closed);

    let balance = test_app
        .state
        .repo
        .get_balance(&UserId::new("alice".to_string()))
        .await
        .unwrap()
        .unwrap();
    // 10000 - 18.8 margin + 18.8 + (201-94)*2 = 10214
    assert_eq!(balance, d("10214"));
}
