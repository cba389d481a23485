use chrono::Utc;
use papertrade::db::init_db;
use papertrade::domain::{
    liquidation_price, required_margin, Decimal, Market, Position, PositionStatus, Side, Symbol,
    UserId,
};
use papertrade::engine::{monitor::event_channel, CloseReason, SettlementEngine};
use papertrade::oracle::MockOracle;
use papertrade::{AppError, Repository};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

async fn setup(oracle: MockOracle) -> (Arc<SettlementEngine>, Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let (events, _event_rx) = event_channel();
    let engine = Arc::new(SettlementEngine::new(
        repo.clone(),
        Arc::new(oracle),
        "USDT".to_string(),
        d("10000"),
        events,
    ));
    (engine, repo, temp_dir)
}

async fn insert_open(
    repo: &Repository,
    user: &str,
    side: Side,
    entry: &str,
    qty: &str,
    leverage: i64,
) -> Position {
    let entry = d(entry);
    let qty = d(qty);
    let margin = required_margin(qty, entry, leverage);
    let position = Position {
        id: Uuid::new_v4(),
        user: UserId::new(user.to_string()),
        symbol: Symbol::new("BTC/USDT".to_string()),
        market: Market::Futures,
        side,
        quantity: qty,
        entry_price: entry,
        leverage,
        margin,
        liquidation_price: Some(liquidation_price(entry, leverage, side)),
        stop_loss: None,
        take_profit: None,
        status: PositionStatus::Open,
        pnl: None,
        exit_price: None,
        opened_at: Utc::now(),
        closed_at: None,
    };
    repo.open_position(&position, margin, margin, d("10000"), Utc::now().date_naive())
        .await
        .unwrap();
    position
}

#[tokio::test]
async fn test_concurrent_closes_settle_exactly_once() {
    let oracle = MockOracle::new().with_price("BTC/USDT", "110");
    let (engine, repo, _temp) = setup(oracle).await;
    let p = insert_open(&repo, "alice", Side::Long, "100", "2", 10).await;
    let user = p.user.clone();

    let ids = [p.id];
    let (r1, r2) = tokio::join!(
        engine.close_for_user(&user, &ids, CloseReason::Manual),
        engine.close_for_user(&user, &ids, CloseReason::Manual),
    );

    let outcomes = [r1, r2];
    let ok_count = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1, "exactly one close must win");
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::AlreadyClosed(_)))));

    // The balance moved exactly once: 10000 - 20 + 20 + 20.
    assert_eq!(repo.get_balance(&user).await.unwrap(), Some(d("10020")));

    let stored = repo.get_position(p.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PositionStatus::Closed);
    assert_eq!(stored.pnl, Some(d("20")));
}

#[tokio::test]
async fn test_short_loss_balance_algebra() {
    // Short 1 @ 100 with 1x, exit 106: pnl -6, balance 10000 - 6.
    let oracle = MockOracle::new().with_price("BTC/USDT", "106");
    let (engine, repo, _temp) = setup(oracle).await;
    let p = insert_open(&repo, "alice", Side::Short, "100", "1", 1).await;
    let user = p.user.clone();

    let outcome = engine
        .close_for_user(&user, &[p.id], CloseReason::Manual)
        .await
        .unwrap();
    assert_eq!(outcome.total_pnl, d("-6"));
    assert_eq!(outcome.new_balance, d("9994"));
}

#[tokio::test]
async fn test_multi_id_close_settles_in_one_batch() {
    let oracle = MockOracle::new().with_price("BTC/USDT", "110");
    let (engine, repo, _temp) = setup(oracle).await;
    let p1 = insert_open(&repo, "alice", Side::Long, "100", "1", 10).await;
    let p2 = insert_open(&repo, "alice", Side::Long, "100", "3", 10).await;
    let user = p1.user.clone();

    let outcome = engine
        .close_for_user(&user, &[p1.id, p2.id], CloseReason::Manual)
        .await
        .unwrap();

    assert_eq!(outcome.closed_count, 2);
    // pnl 10 + 30, margin 10 + 30 returned.
    assert_eq!(outcome.total_pnl, d("40"));
    assert_eq!(outcome.new_balance, d("10040"));
}

#[tokio::test]
async fn test_daily_performance_tracks_settlements() {
    let oracle = MockOracle::new().with_price("BTC/USDT", "110");
    let (engine, repo, _temp) = setup(oracle).await;
    let user = UserId::new("alice".to_string());
    let today = Utc::now().date_naive();

    // Three closes: +10, +30 (both at 110), then -40 at 80.
    let p1 = insert_open(&repo, "alice", Side::Long, "100", "1", 10).await;
    let p2 = insert_open(&repo, "alice", Side::Long, "100", "3", 10).await;
    engine
        .close_for_user(&user, &[p1.id, p2.id], CloseReason::Manual)
        .await
        .unwrap();

    let p3 = insert_open(&repo, "alice", Side::Long, "100", "2", 10).await;
    let oracle2 = MockOracle::new().with_price("BTC/USDT", "80");
    let (events, _rx) = event_channel();
    let engine2 = SettlementEngine::new(
        repo.clone(),
        Arc::new(oracle2),
        "USDT".to_string(),
        d("10000"),
        events,
    );
    engine2
        .close_for_user(&user, &[p3.id], CloseReason::Manual)
        .await
        .unwrap();

    let perf = repo
        .get_daily_performance(&user, today)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(perf.total_trades, 3);
    assert_eq!(perf.winning_trades, 2);
    assert_eq!(perf.total_pnl, d("0"));
    assert_eq!(
        perf.ending_balance,
        perf.starting_balance + perf.total_pnl
    );
}

#[tokio::test]
async fn test_settled_rows_count_as_individual_trades() {
    let oracle = MockOracle::new().with_price("BTC/USDT", "110");
    let (engine, repo, _temp) = setup(oracle).await;
    let p1 = insert_open(&repo, "alice", Side::Long, "100", "1", 10).await;
    let p2 = insert_open(&repo, "alice", Side::Long, "100", "1", 10).await;
    let user = p1.user.clone();

    engine
        .close_for_user(&user, &[p1.id, p2.id], CloseReason::Manual)
        .await
        .unwrap();

    let settled = repo.list_settled_positions(&user).await.unwrap();
    assert_eq!(settled.len(), 2);
    assert!(settled.iter().all(|p| p.status == PositionStatus::Closed));
}
