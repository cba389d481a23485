use papertrade::engine::{
    monitor::event_channel, AllowAll, PositionLedger, RankingService, SettlementEngine,
    TriggerMonitor,
};
use papertrade::oracle::HttpPriceOracle;
use papertrade::{api, config::Config, db::init_db, PriceOracle, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let oracle: Arc<dyn PriceOracle> = Arc::new(HttpPriceOracle::new(
        config.oracle_api_url.clone(),
        config.oracle_timeout_ms,
    ));

    let (events, event_rx) = event_channel();
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
        oracle,
        config.display_currency.clone(),
        config.seed_balance,
    ));

    // Pick up any open positions from a previous run, then start the loop
    if let Err(e) = monitor.bootstrap().await {
        eprintln!("Failed to bootstrap trigger monitor: {}", e);
        std::process::exit(1);
    }
    tokio::spawn(monitor.clone().run(event_rx));

    // Create router
    let app = api::create_router(api::AppState::new(
        repo, config, ledger, settlement, monitor, ranking,
    ));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
