pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod oracle;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Decimal, Market, Position, PositionStatus, Side, Symbol, UserId};
pub use engine::{
    PositionLedger, RankingService, SettlementEngine, TriggerMonitor,
};
pub use error::AppError;
pub use oracle::{HttpPriceOracle, MockOracle, OracleError, PriceOracle};
