//! Domain types for the paper-trading engine.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Domain primitives: UserId, Symbol, Side, Market
//! - The Position entity with its margin/liquidation/PnL formulas
//! - The DailyPerformance aggregation record

pub mod decimal;
pub mod performance;
pub mod position;
pub mod primitives;

pub use decimal::Decimal;
pub use performance::{first_of_next_month, DailyPerformance};
pub use position::{
    liquidation_price, realized_pnl, required_margin, Position, PositionStatus, MAX_LEVERAGE,
};
pub use primitives::{Market, Side, Symbol, UserId};
