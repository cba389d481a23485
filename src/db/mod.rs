//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer: the single transactional boundary for positions,
//!   balances, and daily performance

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{Account, Repository, SettlementEntry, SettlementReport};
