//! Trading engine: position ledger, settlement, trigger monitoring, ranking.
//!
//! This module provides:
//! - `PositionLedger` - open positions and read views
//! - `SettlementEngine` - atomic close with PnL, FX, and bankruptcy handling
//! - `TriggerMonitor` - background SL/TP/liquidation watcher
//! - `RankingService` - leaderboard computation
//! - `EntitlementCheck` - trading permission seam

pub mod ledger;
pub mod monitor;
pub mod ranking;
pub mod settlement;

use crate::domain::UserId;
use async_trait::async_trait;
use std::fmt;

pub use ledger::{AggregatedPosition, OpenPositionRequest, PositionLedger};
pub use monitor::{MonitorHandle, PositionEvent, TriggerMonitor};
pub use ranking::{Leaderboard, LeaderboardEntry, Period, RankingService, SortKey};
pub use settlement::{CloseOutcome, CloseReason, SettlementEngine};

/// Gate on whether a user may trade at all. Billing and plan logic live
/// outside this crate; the production default allows everyone.
#[async_trait]
pub trait EntitlementCheck: Send + Sync + fmt::Debug {
    async fn may_trade(&self, user: &UserId) -> bool;
}

/// Production default: everyone may trade.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl EntitlementCheck for AllowAll {
    async fn may_trade(&self, _user: &UserId) -> bool {
        true
    }
}

/// Test double that denies a fixed set of users.
#[derive(Debug, Default)]
pub struct DenyList {
    denied: Vec<String>,
}

impl DenyList {
    pub fn denying(users: &[&str]) -> Self {
        DenyList {
            denied: users.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[async_trait]
impl EntitlementCheck for DenyList {
    async fn may_trade(&self, user: &UserId) -> bool {
        !self.denied.iter().any(|u| u == user.as_str())
    }
}
