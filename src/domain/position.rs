//! Position entity and the margin / liquidation / PnL formulas.

use crate::domain::{Decimal, Market, Side, Symbol, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum leverage accepted on futures positions.
pub const MAX_LEVERAGE: i64 = 125;

/// Lifecycle status of a position.
///
/// Transitions are monotonic: `Open -> Closing -> Closed | Liquidated`.
/// `Closing` is the persisted at-most-once claim taken before settlement;
/// a settlement failure releases it back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
    Liquidated,
}

impl PositionStatus {
    /// Database/text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closing => "closing",
            PositionStatus::Closed => "closed",
            PositionStatus::Liquidated => "liquidated",
        }
    }

    /// Parse from the database/text representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PositionStatus::Open),
            "closing" => Some(PositionStatus::Closing),
            "closed" => Some(PositionStatus::Closed),
            "liquidated" => Some(PositionStatus::Liquidated),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionStatus::Closed | PositionStatus::Liquidated)
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single simulated holding, one row per discrete opening event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: Uuid,
    pub user: UserId,
    pub symbol: Symbol,
    pub market: Market,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    /// Always 1 for spot.
    pub leverage: i64,
    /// Reserved capital: quantity * entry_price / leverage. Debited from the
    /// balance at open for futures only.
    pub margin: Decimal,
    /// Futures only; None for spot.
    pub liquidation_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: PositionStatus,
    pub pnl: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Margin required to open: notional / leverage.
pub fn required_margin(quantity: Decimal, entry_price: Decimal, leverage: i64) -> Decimal {
    quantity * entry_price / Decimal::from_i64(leverage)
}

/// Liquidation price for a leveraged position: entry -/+ entry/leverage,
/// floored at zero. Long liquidates below entry, short above.
pub fn liquidation_price(entry_price: Decimal, leverage: i64, side: Side) -> Decimal {
    let step = entry_price / Decimal::from_i64(leverage);
    let raw = match side {
        Side::Long => entry_price - step,
        Side::Short => entry_price + step,
    };
    raw.clamp_non_negative()
}

/// Realized PnL at an exit price: long (exit - entry) * qty, short mirrored.
pub fn realized_pnl(side: Side, entry_price: Decimal, exit_price: Decimal, quantity: Decimal) -> Decimal {
    match side {
        Side::Long => (exit_price - entry_price) * quantity,
        Side::Short => (entry_price - exit_price) * quantity,
    }
}
