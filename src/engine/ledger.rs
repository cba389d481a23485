//! Position ledger: validated opens and read views over open/settled rows.

use crate::db::Repository;
use crate::domain::{
    liquidation_price, required_margin, Decimal, Market, Position, PositionStatus, Side, Symbol,
    UserId, MAX_LEVERAGE,
};
use crate::engine::monitor::PositionEvent;
use crate::engine::EntitlementCheck;
use crate::error::AppError;
use crate::oracle::PriceOracle;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Request to open a position. Entry price is not part of the request; the
/// position opens at the current oracle price.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionRequest {
    pub symbol: Symbol,
    pub market: Market,
    pub side: Side,
    pub quantity: Decimal,
    /// Defaults to 1; must be 1 for spot.
    pub leverage: Option<i64>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

/// One open-position view row: all open rows for a (symbol, market, side)
/// merged into a single exposure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPosition {
    pub symbol: Symbol,
    pub market: Market,
    pub side: Side,
    pub total_quantity: Decimal,
    /// Volume-weighted average entry price.
    pub average_entry_price: Decimal,
    pub total_margin: Decimal,
    /// Most recently set leverage across the merged rows.
    pub leverage: i64,
    /// Recomputed from the average entry and the effective leverage.
    pub liquidation_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub position_ids: Vec<Uuid>,
}

/// Validated opens and read views. All writes go through the repository's
/// transactional methods.
pub struct PositionLedger {
    repo: Arc<Repository>,
    oracle: Arc<dyn PriceOracle>,
    entitlements: Arc<dyn EntitlementCheck>,
    events: mpsc::UnboundedSender<PositionEvent>,
    seed_balance: Decimal,
}

impl PositionLedger {
    pub fn new(
        repo: Arc<Repository>,
        oracle: Arc<dyn PriceOracle>,
        entitlements: Arc<dyn EntitlementCheck>,
        events: mpsc::UnboundedSender<PositionEvent>,
        seed_balance: Decimal,
    ) -> Self {
        PositionLedger {
            repo,
            oracle,
            entitlements,
            events,
            seed_balance,
        }
    }

    /// Open a position at the current oracle price.
    ///
    /// Futures debits the margin atomically with the insert; spot reserves
    /// nothing and only checks that the balance covers the notional. Returns
    /// the position and the balance after the open.
    pub async fn open(
        &self,
        user: &UserId,
        request: OpenPositionRequest,
    ) -> Result<(Position, Decimal), AppError> {
        if !self.entitlements.may_trade(user).await {
            return Err(AppError::NotEntitled);
        }

        let leverage = request.leverage.unwrap_or(1);
        validate_open(&request, leverage)?;

        let entry_price = match request.market {
            Market::Spot => self.oracle.spot_price(&request.symbol).await?,
            Market::Futures => self.oracle.futures_price(&request.symbol).await?,
        };

        let margin = required_margin(request.quantity, entry_price, leverage);
        let liq = match request.market {
            Market::Futures => Some(liquidation_price(entry_price, leverage, request.side)),
            Market::Spot => None,
        };
        let debit = match request.market {
            Market::Futures => margin,
            Market::Spot => Decimal::zero(),
        };

        let position = Position {
            id: Uuid::new_v4(),
            user: user.clone(),
            symbol: request.symbol,
            market: request.market,
            side: request.side,
            quantity: request.quantity,
            entry_price,
            leverage,
            margin,
            liquidation_price: liq,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            status: PositionStatus::Open,
            pnl: None,
            exit_price: None,
            opened_at: Utc::now(),
            closed_at: None,
        };

        let balance = self
            .repo
            .open_position(
                &position,
                margin,
                debit,
                self.seed_balance,
                Utc::now().date_naive(),
            )
            .await?;

        info!(
            user = %position.user,
            position = %position.id,
            symbol = %position.symbol,
            market = %position.market,
            side = %position.side,
            entry = %position.entry_price.to_canonical_string(),
            "Opened position"
        );

        // Receiver gone means the monitor is down; the sweep covers catch-up.
        let _ = self.events.send(PositionEvent::Opened(position.clone()));

        Ok((position, balance))
    }

    /// Open rows for a user merged by (symbol, market, side).
    pub async fn list_open_aggregated(
        &self,
        user: &UserId,
    ) -> Result<Vec<AggregatedPosition>, AppError> {
        let positions = self.repo.list_open_positions(user).await?;
        Ok(aggregate_open(positions))
    }

    /// Settled rows for a user, most recent first.
    pub async fn list_closed(&self, user: &UserId) -> Result<Vec<Position>, AppError> {
        self.repo.list_settled_positions(user).await
    }

    /// Open position ids for a whole-symbol close.
    pub async fn open_ids_for_symbol(
        &self,
        user: &UserId,
        symbol: &Symbol,
    ) -> Result<Vec<Uuid>, AppError> {
        self.repo.list_open_ids_for_symbol(user, symbol).await
    }
}

fn validate_open(request: &OpenPositionRequest, leverage: i64) -> Result<(), AppError> {
    if !request.quantity.is_positive() {
        return Err(AppError::Validation(
            "Quantity must be positive".to_string(),
        ));
    }
    match request.market {
        Market::Spot => {
            if leverage != 1 {
                return Err(AppError::Validation(
                    "Spot positions cannot be leveraged".to_string(),
                ));
            }
        }
        Market::Futures => {
            if !(1..=MAX_LEVERAGE).contains(&leverage) {
                return Err(AppError::Validation(format!(
                    "Leverage must be between 1 and {}",
                    MAX_LEVERAGE
                )));
            }
        }
    }
    for (name, level) in [
        ("Stop loss", request.stop_loss),
        ("Take profit", request.take_profit),
    ] {
        if let Some(level) = level {
            if !level.is_positive() {
                return Err(AppError::Validation(format!("{} must be positive", name)));
            }
        }
    }
    Ok(())
}

/// Merge open rows by (symbol, market, side). Rows must arrive oldest first;
/// leverage and SL/TP are last-write-wins, the liquidation price is
/// recomputed from the volume-weighted entry.
fn aggregate_open(positions: Vec<Position>) -> Vec<AggregatedPosition> {
    let mut groups: HashMap<(Symbol, Market, Side), AggregatedPosition> = HashMap::new();
    let mut order: Vec<(Symbol, Market, Side)> = Vec::new();

    for p in positions {
        let key = (p.symbol.clone(), p.market, p.side);
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            AggregatedPosition {
                symbol: p.symbol.clone(),
                market: p.market,
                side: p.side,
                total_quantity: Decimal::zero(),
                average_entry_price: Decimal::zero(),
                total_margin: Decimal::zero(),
                leverage: p.leverage,
                liquidation_price: None,
                stop_loss: None,
                take_profit: None,
                position_ids: Vec::new(),
            }
        });

        // VWAP: fold the notional, divide at the end via incremental update.
        let prev_notional = entry.average_entry_price * entry.total_quantity;
        entry.total_quantity += p.quantity;
        entry.average_entry_price =
            (prev_notional + p.entry_price * p.quantity) / entry.total_quantity;
        entry.total_margin += p.margin;
        entry.leverage = p.leverage;
        if p.stop_loss.is_some() {
            entry.stop_loss = p.stop_loss;
        }
        if p.take_profit.is_some() {
            entry.take_profit = p.take_profit;
        }
        entry.position_ids.push(p.id);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let mut agg = groups.remove(&key)?;
            if agg.market == Market::Futures {
                agg.liquidation_price = Some(liquidation_price(
                    agg.average_entry_price,
                    agg.leverage,
                    agg.side,
                ));
            }
            Some(agg)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn open_row(entry: &str, qty: &str, leverage: i64, sl: Option<&str>) -> Position {
        let entry = d(entry);
        let qty = d(qty);
        Position {
            id: Uuid::new_v4(),
            user: UserId::new("u1".to_string()),
            symbol: Symbol::new("BTC/USDT".to_string()),
            market: Market::Futures,
            side: Side::Long,
            quantity: qty,
            entry_price: entry,
            leverage,
            margin: required_margin(qty, entry, leverage),
            liquidation_price: Some(liquidation_price(entry, leverage, Side::Long)),
            stop_loss: sl.map(d),
            take_profit: None,
            status: PositionStatus::Open,
            pnl: None,
            exit_price: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn test_aggregate_computes_vwap() {
        // 1 @ 100 and 3 @ 200 => vwap 175
        let rows = vec![open_row("100", "1", 10, None), open_row("200", "3", 10, None)];
        let aggs = aggregate_open(rows);
        assert_eq!(aggs.len(), 1);
        let agg = &aggs[0];
        assert_eq!(agg.total_quantity, d("4"));
        assert_eq!(agg.average_entry_price, d("175"));
        assert_eq!(agg.total_margin, d("70"));
        assert_eq!(agg.position_ids.len(), 2);
        // Liquidation recomputed from the vwap: 175 - 17.5 = 157.5
        assert_eq!(agg.liquidation_price, Some(d("157.5")));
    }

    #[test]
    fn test_aggregate_last_write_wins_for_levels() {
        let rows = vec![
            open_row("100", "1", 10, Some("95")),
            open_row("100", "1", 20, None),
            open_row("100", "1", 20, Some("90")),
        ];
        let aggs = aggregate_open(rows);
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].leverage, 20);
        assert_eq!(aggs[0].stop_loss, Some(d("90")));
    }

    #[test]
    fn test_aggregate_separates_sides() {
        let mut short = open_row("100", "1", 10, None);
        short.side = Side::Short;
        let rows = vec![open_row("100", "2", 10, None), short];
        let aggs = aggregate_open(rows);
        assert_eq!(aggs.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_leverage() {
        let request = OpenPositionRequest {
            symbol: Symbol::new("BTC/USDT".to_string()),
            market: Market::Futures,
            side: Side::Long,
            quantity: d("1"),
            leverage: Some(126),
            stop_loss: None,
            take_profit: None,
        };
        assert!(matches!(
            validate_open(&request, 126),
            Err(AppError::Validation(_))
        ));

        let spot = OpenPositionRequest {
            market: Market::Spot,
            leverage: Some(5),
            ..request
        };
        assert!(matches!(
            validate_open(&spot, 5),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_denied_user_cannot_open() {
        use crate::db::init_db;
        use crate::engine::DenyList;
        use crate::oracle::MockOracle;
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let (events, _event_rx) = mpsc::unbounded_channel();
        let ledger = PositionLedger::new(
            repo.clone(),
            Arc::new(MockOracle::new().with_price("BTC/USDT", "100")),
            Arc::new(DenyList::denying(&["mallory"])),
            events,
            d("10000"),
        );

        let request = OpenPositionRequest {
            symbol: Symbol::new("BTC/USDT".to_string()),
            market: Market::Futures,
            side: Side::Long,
            quantity: d("1"),
            leverage: Some(10),
            stop_loss: None,
            take_profit: None,
        };

        let mallory = UserId::new("mallory".to_string());
        let err = ledger.open(&mallory, request.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::NotEntitled));
        // Rejected before any account or row was touched.
        assert!(repo.get_account(&mallory).await.unwrap().is_none());

        let alice = UserId::new("alice".to_string());
        let (_, balance) = ledger.open(&alice, request).await.unwrap();
        assert_eq!(balance, d("9990"));
    }

    #[test]
    fn test_validate_rejects_non_positive_levels() {
        let request = OpenPositionRequest {
            symbol: Symbol::new("BTC/USDT".to_string()),
            market: Market::Futures,
            side: Side::Long,
            quantity: d("1"),
            leverage: Some(10),
            stop_loss: Some(d("0")),
            take_profit: None,
        };
        assert!(matches!(
            validate_open(&request, 10),
            Err(AppError::Validation(_))
        ));
    }
}
