//! Position lifecycle operations: open, claim, settle, and queries.

use crate::domain::{Decimal, Market, Position, PositionStatus, Side, Symbol, UserId};
use crate::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use super::{
    load_account_for_update, map_sqlx_err, parse_datetime_col, parse_decimal_col,
    store_balance_with_bankruptcy_check, Repository, SettlementEntry, SettlementReport,
};

impl Repository {
    // =========================================================================
    // Open
    // =========================================================================

    /// Insert an open position, debiting `debit` from the balance in the same
    /// transaction (zero for spot, margin for futures).
    ///
    /// Enforces the bankruptcy lockout and the balance check against the
    /// freshest committed row. `required` is the amount the balance must
    /// cover, which for spot exceeds the (zero) debit.
    ///
    /// Returns the balance after the debit.
    pub async fn open_position(
        &self,
        position: &Position,
        required: Decimal,
        debit: Decimal,
        seed: Decimal,
        today: NaiveDate,
    ) -> Result<Decimal, AppError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let account = load_account_for_update(&mut tx, &position.user, seed, today).await?;

        if let Some(expiry) = account.bankruptcy_expiry {
            if expiry > today {
                return Err(AppError::Bankrupt {
                    days_remaining: (expiry - today).num_days(),
                });
            }
        }

        if required > account.balance {
            return Err(AppError::InsufficientBalance {
                required: required.to_canonical_string(),
                available: account.balance.to_canonical_string(),
            });
        }

        let new_balance = account.balance - debit;
        sqlx::query("UPDATE accounts SET balance = ? WHERE user = ?")
            .bind(new_balance.to_canonical_string())
            .bind(position.user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO positions
            (id, user, symbol, market, side, quantity, entry_price, leverage, margin,
             liquidation_price, stop_loss, take_profit, status, pnl, exit_price,
             opened_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, NULL)
            "#,
        )
        .bind(position.id.to_string())
        .bind(position.user.as_str())
        .bind(position.symbol.as_str())
        .bind(position.market.as_str())
        .bind(position.side.as_str())
        .bind(position.quantity.to_canonical_string())
        .bind(position.entry_price.to_canonical_string())
        .bind(position.leverage)
        .bind(position.margin.to_canonical_string())
        .bind(
            position
                .liquidation_price
                .map(|p| p.to_canonical_string()),
        )
        .bind(position.stop_loss.map(|p| p.to_canonical_string()))
        .bind(position.take_profit.map(|p| p.to_canonical_string()))
        .bind(position.status.as_str())
        .bind(position.opened_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(new_balance)
    }

    // =========================================================================
    // Claim / release (at-most-once marker)
    // =========================================================================

    /// Atomically claim a batch of positions for settlement by flipping
    /// `open -> closing`. All-or-nothing: if any id is missing or not open,
    /// the whole claim rolls back.
    ///
    /// The conditional update is the server-side at-most-once guarantee: a
    /// concurrent claimer loses the race and sees `AlreadyClosed`.
    pub async fn claim_positions(&self, ids: &[Uuid]) -> Result<Vec<Position>, AppError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let mut claimed = Vec::with_capacity(ids.len());

        for id in ids {
            let result = sqlx::query(
                "UPDATE positions SET status = 'closing' WHERE id = ? AND status = 'open'",
            )
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            if result.rows_affected() == 0 {
                let exists: Option<(String,)> =
                    sqlx::query_as("SELECT status FROM positions WHERE id = ?")
                        .bind(id.to_string())
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(map_sqlx_err)?;

                return Err(match exists {
                    Some(_) => AppError::AlreadyClosed(id.to_string()),
                    None => AppError::NotFound(format!("Position {}", id)),
                });
            }

            let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
                .bind(id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

            let position = position_from_row(&row)
                .ok_or_else(|| AppError::Internal(format!("Corrupt position row {}", id)))?;
            claimed.push(position);
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(claimed)
    }

    /// Release claims after a failed settlement: `closing -> open`.
    pub async fn release_claims(&self, ids: &[Uuid]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        for id in ids {
            sqlx::query(
                "UPDATE positions SET status = 'open' WHERE id = ? AND status = 'closing'",
            )
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    // =========================================================================
    // Settle
    // =========================================================================

    /// Settle a batch of claimed positions for one user in a single
    /// transaction: terminal status flips, one balance credit, per-position
    /// performance upserts, and the bankruptcy evaluation.
    ///
    /// The per-position `balance_before` handed to the performance fold is the
    /// running balance including that position's margin credit but excluding
    /// its PnL, so the day's starting balance is seeded without a second read.
    pub async fn settle_claimed(
        &self,
        user: &UserId,
        entries: &[SettlementEntry],
        seed: Decimal,
        today: NaiveDate,
    ) -> Result<SettlementReport, AppError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let account = load_account_for_update(&mut tx, user, seed, today).await?;
        let closed_at = Utc::now().to_rfc3339();

        let mut running = account.balance;
        let mut total_pnl = Decimal::zero();

        for entry in entries {
            let status = if entry.liquidated {
                PositionStatus::Liquidated
            } else {
                PositionStatus::Closed
            };

            let result = sqlx::query(
                r#"
                UPDATE positions
                SET status = ?, pnl = ?, exit_price = ?, closed_at = ?
                WHERE id = ? AND status = 'closing'
                "#,
            )
            .bind(status.as_str())
            .bind(entry.pnl.to_canonical_string())
            .bind(entry.exit_price.to_canonical_string())
            .bind(&closed_at)
            .bind(entry.position_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            if result.rows_affected() == 0 {
                // Claim vanished underneath us; abort the whole batch.
                return Err(AppError::Conflict(format!(
                    "Lost settlement claim on position {}",
                    entry.position_id
                )));
            }

            running += entry.margin_credit;
            let balance_before = running;
            running += entry.pnl_display;
            total_pnl += entry.pnl_display;

            super::performance::upsert_in_tx(&mut tx, user, today, balance_before, entry.pnl_display)
                .await?;
        }

        let (new_balance, bankrupt) =
            store_balance_with_bankruptcy_check(&mut tx, user, running, today).await?;

        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(SettlementReport {
            closed_count: entries.len(),
            total_pnl,
            new_balance,
            bankrupt,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Fetch a single position by id.
    pub async fn get_position(&self, id: Uuid) -> Result<Option<Position>, AppError> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.as_ref().and_then(position_from_row))
    }

    /// Open positions for a user, oldest first (the aggregation view relies
    /// on this ordering for last-write-wins merges).
    pub async fn list_open_positions(&self, user: &UserId) -> Result<Vec<Position>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM positions
            WHERE user = ? AND status = 'open'
            ORDER BY opened_at ASC, id ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().filter_map(position_from_row).collect())
    }

    /// Open position ids for a user and symbol (whole-symbol close).
    pub async fn list_open_ids_for_symbol(
        &self,
        user: &UserId,
        symbol: &Symbol,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM positions
            WHERE user = ? AND symbol = ? AND status = 'open'
            ORDER BY opened_at ASC, id ASC
            "#,
        )
        .bind(user.as_str())
        .bind(symbol.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows
            .iter()
            .filter_map(|row| Uuid::parse_str(&row.get::<String, _>("id")).ok())
            .collect())
    }

    /// All open positions across users, for the catch-up sweep and monitor
    /// bootstrap.
    pub async fn list_all_open_positions(&self) -> Result<Vec<Position>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM positions
            WHERE status = 'open'
            ORDER BY symbol ASC, opened_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().filter_map(position_from_row).collect())
    }

    /// Settled (closed or liquidated) positions for a user, newest first.
    pub async fn list_settled_positions(&self, user: &UserId) -> Result<Vec<Position>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM positions
            WHERE user = ? AND status IN ('closed', 'liquidated')
            ORDER BY closed_at DESC, id ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().filter_map(position_from_row).collect())
    }

    /// Settled positions across all users with `closed_at` at or after the
    /// cutoff, optionally filtered by market. Ranking input.
    pub async fn list_settled_since(
        &self,
        since: Option<DateTime<Utc>>,
        market: Option<Market>,
    ) -> Result<Vec<Position>, AppError> {
        let cutoff = since.map(|t| t.to_rfc3339());
        let rows = match (&cutoff, market) {
            (Some(cutoff), Some(market)) => {
                sqlx::query(
                    r#"
                    SELECT * FROM positions
                    WHERE status IN ('closed', 'liquidated') AND closed_at >= ? AND market = ?
                    ORDER BY closed_at ASC, id ASC
                    "#,
                )
                .bind(cutoff)
                .bind(market.as_str())
                .fetch_all(&self.pool)
                .await
            }
            (Some(cutoff), None) => {
                sqlx::query(
                    r#"
                    SELECT * FROM positions
                    WHERE status IN ('closed', 'liquidated') AND closed_at >= ?
                    ORDER BY closed_at ASC, id ASC
                    "#,
                )
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await
            }
            (None, Some(market)) => {
                sqlx::query(
                    r#"
                    SELECT * FROM positions
                    WHERE status IN ('closed', 'liquidated') AND market = ?
                    ORDER BY closed_at ASC, id ASC
                    "#,
                )
                .bind(market.as_str())
                .fetch_all(&self.pool)
                .await
            }
            (None, None) => {
                sqlx::query(
                    r#"
                    SELECT * FROM positions
                    WHERE status IN ('closed', 'liquidated')
                    ORDER BY closed_at ASC, id ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().filter_map(position_from_row).collect())
    }
}

/// Map a row to a Position, warning and skipping on corruption.
pub(crate) fn position_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<Position> {
    let id_str: String = row.get("id");
    let id = match Uuid::parse_str(&id_str) {
        Ok(id) => id,
        Err(e) => {
            warn!(id = %id_str, error = %e, "Skipping position row with invalid id");
            return None;
        }
    };

    let status_str: String = row.get("status");
    let status = match PositionStatus::parse(&status_str) {
        Some(status) => status,
        None => {
            warn!(id = %id_str, status = %status_str, "Skipping position row with unknown status");
            return None;
        }
    };

    let market_str: String = row.get("market");
    let side_str: String = row.get("side");
    let (market, side) = match (Market::parse(&market_str), Side::parse(&side_str)) {
        (Some(market), Some(side)) => (market, side),
        _ => {
            warn!(id = %id_str, market = %market_str, side = %side_str, "Skipping position row with unknown market/side");
            return None;
        }
    };

    let opt_decimal = |col: &str| -> Option<Decimal> {
        row.get::<Option<String>, _>(col)
            .and_then(|s| Decimal::from_str(&s).ok())
    };

    Some(Position {
        id,
        user: UserId::new(row.get("user")),
        symbol: Symbol::new(row.get("symbol")),
        market,
        side,
        quantity: parse_decimal_col(row.get("quantity"), "quantity", &id_str),
        entry_price: parse_decimal_col(row.get("entry_price"), "entry_price", &id_str),
        leverage: row.get("leverage"),
        margin: parse_decimal_col(row.get("margin"), "margin", &id_str),
        liquidation_price: opt_decimal("liquidation_price"),
        stop_loss: opt_decimal("stop_loss"),
        take_profit: opt_decimal("take_profit"),
        status,
        pnl: opt_decimal("pnl"),
        exit_price: opt_decimal("exit_price"),
        opened_at: parse_datetime_col(row.get("opened_at"), "opened_at", &id_str),
        closed_at: row
            .get::<Option<String>, _>("closed_at")
            .map(|s| parse_datetime_col(s, "closed_at", &id_str)),
    })
}
