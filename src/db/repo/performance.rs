//! Daily performance rows: one per (user, day), folded on every settlement.

use crate::domain::{DailyPerformance, Decimal, UserId};
use crate::error::AppError;
use chrono::NaiveDate;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use tracing::warn;

use super::{map_sqlx_err, parse_decimal_col, Repository};

/// Fold one settlement into the (user, day) row inside an open settlement
/// transaction. Creates the row on the first settlement of the day, seeding
/// `starting_balance` with the balance before this settlement's PnL.
pub(crate) async fn upsert_in_tx(
    conn: &mut SqliteConnection,
    user: &UserId,
    day: NaiveDate,
    balance_before: Decimal,
    pnl: Decimal,
) -> Result<(), AppError> {
    let existing = sqlx::query(
        r#"
        SELECT user, day, starting_balance, ending_balance, total_pnl,
               total_trades, winning_trades, daily_percentage_gain
        FROM daily_performance
        WHERE user = ? AND day = ?
        "#,
    )
    .bind(user.as_str())
    .bind(day.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_err)?;

    let row = match existing.as_ref().and_then(performance_from_row) {
        Some(mut row) => {
            row.apply_settlement(pnl);
            row
        }
        None => DailyPerformance::first_of_day(user.clone(), day, balance_before, pnl),
    };

    sqlx::query(
        r#"
        INSERT OR REPLACE INTO daily_performance
        (user, day, starting_balance, ending_balance, total_pnl,
         total_trades, winning_trades, daily_percentage_gain)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.user.as_str())
    .bind(row.day.to_string())
    .bind(row.starting_balance.to_canonical_string())
    .bind(row.ending_balance.to_canonical_string())
    .bind(row.total_pnl.to_canonical_string())
    .bind(row.total_trades)
    .bind(row.winning_trades)
    .bind(row.daily_percentage_gain.to_canonical_string())
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_err)?;

    Ok(())
}

impl Repository {
    /// Fetch one day's performance row.
    pub async fn get_daily_performance(
        &self,
        user: &UserId,
        day: NaiveDate,
    ) -> Result<Option<DailyPerformance>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT user, day, starting_balance, ending_balance, total_pnl,
                   total_trades, winning_trades, daily_percentage_gain
            FROM daily_performance
            WHERE user = ? AND day = ?
            "#,
        )
        .bind(user.as_str())
        .bind(day.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.as_ref().and_then(performance_from_row))
    }

    /// Performance rows for a user over an inclusive day range, oldest first.
    pub async fn list_daily_performance(
        &self,
        user: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyPerformance>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT user, day, starting_balance, ending_balance, total_pnl,
                   total_trades, winning_trades, daily_percentage_gain
            FROM daily_performance
            WHERE user = ? AND day >= ? AND day <= ?
            ORDER BY day ASC
            "#,
        )
        .bind(user.as_str())
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().filter_map(performance_from_row).collect())
    }
}

fn performance_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<DailyPerformance> {
    let user: String = row.get("user");
    let day_str: String = row.get("day");
    let day = match NaiveDate::from_str(&day_str) {
        Ok(day) => day,
        Err(e) => {
            warn!(user = %user, day = %day_str, error = %e, "Skipping performance row with invalid day");
            return None;
        }
    };

    Some(DailyPerformance {
        day,
        starting_balance: parse_decimal_col(row.get("starting_balance"), "starting_balance", &user),
        ending_balance: parse_decimal_col(row.get("ending_balance"), "ending_balance", &user),
        total_pnl: parse_decimal_col(row.get("total_pnl"), "total_pnl", &user),
        total_trades: row.get("total_trades"),
        winning_trades: row.get("winning_trades"),
        daily_percentage_gain: parse_decimal_col(
            row.get("daily_percentage_gain"),
            "daily_percentage_gain",
            &user,
        ),
        user: UserId::new(user),
    })
}
