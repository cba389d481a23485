//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct, the single transactional
//! boundary for positions, account balances, and daily performance. Methods
//! are organized across submodules by domain:
//! - `positions.rs` - Position lifecycle: open, claim, settle, queries
//! - `performance.rs` - DailyPerformance upserts and queries
//!
//! Balance mutations only ever happen inside a transaction that also touches
//! a position row (open debit or settlement credit); nothing reads a balance
//! and writes it back outside a transaction.

mod performance;
mod positions;

use crate::domain::{performance::first_of_next_month, Decimal, UserId};
use crate::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// A user's virtual account.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub user: UserId,
    pub balance: Decimal,
    /// Set while the user is locked out after going bankrupt.
    pub bankruptcy_expiry: Option<NaiveDate>,
    /// Whether the account is listed on the public leaderboard.
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// One claimed position ready to settle.
///
/// The row keeps its PnL in the symbol's quote currency; the balance and the
/// daily performance move by the display-currency amount.
#[derive(Debug, Clone)]
pub struct SettlementEntry {
    pub position_id: Uuid,
    pub exit_price: Decimal,
    /// Realized PnL in the symbol's quote currency, stored on the row.
    pub pnl: Decimal,
    /// Realized PnL converted to the display currency.
    pub pnl_display: Decimal,
    /// Margin returned to the balance (zero for spot).
    pub margin_credit: Decimal,
    /// True when the close is a liquidation rather than a regular close.
    pub liquidated: bool,
}

/// Outcome of an atomic settlement batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReport {
    pub closed_count: usize,
    pub total_pnl: Decimal,
    pub new_balance: Decimal,
    /// True when this settlement drove the balance to zero or below.
    pub bankrupt: bool,
}

/// Repository for database operations.
pub struct Repository {
    pub(crate) pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    /// Fetch an account row, if the user has one.
    pub async fn get_account(&self, user: &UserId) -> Result<Option<Account>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT user, balance, bankruptcy_expiry, is_public, created_at
            FROM accounts
            WHERE user = ?
            "#,
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.as_ref().map(account_from_row))
    }

    /// Fetch the freshest committed balance for a user.
    pub async fn get_balance(&self, user: &UserId) -> Result<Option<Decimal>, AppError> {
        Ok(self.get_account(user).await?.map(|a| a.balance))
    }

    /// Create the account with the seed balance if it does not exist yet.
    pub async fn ensure_account(&self, user: &UserId, seed: Decimal) -> Result<Account, AppError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user, balance, bankruptcy_expiry, is_public, created_at)
            VALUES (?, ?, NULL, 1, ?)
            ON CONFLICT(user) DO NOTHING
            "#,
        )
        .bind(user.as_str())
        .bind(seed.to_canonical_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.get_account(user)
            .await?
            .ok_or_else(|| AppError::Internal("Account missing after ensure".to_string()))
    }

    /// Flip the public-profile flag used for leaderboard eligibility.
    pub async fn set_public_profile(&self, user: &UserId, is_public: bool) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET is_public = ? WHERE user = ?")
            .bind(if is_public { 1 } else { 0 })
            .bind(user.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// Readiness probe: the pool can serve a query.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// List all accounts (ranking input).
    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT user, balance, bankruptcy_expiry, is_public, created_at
            FROM accounts
            ORDER BY user ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().map(account_from_row).collect())
    }
}

/// Load the account inside a transaction, creating it with the seed balance
/// on first touch and applying a lapsed bankruptcy reset before anything else
/// reads the balance.
pub(crate) async fn load_account_for_update(
    conn: &mut SqliteConnection,
    user: &UserId,
    seed: Decimal,
    today: NaiveDate,
) -> Result<Account, AppError> {
    sqlx::query(
        r#"
        INSERT INTO accounts (user, balance, bankruptcy_expiry, is_public, created_at)
        VALUES (?, ?, NULL, 1, ?)
        ON CONFLICT(user) DO NOTHING
        "#,
    )
    .bind(user.as_str())
    .bind(seed.to_canonical_string())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_err)?;

    let row = sqlx::query(
        r#"
        SELECT user, balance, bankruptcy_expiry, is_public, created_at
        FROM accounts
        WHERE user = ?
        "#,
    )
    .bind(user.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_err)?;

    let mut account = account_from_row(&row);

    // Lapsed bankruptcy window: reset to the seed before evaluating anything.
    if let Some(expiry) = account.bankruptcy_expiry {
        if expiry <= today {
            account.balance = seed;
            account.bankruptcy_expiry = None;
            sqlx::query("UPDATE accounts SET balance = ?, bankruptcy_expiry = NULL WHERE user = ?")
                .bind(account.balance.to_canonical_string())
                .bind(user.as_str())
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_err)?;
        }
    }

    Ok(account)
}

/// Write the balance back, evaluating the bankruptcy rule. Returns the stored
/// balance and whether this write tripped bankruptcy.
pub(crate) async fn store_balance_with_bankruptcy_check(
    conn: &mut SqliteConnection,
    user: &UserId,
    balance: Decimal,
    today: NaiveDate,
) -> Result<(Decimal, bool), AppError> {
    if balance.is_positive() {
        sqlx::query("UPDATE accounts SET balance = ? WHERE user = ?")
            .bind(balance.to_canonical_string())
            .bind(user.as_str())
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;
        return Ok((balance, false));
    }

    let clamped = Decimal::zero();
    let expiry = first_of_next_month(today);
    sqlx::query("UPDATE accounts SET balance = ?, bankruptcy_expiry = ? WHERE user = ?")
        .bind(clamped.to_canonical_string())
        .bind(expiry.to_string())
        .bind(user.as_str())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
    Ok((clamped, true))
}

pub(crate) fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Account {
    let user: String = row.get("user");
    let balance = parse_decimal_col(row.get("balance"), "balance", &user);
    let bankruptcy_expiry = row
        .get::<Option<String>, _>("bankruptcy_expiry")
        .and_then(|s| NaiveDate::from_str(&s).ok());
    let is_public = row.get::<i64, _>("is_public") != 0;
    let created_at = parse_datetime_col(row.get("created_at"), "created_at", &user);

    Account {
        user: UserId::new(user),
        balance,
        bankruptcy_expiry,
        is_public,
        created_at,
    }
}

/// Parse a stored canonical decimal, warning and defaulting to zero on
/// corruption rather than failing the whole query.
pub(crate) fn parse_decimal_col(value: String, column: &str, key: &str) -> Decimal {
    Decimal::from_str(&value).unwrap_or_else(|e| {
        warn!(
            column = column,
            key = key,
            value = %value,
            error = %e,
            "Failed to parse stored decimal, using default"
        );
        Decimal::default()
    })
}

pub(crate) fn parse_datetime_col(value: String, column: &str, key: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(
                column = column,
                key = key,
                value = %value,
                error = %e,
                "Failed to parse stored timestamp, using epoch"
            );
            DateTime::<Utc>::UNIX_EPOCH
        })
}

/// Map sqlx errors, classifying SQLite busy/locked as a retryable conflict.
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        let msg = db.message();
        if msg.contains("locked") || msg.contains("busy") {
            return AppError::Conflict(msg.to_string());
        }
    }
    AppError::Internal(err.to_string())
}
