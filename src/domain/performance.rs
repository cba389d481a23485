//! Per-user, per-day realized performance record.

use crate::domain::{Decimal, UserId};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// First day of the calendar month after `day`: the bankruptcy lockout ends
/// here and the balance resets to the seed amount.
pub fn first_of_next_month(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is always a valid date")
}

/// One row per (user, day), created on the first settlement of the day and
/// updated in place by every subsequent settlement.
///
/// Invariant: `ending_balance == starting_balance + total_pnl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPerformance {
    pub user: UserId,
    pub day: NaiveDate,
    /// Balance before the first settlement of the day.
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
    pub total_pnl: Decimal,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub daily_percentage_gain: Decimal,
}

impl DailyPerformance {
    /// Seed a fresh row from the first settlement of the day.
    pub fn first_of_day(user: UserId, day: NaiveDate, balance_before: Decimal, pnl: Decimal) -> Self {
        let mut row = DailyPerformance {
            user,
            day,
            starting_balance: balance_before,
            ending_balance: balance_before,
            total_pnl: Decimal::zero(),
            total_trades: 0,
            winning_trades: 0,
            daily_percentage_gain: Decimal::zero(),
        };
        row.apply_settlement(pnl);
        row
    }

    /// Fold one settlement into the day's totals.
    pub fn apply_settlement(&mut self, pnl: Decimal) {
        self.ending_balance += pnl;
        self.total_pnl += pnl;
        self.total_trades += 1;
        if pnl.is_positive() {
            self.winning_trades += 1;
        }
        self.daily_percentage_gain = if self.starting_balance.is_zero() {
            Decimal::zero()
        } else {
            (self.ending_balance - self.starting_balance) / self.starting_balance
                * Decimal::hundred()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_first_settlement_seeds_starting_balance() {
        let row = DailyPerformance::first_of_day(
            UserId::new("u1".to_string()),
            day(),
            d("1000"),
            d("50"),
        );
        assert_eq!(row.starting_balance, d("1000"));
        assert_eq!(row.ending_balance, d("1050"));
        assert_eq!(row.total_trades, 1);
        assert_eq!(row.winning_trades, 1);
        assert_eq!(row.daily_percentage_gain, d("5"));
    }

    #[test]
    fn test_ending_balance_equals_start_plus_pnl_sum() {
        let mut row = DailyPerformance::first_of_day(
            UserId::new("u1".to_string()),
            day(),
            d("1000"),
            d("50"),
        );
        row.apply_settlement(d("-30"));
        row.apply_settlement(d("10"));

        assert_eq!(row.total_pnl, d("30"));
        assert_eq!(row.ending_balance, row.starting_balance + row.total_pnl);
        assert_eq!(row.total_trades, 3);
        assert_eq!(row.winning_trades, 2);
        assert_eq!(row.daily_percentage_gain, d("3"));
    }

    #[test]
    fn test_zero_starting_balance_guards_division() {
        let mut row = DailyPerformance::first_of_day(
            UserId::new("u1".to_string()),
            day(),
            d("0"),
            d("10"),
        );
        assert_eq!(row.daily_percentage_gain, Decimal::zero());
        row.apply_settlement(d("-10"));
        assert_eq!(row.daily_percentage_gain, Decimal::zero());
    }

    #[test]
    fn test_first_of_next_month() {
        assert_eq!(
            first_of_next_month(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()),
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
        );
        // December rolls over the year boundary.
        assert_eq!(
            first_of_next_month(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_zero_pnl_is_not_a_win() {
        let row = DailyPerformance::first_of_day(
            UserId::new("u1".to_string()),
            day(),
            d("1000"),
            d("0"),
        );
        assert_eq!(row.winning_trades, 0);
        assert_eq!(row.total_trades, 1);
    }
}
