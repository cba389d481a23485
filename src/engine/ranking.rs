//! Leaderboard computation over settled positions.

use crate::db::Repository;
use crate::domain::{Decimal, Market, Position, Symbol, UserId};
use crate::error::AppError;
use crate::oracle::PriceOracle;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Ranking window, anchored at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "all")]
    All,
}

impl Period {
    fn days(&self) -> Option<i64> {
        match self {
            Period::Week => Some(7),
            Period::Month => Some(30),
            Period::Quarter => Some(90),
            Period::All => None,
        }
    }
}

impl Default for Period {
    fn default() -> Self {
        Period::Week
    }
}

/// Leaderboard ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Roi,
    Profit,
    Consistency,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::Roi
    }
}

const ROI_BADGE_THRESHOLD: i64 = 50;
const STREAK_WIN_RATE_THRESHOLD: i64 = 70;
const STREAK_MIN_TRADES: i64 = 5;
const TOP_BADGE_RANK: usize = 10;

/// One ranked user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user: UserId,
    /// Realized profit over the window, in the display currency.
    pub profit: Decimal,
    /// Profit over the estimated starting capital, as a percentage.
    pub roi: Decimal,
    pub win_rate: Decimal,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub badges: Vec<String>,
}

/// Full leaderboard response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub period: Period,
    pub sort: SortKey,
    pub entries: Vec<LeaderboardEntry>,
    /// The requesting user's own standing, present even when their profile
    /// is private or they have no trades in the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user: Option<LeaderboardEntry>,
}

#[derive(Debug, Clone, Default)]
struct UserStats {
    profit: Decimal,
    trades: i64,
    wins: i64,
}

/// Computes leaderboards from settled rows. Stateless between requests; each
/// request fetches its own FX quotes.
pub struct RankingService {
    repo: Arc<Repository>,
    oracle: Arc<dyn PriceOracle>,
    display_currency: String,
    seed_balance: Decimal,
}

impl RankingService {
    pub fn new(
        repo: Arc<Repository>,
        oracle: Arc<dyn PriceOracle>,
        display_currency: String,
        seed_balance: Decimal,
    ) -> Self {
        RankingService {
            repo,
            oracle,
            display_currency,
            seed_balance,
        }
    }

    /// Build the leaderboard for a window, market filter, and sort key.
    ///
    /// Only public profiles are listed. The requesting user's standing is
    /// computed and attached regardless of visibility.
    pub async fn leaderboard(
        &self,
        period: Period,
        market: Option<Market>,
        sort: SortKey,
        current_user: Option<&UserId>,
    ) -> Result<Leaderboard, AppError> {
        let since = period.days().map(|days| Utc::now() - Duration::days(days));
        let settled = self.repo.list_settled_since(since, market).await?;
        let stats = self.fold_stats(&settled).await?;

        let accounts: HashMap<UserId, (Decimal, bool)> = self
            .repo
            .list_accounts()
            .await?
            .into_iter()
            .map(|a| (a.user, (a.balance, a.is_public)))
            .collect();

        let mut scored: Vec<LeaderboardEntry> = stats
            .iter()
            .filter(|(user, _)| {
                accounts
                    .get(user)
                    .map(|(_, is_public)| *is_public)
                    .unwrap_or(false)
            })
            .map(|(user, s)| self.entry_for(user, s, &accounts))
            .collect();

        sort_entries(&mut scored, sort);
        for (i, entry) in scored.iter_mut().enumerate() {
            entry.rank = i + 1;
            entry.badges = badges(entry);
        }

        let current_user = match current_user {
            Some(user) => Some(match scored.iter().find(|e| e.user == *user) {
                Some(entry) => entry.clone(),
                None => {
                    // Unlisted (private or no trades in window): compute the
                    // standing and the rank they would hold.
                    let s = stats.get(user).cloned().unwrap_or_default();
                    let mut entry = self.entry_for(user, &s, &accounts);
                    entry.rank = would_rank(&scored, &entry, sort);
                    entry.badges = badges(&entry);
                    entry
                }
            }),
            None => None,
        };

        Ok(Leaderboard {
            period,
            sort,
            entries: scored,
            current_user,
        })
    }

    /// Fold settled rows into per-user stats, converting each PnL into the
    /// display currency with one FX quote per distinct quote asset.
    async fn fold_stats(
        &self,
        settled: &[Position],
    ) -> Result<HashMap<UserId, UserStats>, AppError> {
        let mut fx_quotes: HashMap<String, Decimal> = HashMap::new();
        let mut stats: HashMap<UserId, UserStats> = HashMap::new();

        for p in settled {
            let Some(pnl) = p.pnl else { continue };
            let pnl = self.to_display(&p.symbol, pnl, &mut fx_quotes).await?;

            let s = stats.entry(p.user.clone()).or_default();
            s.profit += pnl;
            s.trades += 1;
            if pnl.is_positive() {
                s.wins += 1;
            }
        }

        Ok(stats)
    }

    async fn to_display(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        fx_quotes: &mut HashMap<String, Decimal>,
    ) -> Result<Decimal, AppError> {
        let quote = match symbol.quote_asset() {
            Some(quote) if quote != self.display_currency => quote.to_string(),
            _ => return Ok(amount),
        };

        let rate = match fx_quotes.get(&quote) {
            Some(rate) => *rate,
            None => {
                let pair = Symbol::new(format!("{}/{}", quote, self.display_currency));
                let rate = self.oracle.spot_price(&pair).await?;
                fx_quotes.insert(quote, rate);
                rate
            }
        };

        Ok(amount * rate)
    }

    fn entry_for(
        &self,
        user: &UserId,
        s: &UserStats,
        accounts: &HashMap<UserId, (Decimal, bool)>,
    ) -> LeaderboardEntry {
        let balance = accounts
            .get(user)
            .map(|(balance, _)| *balance)
            .unwrap_or(self.seed_balance);

        let start = estimated_start(balance, s.profit, self.seed_balance);
        let roi = if start.is_zero() {
            Decimal::zero()
        } else {
            (balance - start) / start * Decimal::hundred()
        };
        let win_rate = if s.trades == 0 {
            Decimal::zero()
        } else {
            Decimal::from_i64(s.wins) / Decimal::from_i64(s.trades) * Decimal::hundred()
        };

        LeaderboardEntry {
            rank: 0,
            user: user.clone(),
            profit: s.profit,
            roi,
            win_rate,
            total_trades: s.trades,
            winning_trades: s.wins,
            badges: Vec::new(),
        }
    }
}

/// Capital the window's profit was earned against, worked back from the
/// current balance. A sub-seed start is kept as-is; only a non-positive base
/// falls back to the seed (guards the division and negative bases).
fn estimated_start(balance: Decimal, profit: Decimal, seed: Decimal) -> Decimal {
    let base = balance - profit;
    if base.is_positive() {
        base
    } else {
        seed
    }
}

fn sort_key(entry: &LeaderboardEntry, sort: SortKey) -> Decimal {
    match sort {
        SortKey::Roi => entry.roi,
        SortKey::Profit => entry.profit,
        SortKey::Consistency => entry.win_rate,
    }
}

/// Deterministic ordering: the sort key descending, then trade count
/// descending, then user id ascending.
fn sort_entries(entries: &mut [LeaderboardEntry], sort: SortKey) {
    entries.sort_by(|a, b| {
        sort_key(b, sort)
            .cmp(&sort_key(a, sort))
            .then(b.total_trades.cmp(&a.total_trades))
            .then(a.user.cmp(&b.user))
    });
}

/// Rank an unlisted entry would hold among the listed ones.
fn would_rank(scored: &[LeaderboardEntry], entry: &LeaderboardEntry, sort: SortKey) -> usize {
    let ahead = scored
        .iter()
        .filter(|e| {
            sort_key(e, sort)
                .cmp(&sort_key(entry, sort))
                .then(e.total_trades.cmp(&entry.total_trades))
                .then(entry.user.cmp(&e.user))
                .is_gt()
        })
        .count();
    ahead + 1
}

fn badges(entry: &LeaderboardEntry) -> Vec<String> {
    let mut badges = Vec::new();
    if entry.roi > Decimal::from_i64(ROI_BADGE_THRESHOLD) {
        badges.push("proTrader".to_string());
    }
    if entry.win_rate > Decimal::from_i64(STREAK_WIN_RATE_THRESHOLD)
        && entry.total_trades > STREAK_MIN_TRADES
    {
        badges.push("streak".to_string());
    }
    if entry.rank != 0 && entry.rank <= TOP_BADGE_RANK {
        badges.push("top10".to_string());
    }
    badges
}
