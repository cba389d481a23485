//! Settlement engine: claim, price, and settle closes atomically.

use crate::db::{Repository, SettlementEntry};
use crate::domain::{realized_pnl, Decimal, Market, Position, Symbol, UserId};
use crate::engine::monitor::PositionEvent;
use crate::error::AppError;
use crate::oracle::PriceOracle;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// How many times the settlement transaction is retried on a lock conflict.
const SETTLE_RETRIES: u32 = 3;

/// Why a position is being closed. Determines the exit price source and the
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    Manual,
    StopLoss,
    TakeProfit,
    Liquidation,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Manual => "manual",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Liquidation => "liquidation",
        }
    }
}

/// Result of a settled close batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseOutcome {
    pub position_ids: Vec<Uuid>,
    pub closed_count: usize,
    pub total_pnl: Decimal,
    pub new_balance: Decimal,
    pub bankrupt: bool,
}

/// Atomic close pipeline: claim the rows, resolve exit and FX prices outside
/// the transaction, then settle in one transaction with bounded retry.
pub struct SettlementEngine {
    repo: Arc<Repository>,
    oracle: Arc<dyn PriceOracle>,
    display_currency: String,
    seed_balance: Decimal,
    events: mpsc::UnboundedSender<PositionEvent>,
}

impl SettlementEngine {
    pub fn new(
        repo: Arc<Repository>,
        oracle: Arc<dyn PriceOracle>,
        display_currency: String,
        seed_balance: Decimal,
        events: mpsc::UnboundedSender<PositionEvent>,
    ) -> Self {
        SettlementEngine {
            repo,
            oracle,
            display_currency,
            seed_balance,
            events,
        }
    }

    /// Close a batch of positions owned by `user`.
    ///
    /// The claim flips each row `open -> closing` and is the at-most-once
    /// guarantee: a concurrent closer gets `AlreadyClosed`. Any pricing
    /// failure after the claim releases it, leaving the rows open.
    pub async fn close_for_user(
        &self,
        user: &UserId,
        ids: &[Uuid],
        reason: CloseReason,
    ) -> Result<CloseOutcome, AppError> {
        if ids.is_empty() {
            return Err(AppError::Validation("No positions to close".to_string()));
        }

        let claimed = self.repo.claim_positions(ids).await?;

        if let Some(stranger) = claimed.iter().find(|p| p.user != *user) {
            self.repo.release_claims(ids).await?;
            return Err(AppError::NotFound(format!("Position {}", stranger.id)));
        }

        let entries = match self.resolve_entries(&claimed, reason).await {
            Ok(entries) => entries,
            Err(e) => {
                self.repo.release_claims(ids).await?;
                return Err(e);
            }
        };

        let report = match self.settle_with_retry(user, &entries).await {
            Ok(report) => report,
            Err(e) => {
                self.repo.release_claims(ids).await?;
                return Err(e);
            }
        };

        for p in &claimed {
            let _ = self.events.send(PositionEvent::Closed {
                id: p.id,
                symbol: p.symbol.clone(),
                market: p.market,
            });
        }

        info!(
            user = %user,
            closed = report.closed_count,
            reason = reason.as_str(),
            pnl = %report.total_pnl.to_canonical_string(),
            balance = %report.new_balance.to_canonical_string(),
            bankrupt = report.bankrupt,
            "Settled close batch"
        );

        Ok(CloseOutcome {
            position_ids: claimed.iter().map(|p| p.id).collect(),
            closed_count: report.closed_count,
            total_pnl: report.total_pnl,
            new_balance: report.new_balance,
            bankrupt: report.bankrupt,
        })
    }

    /// Price each claimed position and convert its PnL into the display
    /// currency. One market quote per (symbol, market) and one FX quote per
    /// distinct quote asset for the whole batch.
    async fn resolve_entries(
        &self,
        claimed: &[Position],
        reason: CloseReason,
    ) -> Result<Vec<SettlementEntry>, AppError> {
        let mut market_quotes: HashMap<(Symbol, Market), Decimal> = HashMap::new();
        let mut fx_quotes: HashMap<String, Decimal> = HashMap::new();
        let mut entries = Vec::with_capacity(claimed.len());

        for p in claimed {
            // Liquidations settle at the liquidation price, never the
            // observed tick, so losses are bounded by the margin.
            let exit_price = match (reason, p.liquidation_price) {
                (CloseReason::Liquidation, Some(liq)) => liq,
                _ => {
                    let key = (p.symbol.clone(), p.market);
                    match market_quotes.get(&key) {
                        Some(price) => *price,
                        None => {
                            let price = self.market_price(&p.symbol, p.market).await?;
                            market_quotes.insert(key, price);
                            price
                        }
                    }
                }
            };

            let pnl = realized_pnl(p.side, p.entry_price, exit_price, p.quantity);
            let pnl_display = self
                .to_display_currency(&p.symbol, pnl, &mut fx_quotes)
                .await?;

            let margin_credit = match p.market {
                Market::Futures => p.margin,
                Market::Spot => Decimal::zero(),
            };

            entries.push(SettlementEntry {
                position_id: p.id,
                exit_price,
                pnl,
                pnl_display,
                margin_credit,
                liquidated: reason == CloseReason::Liquidation,
            });
        }

        Ok(entries)
    }

    async fn market_price(&self, symbol: &Symbol, market: Market) -> Result<Decimal, AppError> {
        let price = match market {
            Market::Spot => self.oracle.spot_price(symbol).await?,
            Market::Futures => self.oracle.futures_price(symbol).await?,
        };
        Ok(price)
    }

    /// Convert an amount in the symbol's quote asset to the display currency
    /// via a spot FX quote, cached per quote asset for the batch.
    async fn to_display_currency(
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

    async fn settle_with_retry(
        &self,
        user: &UserId,
        entries: &[SettlementEntry],
    ) -> Result<crate::db::SettlementReport, AppError> {
        let today = Utc::now().date_naive();
        let mut attempt = 0;
        loop {
            match self
                .repo
                .settle_claimed(user, entries, self.seed_balance, today)
                .await
            {
                Ok(report) => return Ok(report),
                Err(AppError::Conflict(msg)) if attempt + 1 < SETTLE_RETRIES => {
                    attempt += 1;
                    warn!(
                        user = %user,
                        attempt = attempt,
                        error = %msg,
                        "Settlement transaction conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
