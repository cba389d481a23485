//! Background trigger monitor: watches open positions for stop-loss,
//! take-profit, and liquidation breaches.
//!
//! The watch index is maintained from position lifecycle events, never by
//! rescanning the positions table each tick. `sweep` is the explicit
//! catch-up path for anything the live loop missed.

use crate::db::Repository;
use crate::domain::{Decimal, Market, Position, Side, Symbol, UserId};
use crate::engine::settlement::{CloseReason, SettlementEngine};
use crate::error::AppError;
use crate::oracle::PriceOracle;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Position lifecycle notifications feeding the watch index.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    Opened(Position),
    Closed {
        id: Uuid,
        symbol: Symbol,
        market: Market,
    },
}

/// Sender half of the monitor's event channel, held by the ledger and the
/// settlement engine.
pub type MonitorHandle = mpsc::UnboundedSender<PositionEvent>;

/// Create the event channel wiring the ledger and settlement engine to a
/// monitor.
pub fn event_channel() -> (MonitorHandle, mpsc::UnboundedReceiver<PositionEvent>) {
    mpsc::unbounded_channel()
}

/// Trigger levels watched for one open position.
#[derive(Debug, Clone)]
struct Watched {
    user: UserId,
    side: Side,
    liquidation_price: Option<Decimal>,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
}

impl Watched {
    fn from_position(p: &Position) -> Self {
        Watched {
            user: p.user.clone(),
            side: p.side,
            liquidation_price: p.liquidation_price,
            stop_loss: p.stop_loss,
            take_profit: p.take_profit,
        }
    }
}

/// Breach check with fixed precedence: liquidation, then stop-loss, then
/// take-profit.
fn breach(watched: &Watched, price: Decimal) -> Option<CloseReason> {
    let hit_at_or_beyond = |level: Decimal, toward_loss: bool| match (watched.side, toward_loss) {
        (Side::Long, true) | (Side::Short, false) => price <= level,
        (Side::Long, false) | (Side::Short, true) => price >= level,
    };

    if let Some(liq) = watched.liquidation_price {
        if hit_at_or_beyond(liq, true) {
            return Some(CloseReason::Liquidation);
        }
    }
    if let Some(sl) = watched.stop_loss {
        if hit_at_or_beyond(sl, true) {
            return Some(CloseReason::StopLoss);
        }
    }
    if let Some(tp) = watched.take_profit {
        if hit_at_or_beyond(tp, false) {
            return Some(CloseReason::TakeProfit);
        }
    }
    None
}

/// Background watcher closing positions whose trigger levels are breached.
pub struct TriggerMonitor {
    repo: Arc<Repository>,
    oracle: Arc<dyn PriceOracle>,
    settlement: Arc<SettlementEngine>,
    interval: Duration,
    watch: RwLock<HashMap<(Symbol, Market), HashMap<Uuid, Watched>>>,
}

impl TriggerMonitor {
    pub fn new(
        repo: Arc<Repository>,
        oracle: Arc<dyn PriceOracle>,
        settlement: Arc<SettlementEngine>,
        interval: Duration,
    ) -> Self {
        TriggerMonitor {
            repo,
            oracle,
            settlement,
            interval,
            watch: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the watch index from the open rows, for process startup.
    pub async fn bootstrap(&self) -> Result<(), AppError> {
        let positions = self.repo.list_all_open_positions().await?;
        let mut watch = self.watch.write().await;
        watch.clear();
        for p in &positions {
            watch
                .entry((p.symbol.clone(), p.market))
                .or_default()
                .insert(p.id, Watched::from_position(p));
        }
        info!(positions = positions.len(), "Trigger monitor bootstrapped");
        Ok(())
    }

    /// Event + tick loop. Runs until the event channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PositionEvent>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.apply_event(event).await,
                    None => {
                        info!("Event channel closed, trigger monitor stopping");
                        return;
                    }
                },
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn apply_event(&self, event: PositionEvent) {
        let mut watch = self.watch.write().await;
        match event {
            PositionEvent::Opened(p) => {
                debug!(position = %p.id, symbol = %p.symbol, "Watching position");
                watch
                    .entry((p.symbol.clone(), p.market))
                    .or_default()
                    .insert(p.id, Watched::from_position(&p));
            }
            PositionEvent::Closed { id, symbol, market } => {
                let key = (symbol, market);
                if let Some(entries) = watch.get_mut(&key) {
                    entries.remove(&id);
                    if entries.is_empty() {
                        watch.remove(&key);
                    }
                }
            }
        }
    }

    /// One monitoring pass: one oracle call per watched (symbol, market),
    /// then a breach evaluation per position. Transient price failures leave
    /// the key watched for the next tick.
    pub async fn tick(&self) {
        let snapshot: Vec<((Symbol, Market), Vec<(Uuid, Watched)>)> = {
            let watch = self.watch.read().await;
            watch
                .iter()
                .map(|(key, entries)| {
                    (
                        key.clone(),
                        entries.iter().map(|(id, w)| (*id, w.clone())).collect(),
                    )
                })
                .collect()
        };

        let quotes = join_all(snapshot.iter().map(|((symbol, market), _)| async move {
            self.market_price(symbol, *market).await
        }))
        .await;

        for (((symbol, market), entries), quote) in snapshot.into_iter().zip(quotes) {
            let price = match quote {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %symbol, market = %market, error = %e, "Price unavailable, skipping tick for symbol");
                    continue;
                }
            };

            for (id, watched) in entries {
                let Some(reason) = breach(&watched, price) else {
                    continue;
                };
                self.close_triggered(&symbol, market, id, &watched, reason, price)
                    .await;
            }
        }
    }

    async fn close_triggered(
        &self,
        symbol: &Symbol,
        market: Market,
        id: Uuid,
        watched: &Watched,
        reason: CloseReason,
        price: Decimal,
    ) {
        info!(
            position = %id,
            symbol = %symbol,
            reason = reason.as_str(),
            price = %price.to_canonical_string(),
            "Trigger breached, closing position"
        );

        match self
            .settlement
            .close_for_user(&watched.user, &[id], reason)
            .await
        {
            Ok(_) => self.forget(symbol, market, id).await,
            // Someone else settled it first; stop watching.
            Err(AppError::AlreadyClosed(_)) | Err(AppError::NotFound(_)) => {
                self.forget(symbol, market, id).await;
            }
            // Transient: keep watching, the next tick retries.
            Err(AppError::PriceUnavailable(_)) | Err(AppError::Conflict(_)) => {}
            Err(e) => {
                warn!(position = %id, error = %e, "Trigger close failed");
            }
        }
    }

    async fn forget(&self, symbol: &Symbol, market: Market, id: Uuid) {
        let mut watch = self.watch.write().await;
        let key = (symbol.clone(), market);
        if let Some(entries) = watch.get_mut(&key) {
            entries.remove(&id);
            if entries.is_empty() {
                watch.remove(&key);
            }
        }
    }

    /// Catch-up pass over every open position in the database, closing any
    /// that already breach at fresh prices. Returns the number of positions
    /// closed.
    pub async fn sweep(&self) -> Result<usize, AppError> {
        let positions = self.repo.list_all_open_positions().await?;
        let mut prices: HashMap<(Symbol, Market), Option<Decimal>> = HashMap::new();
        let mut closed = 0;

        for p in &positions {
            let key = (p.symbol.clone(), p.market);
            let price = match prices.get(&key) {
                Some(price) => *price,
                None => {
                    let price = match self.market_price(&p.symbol, p.market).await {
                        Ok(price) => Some(price),
                        Err(e) => {
                            warn!(symbol = %p.symbol, error = %e, "Price unavailable during sweep");
                            None
                        }
                    };
                    prices.insert(key, price);
                    price
                }
            };
            let Some(price) = price else { continue };

            let watched = Watched::from_position(p);
            let Some(reason) = breach(&watched, price) else {
                continue;
            };

            match self
                .settlement
                .close_for_user(&p.user, &[p.id], reason)
                .await
            {
                Ok(outcome) => {
                    closed += outcome.closed_count;
                    self.forget(&p.symbol, p.market, p.id).await;
                }
                Err(AppError::AlreadyClosed(_)) | Err(AppError::NotFound(_)) => {
                    self.forget(&p.symbol, p.market, p.id).await;
                }
                // The claim was released; the row is still open and must
                // stay watched for the next tick or sweep.
                Err(e) => {
                    warn!(position = %p.id, error = %e, "Sweep close failed");
                }
            }
        }

        info!(scanned = positions.len(), closed = closed, "Sweep complete");
        Ok(closed)
    }

    async fn market_price(&self, symbol: &Symbol, market: Market) -> Result<Decimal, AppError> {
        let price = match market {
            Market::Spot => self.oracle.spot_price(symbol).await?,
            Market::Futures => self.oracle.futures_price(symbol).await?,
        };
        Ok(price)
    }

    /// Number of positions in the live watch index, reported by the
    /// readiness probe.
    pub async fn watched_count(&self) -> usize {
        self.watch
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }
}
