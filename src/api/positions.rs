use crate::api::AppState;
use crate::domain::{Decimal, Market, Position, Side, Symbol, UserId};
use crate::engine::ledger::{AggregatedPosition, OpenPositionRequest};
use crate::engine::settlement::{CloseOutcome, CloseReason};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionBody {
    pub user: String,
    pub symbol: String,
    pub market: Market,
    pub side: Side,
    pub quantity: Decimal,
    pub leverage: Option<i64>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionResponse {
    pub position: Position,
    pub balance: Decimal,
}

pub async fn open_position(
    State(state): State<AppState>,
    Json(body): Json<OpenPositionBody>,
) -> Result<Json<OpenPositionResponse>, AppError> {
    let user = parse_user(&body.user)?;
    let request = OpenPositionRequest {
        symbol: Symbol::new(body.symbol),
        market: body.market,
        side: body.side,
        quantity: body.quantity,
        leverage: body.leverage,
        stop_loss: body.stop_loss,
        take_profit: body.take_profit,
    };

    let (position, balance) = state.ledger.open(&user, request).await?;
    Ok(Json(OpenPositionResponse { position, balance }))
}

/// Close either an explicit id batch or every open position on a symbol.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionsBody {
    pub user: String,
    pub position_ids: Option<Vec<Uuid>>,
    pub symbol: Option<String>,
}

pub async fn close_positions(
    State(state): State<AppState>,
    Json(body): Json<ClosePositionsBody>,
) -> Result<Json<CloseOutcome>, AppError> {
    let user = parse_user(&body.user)?;

    let ids = match (body.position_ids, body.symbol) {
        (Some(ids), None) => ids,
        (None, Some(symbol)) => {
            let symbol = Symbol::new(symbol);
            let ids = state.ledger.open_ids_for_symbol(&user, &symbol).await?;
            if ids.is_empty() {
                return Err(AppError::NotFound(format!(
                    "No open positions for {}",
                    symbol
                )));
            }
            ids
        }
        _ => {
            return Err(AppError::Validation(
                "Provide either positionIds or symbol".to_string(),
            ))
        }
    };

    let outcome = state
        .settlement
        .close_for_user(&user, &ids, CloseReason::Manual)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsQuery {
    pub user: String,
}

pub async fn get_open_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<AggregatedPosition>>, AppError> {
    let user = parse_user(&params.user)?;
    let positions = state.ledger.list_open_aggregated(&user).await?;
    Ok(Json(positions))
}

pub async fn get_closed_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Position>>, AppError> {
    let user = parse_user(&params.user)?;
    let positions = state.ledger.list_closed(&user).await?;
    Ok(Json(positions))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub closed: usize,
}

/// Catch-up scan closing every open position that already breaches its
/// trigger levels at fresh prices.
pub async fn sweep(State(state): State<AppState>) -> Result<Json<SweepResponse>, AppError> {
    let closed = state.monitor.sweep().await?;
    Ok(Json(SweepResponse { closed }))
}

fn parse_user(raw: &str) -> Result<UserId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("User must not be empty".to_string()));
    }
    Ok(UserId::new(trimmed.to_string()))
}
