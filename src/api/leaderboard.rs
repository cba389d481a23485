use crate::api::AppState;
use crate::domain::{Market, UserId};
use crate::engine::ranking::{Leaderboard, Period, SortKey};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;

impl FromStr for Period {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "7d" => Ok(Period::Week),
            "30d" => Ok(Period::Month),
            "90d" => Ok(Period::Quarter),
            "all" => Ok(Period::All),
            _ => Err(()),
        }
    }
}

impl FromStr for SortKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roi" => Ok(SortKey::Roi),
            "profit" => Ok(SortKey::Profit),
            "consistency" => Ok(SortKey::Consistency),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub period: Option<String>,
    pub market: Option<String>,
    pub sort: Option<String>,
    pub user: Option<String>,
}

pub async fn get_leaderboard(
    Query(params): Query<LeaderboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<Leaderboard>, AppError> {
    let period = match params.period.as_deref() {
        Some(raw) => Period::from_str(raw)
            .map_err(|_| AppError::Validation(format!("Invalid period: {}", raw)))?,
        None => Period::default(),
    };

    let market = match params.market.as_deref() {
        Some(raw) => Some(
            Market::parse(&raw.trim().to_ascii_lowercase())
                .ok_or_else(|| AppError::Validation(format!("Invalid market: {}", raw)))?,
        ),
        None => None,
    };

    let sort = match params.sort.as_deref() {
        Some(raw) => SortKey::from_str(raw)
            .map_err(|_| AppError::Validation(format!("Invalid sort: {}", raw)))?,
        None => SortKey::default(),
    };

    let current_user = params
        .user
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(|u| UserId::new(u.to_string()));

    let leaderboard = state
        .ranking
        .leaderboard(period, market, sort, current_user.as_ref())
        .await?;
    Ok(Json(leaderboard))
}
