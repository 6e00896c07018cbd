use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::{ApiError, AppState};
use crate::model::{Market, Trigger};
use crate::store::{TriggerQuery as StoreTriggerQuery, TriggerStats};

const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListTriggersQuery {
    pub filter_id: Option<i64>,
    pub symbol: Option<String>,
    pub market: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TriggerPageView {
    pub triggers: Vec<Trigger>,
    pub total: i64,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListTriggersQuery>,
) -> Result<Json<TriggerPageView>, ApiError> {
    let market = match query.market.as_deref() {
        Some(raw) => Some(
            Market::from_str(raw).ok_or_else(|| crate::error::HttpError::BadRequest {
                reason: format!("invalid market: {raw}"),
            })?,
        ),
        None => None,
    };

    let page = state
        .store
        .get_triggers(StoreTriggerQuery {
            filter_id: query.filter_id,
            symbol: query.symbol,
            market,
            limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: query.offset.unwrap_or(0),
        })
        .await?;

    Ok(Json(TriggerPageView {
        triggers: page.triggers,
        total: page.total,
    }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<TriggerStats>, ApiError> {
    let stats = state.store.trigger_stats().await?;
    Ok(Json(stats))
}
