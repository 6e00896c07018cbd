use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::{ApiError, AppState};
use crate::model::{Filter, FilterConfig};

#[derive(Debug, Serialize)]
pub struct FilterView {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub config: FilterConfig,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

impl From<Filter> for FilterView {
    fn from(f: Filter) -> Self {
        Self {
            id: f.id,
            name: f.name,
            enabled: f.enabled,
            config: f.config,
            created_at: f.created_at,
            updated_at: f.updated_at,
        }
    }
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<FilterView>>, ApiError> {
    let filters = state.store.list_filters(false).await?;
    Ok(Json(filters.into_iter().map(FilterView::from).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FilterView>, ApiError> {
    let filter = state.store.get_filter(id).await?;
    let filter = filter.ok_or(crate::error::HttpError::NotFound)?;
    Ok(Json(filter.into()))
}

#[derive(Debug, Deserialize)]
pub struct CreateFilterRequest {
    pub name: String,
    pub config: FilterConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateFilterRequest>,
) -> Result<Json<FilterView>, ApiError> {
    validate_config(&request.config)?;
    let filter = state
        .store
        .create_filter(&request.name, request.config, request.enabled)
        .await?;
    Ok(Json(filter.into()))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateFilterRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub config: Option<FilterConfig>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateFilterRequest>,
) -> Result<Json<FilterView>, ApiError> {
    if let Some(config) = &request.config {
        validate_config(config)?;
    }
    state
        .store
        .update_filter(id, request.name, request.enabled, request.config)
        .await?;
    let filter = state
        .store
        .get_filter(id)
        .await?
        .ok_or(crate::error::HttpError::NotFound)?;
    Ok(Json(filter.into()))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Result<(), ApiError> {
    state.store.delete_filter(id).await?;
    Ok(())
}

pub async fn toggle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FilterView>, ApiError> {
    let filter = state
        .store
        .get_filter(id)
        .await?
        .ok_or(crate::error::HttpError::NotFound)?;
    state
        .store
        .update_filter(id, None, Some(!filter.enabled), None)
        .await?;
    let filter = state
        .store
        .get_filter(id)
        .await?
        .ok_or(crate::error::HttpError::NotFound)?;
    Ok(Json(filter.into()))
}

pub async fn clone_filter(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FilterView>, ApiError> {
    let source = state
        .store
        .get_filter(id)
        .await?
        .ok_or(crate::error::HttpError::NotFound)?;
    let clone_name = format!("{} (copy)", source.name);
    let cloned = state
        .store
        .create_filter(&clone_name, source.config, false)
        .await?;
    Ok(Json(cloned.into()))
}

fn validate_config(config: &FilterConfig) -> Result<(), ApiError> {
    match config {
        FilterConfig::PriceChange(c) => {
            crate::config::validate_interval_minutes(c.interval_minutes)
                .map_err(|_| crate::error::HttpError::BadRequest {
                    reason: format!("interval_minutes {} is not a supported interval", c.interval_minutes),
                })?;
            if c.min_price_change_percent < 0.0 {
                return Err(crate::error::HttpError::BadRequest {
                    reason: "min_price_change_percent must be >= 0".into(),
                }
                .into());
            }
            if let Some(max) = c.max_volume_24h {
                if max <= c.min_volume_24h {
                    return Err(crate::error::HttpError::BadRequest {
                        reason: "max_volume_24h must be greater than min_volume_24h".into(),
                    }
                    .into());
                }
            }
        }
        FilterConfig::VolumeSpike(c) => {
            if c.spike_coefficient <= 0.0 {
                return Err(crate::error::HttpError::BadRequest {
                    reason: "spike_coefficient must be > 0".into(),
                }
                .into());
            }
            if c.short_period_minutes == 0 || c.short_period_minutes > c.base_period_minutes {
                return Err(crate::error::HttpError::BadRequest {
                    reason: "short_period_minutes must be nonzero and <= base_period_minutes".into(),
                }
                .into());
            }
            if let Some(max) = c.max_volume_24h {
                if max <= c.min_volume_24h {
                    return Err(crate::error::HttpError::BadRequest {
                        reason: "max_volume_24h must be greater than min_volume_24h".into(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}
