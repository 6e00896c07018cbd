pub mod chart;
pub mod filters;
pub mod settings;
pub mod triggers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::Cache;
use crate::chart::ChartHub;
use crate::error::{FilterError, HttpError, StorageError};
use crate::notifier::Notifier;
use crate::store::Store;

/// Runtime-mutable settings exposed through the API, distinct from the
/// on-disk config: these are the handful of knobs the UI lets an operator
/// change without a restart.
#[derive(Debug, Clone)]
pub struct Settings {
    pub check_interval_seconds: u64,
    pub cooldown_minutes: u64,
    pub parse_spot: bool,
    pub parse_futures: bool,
    pub telegram_configured: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<Cache>,
    pub chart: Arc<ChartHub>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: Arc<RwLock<Settings>>,
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/filters", get(filters::list).post(filters::create))
        .route(
            "/filters/{id}",
            get(filters::get).patch(filters::update).delete(filters::delete),
        )
        .route("/filters/{id}/toggle", post(filters::toggle))
        .route("/filters/{id}/clone", post(filters::clone_filter))
        .route("/triggers", get(triggers::list))
        .route("/triggers/stats", get(triggers::stats))
        .route("/settings", get(settings::get).put(settings::update))
        .route("/settings/test-notification", post(settings::test_notification))
        .route("/candles", get(chart::candles))
        .route("/chart/ws", get(chart::websocket));

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wraps the domain errors surfaced by handlers so each maps to a stable
/// HTTP status without every handler writing its own `IntoResponse`.
pub struct ApiError(HttpError);

impl From<HttpError> for ApiError {
    fn from(e: HttpError) -> Self {
        Self(e)
    }
}

impl From<StorageError> for ApiError {
    fn from(_: StorageError) -> Self {
        Self(HttpError::Internal)
    }
}

impl From<FilterError> for ApiError {
    fn from(e: FilterError) -> Self {
        match e {
            FilterError::Validation { field } => Self(HttpError::BadRequest { reason: field }),
            FilterError::NotFound { .. } => Self(HttpError::NotFound),
        }
    }
}

impl From<error_stack::Report<StorageError>> for ApiError {
    fn from(report: error_stack::Report<StorageError>) -> Self {
        tracing::warn!(error = ?report, "storage error serving request");
        Self(HttpError::Internal)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            HttpError::BadRequest { reason } => (StatusCode::BAD_REQUEST, reason),
            HttpError::NotFound => (StatusCode::NOT_FOUND, "not found".into()),
            HttpError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
