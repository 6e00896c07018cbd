use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::{ApiError, AppState, Settings};
use crate::model::{Market, TriggerData};
use crate::notifier::NotificationEvent;

#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub check_interval_seconds: u64,
    pub cooldown_minutes: u64,
    pub parse_spot: bool,
    pub parse_futures: bool,
    pub telegram_configured: bool,
}

impl From<Settings> for SettingsView {
    fn from(s: Settings) -> Self {
        Self {
            check_interval_seconds: s.check_interval_seconds,
            cooldown_minutes: s.cooldown_minutes,
            parse_spot: s.parse_spot,
            parse_futures: s.parse_futures,
            telegram_configured: s.telegram_configured,
        }
    }
}

pub async fn get(State(state): State<AppState>) -> Json<SettingsView> {
    let settings = state.settings.read().await.clone();
    Json(settings.into())
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateSettingsRequest {
    pub check_interval_seconds: Option<u64>,
    pub cooldown_minutes: Option<u64>,
    pub parse_spot: Option<bool>,
    pub parse_futures: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsView>, ApiError> {
    if let Some(seconds) = request.check_interval_seconds {
        if !(60..=3600).contains(&seconds) {
            return Err(crate::error::HttpError::BadRequest {
                reason: "check_interval_seconds must be in 60..=3600".into(),
            }
            .into());
        }
    }
    if let Some(minutes) = request.cooldown_minutes {
        if !(1..=1440).contains(&minutes) {
            return Err(crate::error::HttpError::BadRequest {
                reason: "cooldown_minutes must be in 1..=1440".into(),
            }
            .into());
        }
    }

    let mut settings = state.settings.write().await;
    if let Some(seconds) = request.check_interval_seconds {
        settings.check_interval_seconds = seconds;
    }
    if let Some(minutes) = request.cooldown_minutes {
        settings.cooldown_minutes = minutes;
    }
    if let Some(parse_spot) = request.parse_spot {
        settings.parse_spot = parse_spot;
    }
    if let Some(parse_futures) = request.parse_futures {
        settings.parse_futures = parse_futures;
    }
    if !settings.parse_spot && !settings.parse_futures {
        return Err(crate::error::HttpError::BadRequest {
            reason: "at least one of parse_spot / parse_futures must stay enabled".into(),
        }
        .into());
    }

    Ok(Json(settings.clone().into()))
}

/// Dispatches a synthetic trigger through the configured notifier so an
/// operator can confirm Telegram delivery without waiting for a real match.
pub async fn test_notification(State(state): State<AppState>) -> Result<(), ApiError> {
    if !state.settings.read().await.telegram_configured {
        return Err(crate::error::HttpError::BadRequest {
            reason: "telegram is not configured".into(),
        }
        .into());
    }

    let event = NotificationEvent {
        filter_id: 0,
        filter_name: "test notification".into(),
        filter_type: "price_change",
        symbol: "BTC/USDT".into(),
        market: Market::Spot,
        triggered_at: crate::clock::now(),
        data: TriggerData {
            price_change_percent: Some(0.0),
            url: "https://www.bybit.com/trade/spot/BTC/USDT".into(),
            ..Default::default()
        },
    };

    state
        .notifier
        .notify(&event)
        .await
        .map_err(|err| {
            tracing::warn!(error = ?err, "test notification failed");
            crate::error::HttpError::Internal
        })?;

    Ok(())
}
