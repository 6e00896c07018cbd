use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::http::{ApiError, AppState};
use crate::model::{Candle, Market};

const SUPPORTED_TIMEFRAMES: [i64; 5] = [1, 5, 15, 30, 60];

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    pub symbol: String,
    pub market: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: i64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_timeframe() -> i64 {
    1
}

fn default_limit() -> usize {
    120
}

#[derive(Debug, Serialize)]
pub struct CandlesResponse {
    pub symbol: String,
    pub market: Market,
    pub timeframe: i64,
    pub candles: Vec<Candle>,
}

/// Serves candles for the chart surface, cache-first with a store fallback
/// when the in-memory ring doesn't hold enough history for the requested
/// timeframe, aggregating 1-minute candles up to the requested bucket size.
pub async fn candles(
    State(state): State<AppState>,
    Query(query): Query<CandlesQuery>,
) -> Result<Json<CandlesResponse>, ApiError> {
    let market = Market::from_str(&query.market).ok_or_else(|| crate::error::HttpError::BadRequest {
        reason: format!("invalid market: {}", query.market),
    })?;
    if !SUPPORTED_TIMEFRAMES.contains(&query.timeframe) {
        return Err(crate::error::HttpError::BadRequest {
            reason: format!("unsupported timeframe: {}", query.timeframe),
        }
        .into());
    }

    let needed_minutes = query.timeframe * query.limit as i64;
    let mut one_minute = state.cache.candles(&query.symbol, market);
    if (one_minute.len() as i64) < needed_minutes {
        one_minute = state
            .store
            .get_candles(&query.symbol, market, needed_minutes)
            .await?;
    }

    let aggregated = aggregate(&one_minute, query.timeframe);
    let candles = aggregated
        .into_iter()
        .rev()
        .take(query.limit)
        .rev()
        .collect();

    Ok(Json(CandlesResponse {
        symbol: query.symbol,
        market,
        timeframe: query.timeframe,
        candles,
    }))
}

/// Folds consecutive 1-minute candles into `timeframe`-minute buckets.
/// Buckets are aligned to `timeframe * 60` so the same series aggregates the
/// same way regardless of the query window.
fn aggregate(one_minute: &[Candle], timeframe: i64) -> Vec<Candle> {
    if timeframe <= 1 {
        return one_minute.to_vec();
    }
    let bucket_seconds = timeframe * 60;
    let mut buckets: Vec<Candle> = Vec::new();
    for candle in one_minute {
        let bucket_start = candle.timestamp - candle.timestamp.rem_euclid(bucket_seconds);
        match buckets.last_mut() {
            Some(last) if last.timestamp == bucket_start => {
                last.high = last.high.max(candle.high);
                last.low = last.low.min(candle.low);
                last.close = candle.close;
                last.volume += candle.volume;
            }
            _ => buckets.push(Candle {
                timestamp: bucket_start,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
            }),
        }
    }
    buckets
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { symbol: String, market: String },
    Unsubscribe { symbol: String, market: String },
}

pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut outbound) = state.chart.register();
    let (mut sink, mut stream) = socket.split();

    let forward = async {
        while let Some(message) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    };

    let receive = async {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { symbol, market }) => {
                        if let Some(market) = Market::from_str(&market) {
                            state.chart.subscribe(id, &symbol, market);
                        }
                    }
                    Ok(ClientMessage::Unsubscribe { symbol, market }) => {
                        if let Some(market) = Market::from_str(&market) {
                            state.chart.unsubscribe(id, &symbol, market);
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = ?err, "ignoring malformed chart client message");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::join!(forward, receive);
    state.chart.deregister(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64, volume: f64) -> Candle {
        Candle { timestamp: ts, open: close, high: close, low: close, close, volume }
    }

    #[test]
    fn aggregate_passthrough_at_one_minute() {
        let series = vec![candle(0, 1.0, 1.0), candle(60, 2.0, 1.0)];
        let result = aggregate(&series, 1);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn aggregate_folds_into_five_minute_buckets() {
        let series: Vec<Candle> = (0..5).map(|i| candle(i * 60, i as f64, 1.0)).collect();
        let result = aggregate(&series, 5);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].timestamp, 0);
        assert_eq!(result[0].open, 0.0);
        assert_eq!(result[0].close, 4.0);
        assert_eq!(result[0].volume, 5.0);
    }

    #[test]
    fn aggregate_starts_new_bucket_on_boundary_crossing() {
        let series: Vec<Candle> = (0..6).map(|i| candle(i * 60, i as f64, 1.0)).collect();
        let result = aggregate(&series, 5);
        assert_eq!(result.len(), 2);
        assert_eq!(result[1].timestamp, 300);
    }
}
