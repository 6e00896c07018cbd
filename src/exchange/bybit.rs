use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExchangeError;
use crate::exchange::{Exchange, TickerEvent};
use crate::model::{Candle, Market, TickerFrame, TickerSnapshot};

const REST_BASE: &str = "https://api.bybit.com";
const REST_BASE_TESTNET: &str = "https://api-testnet.bybit.com";
const WS_SPOT: &str = "wss://stream.bybit.com/v5/public/spot";
const WS_LINEAR: &str = "wss://stream.bybit.com/v5/public/linear";
const WS_SPOT_TESTNET: &str = "wss://stream-testnet.bybit.com/v5/public/spot";
const WS_LINEAR_TESTNET: &str = "wss://stream-testnet.bybit.com/v5/public/linear";
const MAX_CANDLES_PER_REQUEST: usize = 1000;
const MAX_BACKOFF_SECS: u64 = 60;

/// Bybit exchange integration: one REST client shared by both markets, and
/// per-(symbol, market) WebSocket connections opened on demand.
///
/// Bybit assigns the same base symbol to spot and linear-perpetual pairs
/// (`BTC/USDT` trades on both), so every call here takes `Market`
/// explicitly rather than inferring it from the symbol string.
pub struct BybitExchange {
    client: reqwest::Client,
    rest_base: &'static str,
    ws_spot: &'static str,
    ws_linear: &'static str,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl BybitExchange {
    pub fn new(testnet: bool, timeout_ms: u64, requests_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second.max(1)).unwrap());
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .expect("reqwest client builder"),
            rest_base: if testnet { REST_BASE_TESTNET } else { REST_BASE },
            ws_spot: if testnet { WS_SPOT_TESTNET } else { WS_SPOT },
            ws_linear: if testnet { WS_LINEAR_TESTNET } else { WS_LINEAR },
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    fn category(market: Market) -> &'static str {
        match market {
            Market::Spot => "spot",
            Market::Futures => "linear",
        }
    }

    fn ws_url(&self, market: Market) -> &'static str {
        match market {
            Market::Spot => self.ws_spot,
            Market::Futures => self.ws_linear,
        }
    }
}

/// `BTC/USDT` -> `BTCUSDT`, the wire format Bybit's REST/WS API expects.
fn to_bybit_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

impl Exchange for BybitExchange {
    fn watch_ticker(
        &self,
        symbol: &str,
        market: Market,
        tx: mpsc::Sender<TickerEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<ExchangeError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let mut backoff = Duration::from_secs(1);

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                match run_ticker_ws(self.ws_url(market), &symbol, market, &tx, &cancel).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(error = %e, symbol = %symbol, market = %market, "bybit ticker ws disconnected, retrying");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                    }
                }
            }
            Ok(())
        })
    }

    fn fetch_ohlcv(
        &self,
        symbol: &str,
        market: Market,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<ExchangeError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{}/v5/market/kline", self.rest_base);
            let bybit_symbol = to_bybit_symbol(&symbol);
            let fetch_limit = limit.min(MAX_CANDLES_PER_REQUEST);
            let limit_str = fetch_limit.to_string();
            let params = [
                ("category", Self::category(market)),
                ("symbol", bybit_symbol.as_str()),
                ("interval", "1"),
                ("limit", limit_str.as_str()),
            ];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(ExchangeError::Request {
                    exchange: "bybit".into(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(ExchangeError::Request {
                    exchange: "bybit".into(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }

            let raw: BybitKlineResponse =
                response
                    .json()
                    .await
                    .change_context(ExchangeError::ResponseParse {
                        exchange: "bybit".into(),
                    })?;

            if raw.ret_code != 0 {
                return Err(Report::new(ExchangeError::Protocol {
                    exchange: "bybit".into(),
                    reason: raw.ret_msg,
                }));
            }

            // Bybit returns rows newest-first; the first row may still be
            // open. Drop it and reverse to oldest-first closed candles.
            let mut rows = raw.result.list;
            if !rows.is_empty() {
                rows.remove(0);
            }
            rows.reverse();

            let candles = rows
                .into_iter()
                .map(BybitKlineRow::into_candle)
                .collect::<Result<Vec<_>, _>>()?;

            info!(symbol = %symbol, market = %market, fetched = candles.len(), "bybit ohlcv fetch complete");

            Ok(candles)
        })
    }

    fn fetch_tickers(
        &self,
        market: Market,
    ) -> BoxFuture<'_, Result<Vec<(String, TickerSnapshot)>, Report<ExchangeError>>> {
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{}/v5/market/tickers", self.rest_base);
            let params = [("category", Self::category(market))];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(ExchangeError::Request {
                    exchange: "bybit".into(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(ExchangeError::Request {
                    exchange: "bybit".into(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }

            let raw: BybitTickersResponse =
                response
                    .json()
                    .await
                    .change_context(ExchangeError::ResponseParse {
                        exchange: "bybit".into(),
                    })?;

            if raw.ret_code != 0 {
                return Err(Report::new(ExchangeError::Protocol {
                    exchange: "bybit".into(),
                    reason: raw.ret_msg,
                }));
            }

            let now = crate::clock::now();
            let snapshots = raw
                .result
                .list
                .into_iter()
                .filter_map(|row| row.into_snapshot(now))
                .collect();

            debug!(market = %market, "bybit tickers fetch complete");

            Ok(snapshots)
        })
    }

    fn trading_url(&self, symbol: &str, market: Market) -> String {
        let clean = symbol.replace(":USDT", "");
        match market {
            Market::Spot => format!("https://www.bybit.com/trade/spot/{clean}"),
            Market::Futures => {
                let pair = clean.replace('/', "");
                format!("https://www.bybit.com/trade/usdt/{pair}")
            }
        }
    }
}

async fn run_ticker_ws(
    ws_url: &str,
    symbol: &str,
    market: Market,
    tx: &mpsc::Sender<TickerEvent>,
    cancel: &CancellationToken,
) -> Result<(), Report<ExchangeError>> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .change_context(ExchangeError::Connection {
            exchange: "bybit".into(),
        })?;

    let (mut write, mut read) = ws_stream.split();

    let topic = format!("tickers.{}", to_bybit_symbol(symbol));
    let subscribe = serde_json::json!({ "op": "subscribe", "args": [topic] }).to_string();
    write
        .send(Message::Text(subscribe.into()))
        .await
        .change_context(ExchangeError::Connection {
            exchange: "bybit".into(),
        })?;

    info!(symbol = %symbol, market = %market, "bybit ticker ws connected");

    // Bybit expects an application-level ping at least every 20s or the
    // connection gets dropped.
    let mut ping_interval = tokio::time::interval(Duration::from_secs(20));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("bybit ticker ws cancelled");
                break;
            }
            _ = ping_interval.tick() => {
                let ping = serde_json::json!({ "op": "ping" }).to_string();
                if write.send(Message::Text(ping.into())).await.is_err() {
                    return Err(Report::new(ExchangeError::Connection {
                        exchange: "bybit".into(),
                    }));
                }
            }
            msg = read.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        return Err(Report::new(e).change_context(ExchangeError::Connection {
                            exchange: "bybit".into(),
                        }));
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_ticker_push(&text, symbol, market) {
                            let _ = tx.send(event).await;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(())
}

/// Parses a `tickers.<symbol>` push frame. Returns `None` for subscribe
/// acks, pong replies and anything without a usable price.
fn parse_ticker_push(text: &str, symbol: &str, market: Market) -> Option<TickerEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let topic = value.get("topic")?.as_str()?;
    if !topic.starts_with("tickers.") {
        return None;
    }

    let data = value.get("data")?;
    let last = data.get("lastPrice")?.as_str()?.parse::<f64>().ok()?;
    let turnover_24h = data
        .get("turnover24h")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let exchange_ts_ms = value.get("ts").and_then(Value::as_i64).unwrap_or(0);

    Some(TickerEvent {
        symbol: symbol.to_owned(),
        market,
        frame: TickerFrame {
            exchange_ts_ms,
            last,
            quote_volume_24h: turnover_24h,
        },
    })
}

#[derive(Debug, Deserialize)]
struct BybitKlineResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: BybitKlineResult,
}

#[derive(Debug, Deserialize)]
struct BybitKlineResult {
    list: Vec<BybitKlineRow>,
}

/// `[start, open, high, low, close, volume, turnover]`, all strings.
#[derive(Debug, Deserialize)]
struct BybitKlineRow(
    String,
    String,
    String,
    String,
    String,
    String,
    #[allow(dead_code)] String,
);

impl BybitKlineRow {
    fn into_candle(self) -> Result<Candle, Report<ExchangeError>> {
        let parse_f64 = |s: &str| -> Result<f64, Report<ExchangeError>> {
            s.parse::<f64>().change_context(ExchangeError::ResponseParse {
                exchange: "bybit".into(),
            })
        };
        let start_ms: i64 = self.0.parse().change_context(ExchangeError::ResponseParse {
            exchange: "bybit".into(),
        })?;

        Ok(Candle {
            timestamp: start_ms / 1000,
            open: parse_f64(&self.1)?,
            high: parse_f64(&self.2)?,
            low: parse_f64(&self.3)?,
            close: parse_f64(&self.4)?,
            volume: parse_f64(&self.5)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BybitTickersResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: BybitTickersResult,
}

#[derive(Debug, Deserialize)]
struct BybitTickersResult {
    list: Vec<BybitTickerRow>,
}

#[derive(Debug, Deserialize)]
struct BybitTickerRow {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "turnover24h")]
    turnover_24h: String,
}

impl BybitTickerRow {
    fn into_snapshot(self, now: i64) -> Option<(String, TickerSnapshot)> {
        let last_price = self.last_price.parse::<f64>().ok()?;
        let turnover_24h = self.turnover_24h.parse::<f64>().unwrap_or(0.0);
        Some((
            self.symbol,
            TickerSnapshot {
                volume_24h: turnover_24h,
                last_price,
                updated_at: now,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bybit_symbol_strips_slash() {
        assert_eq!(to_bybit_symbol("BTC/USDT"), "BTCUSDT");
    }

    #[test]
    fn kline_row_parses_into_candle() {
        let row = BybitKlineRow(
            "1704067200000".into(),
            "42000.0".into(),
            "43000.0".into(),
            "41500.0".into(),
            "42500.0".into(),
            "100.5".into(),
            "4250000.0".into(),
        );
        let candle = row.into_candle().unwrap();
        assert_eq!(candle.timestamp, 1704067200);
        assert_eq!(candle.open, 42000.0);
        assert_eq!(candle.close, 42500.0);
        assert_eq!(candle.volume, 100.5);
    }

    #[test]
    fn trading_url_spot_keeps_slash() {
        let exchange = BybitExchange::new(false, 10_000, 5);
        assert_eq!(
            exchange.trading_url("BTC/USDT", Market::Spot),
            "https://www.bybit.com/trade/spot/BTC/USDT"
        );
    }

    #[test]
    fn trading_url_futures_strips_suffix_and_slash() {
        let exchange = BybitExchange::new(false, 10_000, 5);
        assert_eq!(
            exchange.trading_url("BTC/USDT:USDT", Market::Futures),
            "https://www.bybit.com/trade/usdt/BTCUSDT"
        );
    }

    #[test]
    fn ticker_push_parses_last_price_and_turnover() {
        let text = serde_json::json!({
            "topic": "tickers.BTCUSDT",
            "ts": 1704067200000i64,
            "data": {
                "symbol": "BTCUSDT",
                "lastPrice": "42500.5",
                "turnover24h": "123456.0"
            }
        })
        .to_string();

        let event = parse_ticker_push(&text, "BTC/USDT", Market::Spot).unwrap();
        assert_eq!(event.symbol, "BTC/USDT");
        assert_eq!(event.frame.last, 42500.5);
        assert_eq!(event.frame.quote_volume_24h, 123456.0);
        assert_eq!(event.frame.exchange_ts_ms, 1704067200000);
    }

    #[test]
    fn non_ticker_frames_are_ignored() {
        let text = serde_json::json!({ "op": "pong" }).to_string();
        assert!(parse_ticker_push(&text, "BTC/USDT", Market::Spot).is_none());
    }
}
