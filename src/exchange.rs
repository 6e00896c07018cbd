pub mod bybit;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ExchangeError;
use crate::model::{Candle, Market, TickerFrame, TickerSnapshot};

/// A ticker update pushed from an exchange's streaming transport, tagged
/// with the (symbol, market) it belongs to.
#[derive(Debug, Clone)]
pub struct TickerEvent {
    pub symbol: String,
    pub market: Market,
    pub frame: TickerFrame,
}

/// Abstraction over a cryptocurrency exchange.
///
/// Uses `BoxFuture` (from the `futures` crate) instead of `async fn` in
/// trait so the trait stays object-safe (`dyn Exchange`).
pub trait Exchange: Send + Sync {
    /// Subscribe to real-time ticker updates via WebSocket for one symbol.
    ///
    /// Sends [`TickerEvent`] values into `tx` until `cancel` is triggered.
    /// Reconnects with backoff on transport failure; only returns once
    /// `cancel` fires or every reconnect attempt is exhausted.
    fn watch_ticker(
        &self,
        symbol: &str,
        market: Market,
        tx: mpsc::Sender<TickerEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<ExchangeError>>>;

    /// Fetch recent closed one-minute candles via REST, used for warm-up and
    /// gap backfill. Never includes the still-forming candle.
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        market: Market,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<ExchangeError>>>;

    /// Fetch the full tickers snapshot for a market, used to discover the
    /// symbol universe and to seed 24h volume at startup.
    fn fetch_tickers(
        &self,
        market: Market,
    ) -> BoxFuture<'_, Result<Vec<(String, TickerSnapshot)>, Report<ExchangeError>>>;

    /// Canonical web URL for a symbol's trading page, embedded in trigger
    /// payloads so a human can jump straight to the chart.
    fn trading_url(&self, symbol: &str, market: Market) -> String;
}
