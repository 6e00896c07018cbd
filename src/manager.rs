use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use error_stack::Report;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::CandleBuilder;
use crate::cache::Cache;
use crate::chart::{ChartHub, ConnectionStatus};
use crate::clock;
use crate::exchange::{Exchange, TickerEvent};
use crate::fanout::TriggerSink;
use crate::model::{Candle, Market, TickerSnapshot};
use crate::store::Store;

const WARM_UP_BATCH_SIZE: usize = 10;
const WARM_UP_BATCH_DELAY: Duration = Duration::from_millis(500);
const WARM_UP_CANDLE_COUNT: usize = 120;
const MAX_WATCHER_ERRORS: u32 = 5;
const MAX_WATCHER_BACKOFF_SECS: u64 = 60;
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

type SymbolKey = (String, Market);

struct Shared {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn Store>,
    cache: Arc<Cache>,
    chart: Arc<ChartHub>,
    sink: Arc<TriggerSink>,
    builders: DashMap<SymbolKey, Arc<Mutex<CandleBuilder>>>,
    tickers: DashMap<SymbolKey, TickerSnapshot>,
    cooldown_minutes: i64,
    check_delay_seconds: u64,
    candle_keep_hours: i64,
    trigger_keep_days: i64,
}

/// Turns a set of (symbol, market) pairs into a flow of persisted candles and
/// filter evaluations, aligned to wall-clock minutes.
///
/// Owns no state directly — everything lives in [`Shared`] behind an `Arc` so
/// watcher tasks, the minute scheduler, and the sweep loop can all hold a
/// handle without a central lock.
pub struct Manager {
    shared: Arc<Shared>,
}

impl Manager {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn Store>,
        cache: Arc<Cache>,
        chart: Arc<ChartHub>,
        sink: Arc<TriggerSink>,
        cooldown_minutes: i64,
        check_delay_seconds: u64,
        candle_keep_hours: i64,
        trigger_keep_days: i64,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                exchange,
                store,
                cache,
                chart,
                sink,
                builders: DashMap::new(),
                tickers: DashMap::new(),
                cooldown_minutes,
                check_delay_seconds,
                candle_keep_hours,
                trigger_keep_days,
            }),
        }
    }

    /// Discover the symbol universe for `markets`, warm up each pair from
    /// REST history, start its watcher, and run the minute scheduler and
    /// background sweeps until `cancel` fires.
    pub async fn run(&self, markets: &[Market], cancel: CancellationToken) {
        let mut pairs = Vec::new();
        for &market in markets {
            match self.shared.exchange.fetch_tickers(market).await {
                Ok(snapshots) => {
                    for (symbol, snapshot) in snapshots {
                        self.shared.tickers.insert((symbol.clone(), market), snapshot);
                        pairs.push((symbol, market));
                    }
                }
                Err(err) => {
                    warn!(error = ?err, market = %market, "failed to discover symbol universe");
                }
            }
        }
        info!(pairs = pairs.len(), "symbol universe discovered");

        let mut watcher_handles = Vec::new();
        for batch in pairs.chunks(WARM_UP_BATCH_SIZE) {
            let warm_ups = batch.iter().cloned().map(|(symbol, market)| {
                let shared = self.shared.clone();
                async move {
                    warm_up_pair(&shared, &symbol, market).await;
                }
            });
            join_all(warm_ups).await;

            for (symbol, market) in batch.iter().cloned() {
                let shared = self.shared.clone();
                let watcher_cancel = cancel.clone();
                watcher_handles.push(tokio::spawn(async move {
                    run_watcher(shared, symbol, market, watcher_cancel).await;
                }));
            }

            if !cancel.is_cancelled() {
                sleep(WARM_UP_BATCH_DELAY).await;
            }
        }

        let scheduler_handle = {
            let shared = self.shared.clone();
            let scheduler_cancel = cancel.clone();
            tokio::spawn(async move {
                run_minute_scheduler(shared, scheduler_cancel).await;
            })
        };

        let sweep_handle = {
            let shared = self.shared.clone();
            let sweep_cancel = cancel.clone();
            tokio::spawn(async move {
                run_sweeps(shared, sweep_cancel).await;
            })
        };

        cancel.cancelled().await;
        self.shared.chart.broadcast_status(ConnectionStatus::Offline);

        for handle in watcher_handles
            .into_iter()
            .chain([scheduler_handle, sweep_handle])
        {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

async fn warm_up_pair(shared: &Arc<Shared>, symbol: &str, market: Market) {
    match shared
        .exchange
        .fetch_ohlcv(symbol, market, WARM_UP_CANDLE_COUNT)
        .await
    {
        Ok(candles) => {
            if let Err(err) = shared.store.save_candles(symbol, market, &candles).await {
                warn!(error = ?err, symbol, market = %market, "failed to persist warm-up candles");
            }
            shared.cache.bulk_load_candles(symbol, market, candles);
        }
        Err(err) => {
            warn!(error = ?err, symbol, market = %market, "warm-up backfill failed");
        }
    }
}

async fn run_watcher(shared: Arc<Shared>, symbol: String, market: Market, cancel: CancellationToken) {
    shared
        .builders
        .entry((symbol.clone(), market))
        .or_insert_with(|| Arc::new(Mutex::new(CandleBuilder::new())));

    let mut consecutive_errors: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let (tx, mut rx) = mpsc::channel::<TickerEvent>(256);
        let exchange = shared.exchange.clone();
        let sym = symbol.clone();
        let watch_cancel = cancel.clone();

        let watch_fut = async move { exchange.watch_ticker(&sym, market, tx, watch_cancel).await };
        let process_shared = shared.clone();
        let process_symbol = symbol.clone();
        let process_fut = async move {
            while let Some(event) = rx.recv().await {
                process_tick(&process_shared, &process_symbol, market, event).await;
            }
        };

        let (watch_result, ()) = tokio::join!(watch_fut, process_fut);

        match watch_result {
            Ok(()) => break,
            Err(err) => {
                consecutive_errors += 1;
                warn!(error = ?err, symbol, market = %market, attempt = consecutive_errors, "watcher session ended with an error");
                if consecutive_errors >= MAX_WATCHER_ERRORS {
                    warn!(symbol, market = %market, "retiring watcher after too many consecutive errors");
                    break;
                }
                let backoff = Duration::from_secs(2u64.saturating_pow(consecutive_errors).min(MAX_WATCHER_BACKOFF_SECS));
                sleep(backoff).await;
            }
        }
    }
}

async fn process_tick(shared: &Arc<Shared>, symbol: &str, market: Market, event: TickerEvent) {
    let snapshot = TickerSnapshot {
        volume_24h: event.frame.quote_volume_24h,
        last_price: event.frame.last,
        updated_at: clock::now(),
    };
    shared.tickers.insert((symbol.to_owned(), market), snapshot);

    if let Err(err) = shared
        .store
        .save_ticker(symbol, market, event.frame.quote_volume_24h, event.frame.last)
        .await
    {
        warn!(error = ?err, symbol, market = %market, "failed to persist ticker");
    }

    detect_and_backfill_gap(shared, symbol, market, &event);

    let builder = shared
        .builders
        .entry((symbol.to_owned(), market))
        .or_insert_with(|| Arc::new(Mutex::new(CandleBuilder::new())))
        .clone();

    // Only folds the tick into the builder. Closed candles are only ever
    // read out by the minute scheduler's `finalize` tick, so every symbol's
    // candle close and filter evaluation line up on the same wall-clock
    // boundary instead of scattering across whenever each symbol's next
    // tick happens to arrive.
    let mut builder = builder.lock().await;
    builder.update(&event);
}

fn detect_and_backfill_gap(shared: &Arc<Shared>, symbol: &str, market: Market, event: &TickerEvent) {
    let Some(last) = shared.cache.candles(symbol, market).into_iter().last() else {
        return;
    };
    let tick_minute = clock::minute_of(event.frame.exchange_ts_ms / 1000);
    if (tick_minute - last.timestamp) / 60 <= 1 {
        return;
    }

    let shared = shared.clone();
    let symbol = symbol.to_owned();
    tokio::spawn(async move {
        warm_up_pair(&shared, &symbol, market).await;
    });
}

async fn handle_closed_candle(shared: &Arc<Shared>, symbol: &str, market: Market, candle: Candle) {
    if let Err(err) = shared.store.save_candle(symbol, market, &candle).await {
        warn!(error = ?err, symbol, market = %market, "failed to persist closed candle");
    }
    shared.cache.update_candle(symbol, market, candle);
    shared.chart.broadcast_candle_update(symbol, market, candle);

    if let Err(err) = evaluate_symbol(shared, symbol, market).await {
        warn!(error = ?err, symbol, market = %market, "filter evaluation failed");
    }
}

async fn evaluate_symbol(
    shared: &Arc<Shared>,
    symbol: &str,
    market: Market,
) -> Result<(), Report<crate::error::StorageError>> {
    let filters = shared.store.list_filters(true).await?;
    if filters.is_empty() {
        return Ok(());
    }

    let candles = shared.cache.candles(symbol, market);
    let ticker = shared.tickers.get(&(symbol.to_owned(), market)).map(|r| *r);
    let url = shared.exchange.trading_url(symbol, market);

    for filter in &filters {
        let data = crate::filters::evaluate_with_gates(
            shared.store.as_ref(),
            filter,
            symbol,
            market,
            &candles,
            ticker.as_ref(),
            url.clone(),
            shared.cooldown_minutes,
        )
        .await?;

        if let Some(data) = data {
            shared.sink.dispatch(filter, symbol, market, data).await?;
        }
    }

    Ok(())
}

async fn run_minute_scheduler(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let now = clock::now();
        let next_boundary = clock::minute_of(now) + 60 + shared.check_delay_seconds as i64;
        let wait = (next_boundary - now).max(1) as u64;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(Duration::from_secs(wait)) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        let closed_minute = clock::minute_of(clock::now()) - 60;
        for entry in shared.builders.iter() {
            let (symbol, market) = entry.key().clone();
            let builder = entry.value().clone();
            let closed = {
                let builder = builder.lock().await;
                builder.finalize(closed_minute)
            };
            if let Some(candle) = closed {
                handle_closed_candle(&shared, &symbol, market, candle).await;
            }
        }
    }
}

async fn run_sweeps(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(SWEEP_INTERVAL) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        match shared.store.sweep_candles(shared.candle_keep_hours).await {
            Ok(deleted) => info!(deleted, "swept old candles"),
            Err(err) => warn!(error = ?err, "candle sweep failed"),
        }

        match shared.store.sweep_triggers(shared.trigger_keep_days).await {
            Ok(deleted) => info!(deleted, "swept old triggers"),
            Err(err) => warn!(error = ?err, "trigger sweep failed"),
        }
    }
}
