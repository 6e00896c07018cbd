mod builder;
mod cache;
mod chart;
mod config;
mod error;
mod exchange;
mod fanout;
mod filters;
mod http;
mod manager;
mod model;
mod notifier;
mod store;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use exchange::bybit::BybitExchange;
use exchange::Exchange;
use fanout::TriggerSink;
use model::Market;
use notifier::log::LogNotifier;
use notifier::telegram::TelegramNotifier;
use notifier::{CompositeNotifier, Notifier};
use store::sqlite::SqliteStore;
use store::Store;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("runtime error")]
    Runtime,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let config_path = std::env::var("SCREENER_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = config::load(Path::new(&config_path)).change_context(AppError::Config)?;

    init_tracing(&config);

    let store = open_store(&config).await?;
    let cache = Arc::new(cache::Cache::new());
    let chart = Arc::new(chart::ChartHub::new());

    let exchange: Arc<dyn Exchange> = Arc::new(BybitExchange::new(
        config.exchange.testnet,
        config.exchange.request_timeout_ms,
        config.exchange.rest_requests_per_second,
    ));

    let notifier = build_notifier(&config);
    let sink = Arc::new(TriggerSink::new(
        store.clone(),
        cache.clone(),
        chart.clone(),
        notifier.clone(),
    ));

    let manager = manager::Manager::new(
        exchange,
        store.clone(),
        cache.clone(),
        chart.clone(),
        sink,
        config.screener.cooldown_minutes as i64,
        config.screener.check_interval_seconds,
        config.screener.candle_keep_hours as i64,
        config.screener.trigger_keep_days as i64,
    );

    let mut markets = Vec::new();
    if config.exchange.parse_spot {
        markets.push(Market::Spot);
    }
    if config.exchange.parse_futures {
        markets.push(Market::Futures);
    }

    let cancel = CancellationToken::new();

    let manager_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            manager.run(&markets, cancel).await;
        })
    };

    let settings = Arc::new(RwLock::new(http::Settings {
        check_interval_seconds: config.screener.check_interval_seconds,
        cooldown_minutes: config.screener.cooldown_minutes,
        parse_spot: config.exchange.parse_spot,
        parse_futures: config.exchange.parse_futures,
        telegram_configured: config.telegram.is_configured(),
    }));

    let app_state = http::AppState {
        store,
        cache,
        chart,
        notifier,
        settings,
    };
    let router = http::build_router(app_state);
    let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .change_context(AppError::Runtime)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .change_context(AppError::Runtime)
        .attach_with(|| format!("addr: {addr}"))?;

    info!(%addr, "http api listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = ?err, "http server exited with an error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    info!("ctrl+c received, shutting down");
    cancel.cancel();

    for handle in [manager_handle, server_handle] {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn Store>, Report<AppError>> {
    if let Some(parent) = Path::new(&config.general.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .change_context(AppError::Storage)
                .attach_with(|| format!("db_path: {}", config.general.db_path))?;
        }
    }

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(Path::new(&config.general.db_path))
            .await
            .change_context(AppError::Storage)?,
    );
    Ok(store)
}

fn build_notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    let mut channels: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];

    if config.telegram.is_configured() {
        let bot_token = config
            .telegram
            .bot_token
            .clone()
            .expect("checked by is_configured");
        let chat_id = config
            .telegram
            .chat_id
            .clone()
            .expect("checked by is_configured");
        channels.push(Box::new(TelegramNotifier::new(
            reqwest::Client::new(),
            bot_token,
            chat_id,
        )));
    }

    Arc::new(CompositeNotifier::new(channels))
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
