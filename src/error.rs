use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum ExchangeError {
    #[display("failed to connect to {exchange}")]
    Connection { exchange: String },
    #[display("request to {exchange} failed")]
    Request { exchange: String },
    #[display("failed to parse response from {exchange}")]
    ResponseParse { exchange: String },
    #[display("{exchange} rejected the request: {reason}")]
    Protocol { exchange: String, reason: String },
    #[display("rate limit exceeded for {exchange}")]
    RateLimit { exchange: String },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("record not found")]
    NotFound,
}

#[derive(Debug, Display, Error)]
pub enum CacheError {
    #[display("no cached data for {symbol} ({market})")]
    Missing { symbol: String, market: String },
}

#[derive(Debug, Display, Error)]
pub enum BuilderError {
    #[display("out-of-order tick for {symbol}: tick minute {tick_minute} < open minute {open_minute}")]
    OutOfOrderTick {
        symbol: String,
        tick_minute: i64,
        open_minute: i64,
    },
}

#[derive(Debug, Display, Error)]
pub enum FilterError {
    #[display("invalid filter config: {field}")]
    Validation { field: String },
    #[display("filter {id} not found")]
    NotFound { id: i64 },
}

#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("failed to send notification via {channel}")]
    Send { channel: String },
    #[display("notifier not configured")]
    NotConfigured,
}

#[derive(Debug, Display, Error)]
pub enum HttpError {
    #[display("bad request: {reason}")]
    BadRequest { reason: String },
    #[display("not found")]
    NotFound,
    #[display("internal error")]
    Internal,
}
