pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::StorageError;
use crate::model::{Candle, Filter, FilterConfig, Market, Trigger, TriggerData};

/// A page of triggers plus the total count matching the same filter, for
/// pagination in the HTTP surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerPage {
    pub triggers: Vec<Trigger>,
    pub total: i64,
}

/// Optional filters accepted by [`Store::get_triggers`].
#[derive(Debug, Clone, Default)]
pub struct TriggerQuery {
    pub filter_id: Option<i64>,
    pub symbol: Option<String>,
    pub market: Option<Market>,
    pub limit: i64,
    pub offset: i64,
}

/// Aggregate counts for the triggers dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerStats {
    pub total_today: i64,
    pub total_week: i64,
    pub total_month: i64,
    pub by_filter: Vec<(i64, String, i64)>,
    pub by_symbol: Vec<(String, i64)>,
}

/// Persistence capability. Uses `BoxFuture` instead of `async fn` in trait
/// so the trait stays object-safe (`dyn Store`).
pub trait Store: Send + Sync {
    fn save_candle(
        &self,
        symbol: &str,
        market: Market,
        candle: &Candle,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn save_candles(
        &self,
        symbol: &str,
        market: Market,
        candles: &[Candle],
    ) -> BoxFuture<'_, Result<usize, Report<StorageError>>>;

    /// Candles for the last `minutes` minutes, oldest first.
    fn get_candles(
        &self,
        symbol: &str,
        market: Market,
        minutes: i64,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>>;

    fn sweep_candles(&self, keep_hours: i64) -> BoxFuture<'_, Result<u64, Report<StorageError>>>;

    fn save_ticker(
        &self,
        symbol: &str,
        market: Market,
        volume_24h: f64,
        last_price: f64,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn symbols_for_market(
        &self,
        market: Market,
    ) -> BoxFuture<'_, Result<Vec<String>, Report<StorageError>>>;

    fn create_filter(
        &self,
        name: &str,
        config: FilterConfig,
        enabled: bool,
    ) -> BoxFuture<'_, Result<Filter, Report<StorageError>>>;

    fn get_filter(&self, id: i64) -> BoxFuture<'_, Result<Option<Filter>, Report<StorageError>>>;

    fn list_filters(
        &self,
        enabled_only: bool,
    ) -> BoxFuture<'_, Result<Vec<Filter>, Report<StorageError>>>;

    fn update_filter(
        &self,
        id: i64,
        name: Option<String>,
        enabled: Option<bool>,
        config: Option<FilterConfig>,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn delete_filter(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Insert a trigger row. `notified` always starts `false` here — unlike
    /// the dashboard export this was adapted from, which marked every row
    /// notified at insert time regardless of whether dispatch actually
    /// happened. Call [`Store::mark_trigger_notified`] once the notifier
    /// capability actually confirms delivery.
    fn save_trigger(
        &self,
        filter_id: i64,
        filter_name: &str,
        symbol: &str,
        market: Market,
        data: &TriggerData,
    ) -> BoxFuture<'_, Result<Trigger, Report<StorageError>>>;

    fn mark_trigger_notified(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn get_triggers(
        &self,
        query: TriggerQuery,
    ) -> BoxFuture<'_, Result<TriggerPage, Report<StorageError>>>;

    fn trigger_stats(&self) -> BoxFuture<'_, Result<TriggerStats, Report<StorageError>>>;

    /// `true` if the filter is allowed to trigger again for (symbol, market)
    /// given `cooldown_minutes`.
    fn check_cooldown(
        &self,
        filter_id: i64,
        symbol: &str,
        market: Market,
        cooldown_minutes: i64,
    ) -> BoxFuture<'_, Result<bool, Report<StorageError>>>;

    fn sweep_triggers(&self, keep_days: i64) -> BoxFuture<'_, Result<u64, Report<StorageError>>>;
}
