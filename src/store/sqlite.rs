use std::path::Path;
use std::str::FromStr;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};

use crate::clock;
use crate::error::StorageError;
use crate::model::{Candle, Filter, FilterConfig, Market, Trigger, TriggerData};
use crate::store::{Store, TriggerPage, TriggerQuery, TriggerStats};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Self { pool }
    }
}

fn row_to_candle((timestamp, open, high, low, close, volume): (i64, f64, f64, f64, f64, f64)) -> Candle {
    Candle {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
    }
}

fn row_to_filter(
    (id, name, config_json, enabled, created_at, updated_at): (
        i64,
        String,
        String,
        i64,
        i64,
        Option<i64>,
    ),
) -> Result<Filter, Report<StorageError>> {
    let config: FilterConfig =
        serde_json::from_str(&config_json).change_context(StorageError::Query)?;
    Ok(Filter {
        id,
        name,
        enabled: enabled != 0,
        config,
        created_at,
        updated_at,
    })
}

#[allow(clippy::type_complexity)]
fn row_to_trigger(
    (id, filter_id, filter_name, symbol, market, triggered_at, data_json, notified): (
        i64,
        i64,
        String,
        String,
        String,
        i64,
        String,
        i64,
    ),
) -> Result<Trigger, Report<StorageError>> {
    let market = Market::from_str(&market).ok_or_else(|| {
        Report::new(StorageError::Query).attach(format!("unknown market {market}"))
    })?;
    let data: TriggerData = serde_json::from_str(&data_json).change_context(StorageError::Query)?;
    Ok(Trigger {
        id,
        filter_id,
        filter_name,
        symbol,
        market,
        triggered_at,
        data,
        notified: notified != 0,
    })
}

impl Store for SqliteStore {
    fn save_candle(
        &self,
        symbol: &str,
        market: Market,
        candle: &Candle,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let symbol = symbol.to_owned();
        let candle = *candle;
        Box::pin(async move {
            sqlx::query(
                "INSERT OR REPLACE INTO candles \
                 (symbol, market, timestamp, open, high, low, close, volume) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&symbol)
            .bind(market.to_string())
            .bind(candle.timestamp)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn save_candles(
        &self,
        symbol: &str,
        market: Market,
        candles: &[Candle],
    ) -> BoxFuture<'_, Result<usize, Report<StorageError>>> {
        let symbol = symbol.to_owned();
        let candles = candles.to_vec();
        Box::pin(async move {
            let mut tx = self.pool.begin().await.change_context(StorageError::Insert)?;

            for candle in &candles {
                sqlx::query(
                    "INSERT OR REPLACE INTO candles \
                     (symbol, market, timestamp, open, high, low, close, volume) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&symbol)
                .bind(market.to_string())
                .bind(candle.timestamp)
                .bind(candle.open)
                .bind(candle.high)
                .bind(candle.low)
                .bind(candle.close)
                .bind(candle.volume)
                .execute(&mut *tx)
                .await
                .change_context(StorageError::Insert)?;
            }

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(candles.len())
        })
    }

    fn get_candles(
        &self,
        symbol: &str,
        market: Market,
        minutes: i64,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let cutoff = clock::now() - minutes * 60;
            let rows: Vec<(i64, f64, f64, f64, f64, f64)> = sqlx::query_as(
                "SELECT timestamp, open, high, low, close, volume \
                 FROM candles \
                 WHERE symbol = ? AND market = ? AND timestamp >= ? \
                 ORDER BY timestamp ASC",
            )
            .bind(&symbol)
            .bind(market.to_string())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(rows.into_iter().map(row_to_candle).collect())
        })
    }

    fn sweep_candles(&self, keep_hours: i64) -> BoxFuture<'_, Result<u64, Report<StorageError>>> {
        Box::pin(async move {
            let cutoff = clock::now() - keep_hours * 3600;
            let result = sqlx::query("DELETE FROM candles WHERE timestamp < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Query)?;
            Ok(result.rows_affected())
        })
    }

    fn save_ticker(
        &self,
        symbol: &str,
        market: Market,
        volume_24h: f64,
        last_price: f64,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            sqlx::query(
                "INSERT OR REPLACE INTO tickers \
                 (symbol, market, volume_24h, last_price, updated_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&symbol)
            .bind(market.to_string())
            .bind(volume_24h)
            .bind(last_price)
            .bind(clock::now())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn symbols_for_market(
        &self,
        market: Market,
    ) -> BoxFuture<'_, Result<Vec<String>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT DISTINCT symbol FROM tickers WHERE market = ? ORDER BY volume_24h DESC",
            )
            .bind(market.to_string())
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;
            Ok(rows.into_iter().map(|(s,)| s).collect())
        })
    }

    fn create_filter(
        &self,
        name: &str,
        config: FilterConfig,
        enabled: bool,
    ) -> BoxFuture<'_, Result<Filter, Report<StorageError>>> {
        let name = name.to_owned();
        Box::pin(async move {
            let config_json = serde_json::to_string(&config).change_context(StorageError::Insert)?;
            let created_at = clock::now();

            let result = sqlx::query(
                "INSERT INTO filters (name, type, enabled, config, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&name)
            .bind(config.type_name())
            .bind(enabled as i64)
            .bind(&config_json)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;

            Ok(Filter {
                id: result.last_insert_rowid(),
                name,
                enabled,
                config,
                created_at,
                updated_at: None,
            })
        })
    }

    fn get_filter(&self, id: i64) -> BoxFuture<'_, Result<Option<Filter>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<(i64, String, String, i64, i64, Option<i64>)> = sqlx::query_as(
                "SELECT id, name, config, enabled, created_at, updated_at \
                 FROM filters WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            row.map(row_to_filter).transpose()
        })
    }

    fn list_filters(
        &self,
        enabled_only: bool,
    ) -> BoxFuture<'_, Result<Vec<Filter>, Report<StorageError>>> {
        Box::pin(async move {
            let query = if enabled_only {
                "SELECT id, name, config, enabled, created_at, updated_at \
                 FROM filters WHERE enabled = 1 ORDER BY created_at DESC"
            } else {
                "SELECT id, name, config, enabled, created_at, updated_at \
                 FROM filters ORDER BY created_at DESC"
            };

            let rows: Vec<(i64, String, String, i64, i64, Option<i64>)> =
                sqlx::query_as(query)
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;

            rows.into_iter().map(row_to_filter).collect()
        })
    }

    fn update_filter(
        &self,
        id: i64,
        name: Option<String>,
        enabled: Option<bool>,
        config: Option<FilterConfig>,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            let mut sets = Vec::new();
            if name.is_some() {
                sets.push("name = ?");
            }
            if enabled.is_some() {
                sets.push("enabled = ?");
            }
            if config.is_some() {
                sets.push("config = ?");
            }
            if sets.is_empty() {
                return Ok(());
            }
            sets.push("updated_at = ?");

            let query = format!("UPDATE filters SET {} WHERE id = ?", sets.join(", "));
            let mut q = sqlx::query(&query);
            if let Some(name) = &name {
                q = q.bind(name);
            }
            if let Some(enabled) = enabled {
                q = q.bind(enabled as i64);
            }
            let config_json = match &config {
                Some(c) => Some(serde_json::to_string(c).change_context(StorageError::Insert)?),
                None => None,
            };
            if let Some(config_json) = &config_json {
                q = q.bind(config_json);
            }
            q = q.bind(clock::now()).bind(id);

            q.execute(&self.pool).await.change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn delete_filter(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM filters WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn save_trigger(
        &self,
        filter_id: i64,
        filter_name: &str,
        symbol: &str,
        market: Market,
        data: &TriggerData,
    ) -> BoxFuture<'_, Result<Trigger, Report<StorageError>>> {
        let filter_name = filter_name.to_owned();
        let symbol = symbol.to_owned();
        let data = data.clone();
        Box::pin(async move {
            let data_json = serde_json::to_string(&data).change_context(StorageError::Insert)?;
            let triggered_at = clock::now();

            let result = sqlx::query(
                "INSERT INTO filter_triggers \
                 (filter_id, filter_name, symbol, market, triggered_at, data, notified) \
                 VALUES (?, ?, ?, ?, ?, ?, 0)",
            )
            .bind(filter_id)
            .bind(&filter_name)
            .bind(&symbol)
            .bind(market.to_string())
            .bind(triggered_at)
            .bind(&data_json)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;

            Ok(Trigger {
                id: result.last_insert_rowid(),
                filter_id,
                filter_name,
                symbol,
                market,
                triggered_at,
                data,
                notified: false,
            })
        })
    }

    fn mark_trigger_notified(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            sqlx::query("UPDATE filter_triggers SET notified = 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn get_triggers(
        &self,
        query: TriggerQuery,
    ) -> BoxFuture<'_, Result<TriggerPage, Report<StorageError>>> {
        Box::pin(async move {
            let mut where_clauses = Vec::new();
            if query.filter_id.is_some() {
                where_clauses.push("filter_id = ?");
            }
            if query.symbol.is_some() {
                where_clauses.push("symbol = ?");
            }
            if query.market.is_some() {
                where_clauses.push("market = ?");
            }
            let where_sql = if where_clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", where_clauses.join(" AND "))
            };

            macro_rules! bind_filters {
                ($q:expr) => {{
                    let mut q = $q;
                    if let Some(filter_id) = query.filter_id {
                        q = q.bind(filter_id);
                    }
                    if let Some(symbol) = &query.symbol {
                        q = q.bind(symbol);
                    }
                    if let Some(market) = query.market {
                        q = q.bind(market.to_string());
                    }
                    q
                }};
            }

            let count_query = format!("SELECT COUNT(*) FROM filter_triggers {where_sql}");
            let total: (i64,) = bind_filters!(sqlx::query_as(&count_query))
                .fetch_one(&self.pool)
                .await
                .change_context(StorageError::Query)?;

            let select_query = format!(
                "SELECT id, filter_id, filter_name, symbol, market, triggered_at, data, notified \
                 FROM filter_triggers {where_sql} \
                 ORDER BY triggered_at DESC LIMIT ? OFFSET ?"
            );
            let limit = if query.limit > 0 { query.limit } else { 100 };
            #[allow(clippy::type_complexity)]
            let rows: Vec<(i64, i64, String, String, String, i64, String, i64)> =
                bind_filters!(sqlx::query_as(&select_query))
                    .bind(limit)
                    .bind(query.offset)
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;

            let triggers = rows
                .into_iter()
                .map(row_to_trigger)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(TriggerPage {
                triggers,
                total: total.0,
            })
        })
    }

    fn trigger_stats(&self) -> BoxFuture<'_, Result<TriggerStats, Report<StorageError>>> {
        Box::pin(async move {
            let now = clock::now();
            let today_cutoff = now - 24 * 3600;
            let week_cutoff = now - 7 * 24 * 3600;
            let month_cutoff = now - 30 * 24 * 3600;

            let count_since = |cutoff: i64| {
                sqlx::query_as::<_, (i64,)>(
                    "SELECT COUNT(*) FROM filter_triggers WHERE triggered_at >= ?",
                )
                .bind(cutoff)
            };

            let total_today: (i64,) = count_since(today_cutoff)
                .fetch_one(&self.pool)
                .await
                .change_context(StorageError::Query)?;
            let total_week: (i64,) = count_since(week_cutoff)
                .fetch_one(&self.pool)
                .await
                .change_context(StorageError::Query)?;
            let total_month: (i64,) = count_since(month_cutoff)
                .fetch_one(&self.pool)
                .await
                .change_context(StorageError::Query)?;

            let by_filter: Vec<(i64, String, i64)> = sqlx::query_as(
                "SELECT filter_id, filter_name, COUNT(*) \
                 FROM filter_triggers WHERE triggered_at >= ? \
                 GROUP BY filter_id, filter_name ORDER BY COUNT(*) DESC",
            )
            .bind(month_cutoff)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            let by_symbol: Vec<(String, i64)> = sqlx::query_as(
                "SELECT symbol, COUNT(*) \
                 FROM filter_triggers WHERE triggered_at >= ? \
                 GROUP BY symbol ORDER BY COUNT(*) DESC",
            )
            .bind(month_cutoff)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(TriggerStats {
                total_today: total_today.0,
                total_week: total_week.0,
                total_month: total_month.0,
                by_filter,
                by_symbol,
            })
        })
    }

    fn check_cooldown(
        &self,
        filter_id: i64,
        symbol: &str,
        market: Market,
        cooldown_minutes: i64,
    ) -> BoxFuture<'_, Result<bool, Report<StorageError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let cutoff = clock::now() - cooldown_minutes * 60;
            let row: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM filter_triggers \
                 WHERE filter_id = ? AND symbol = ? AND market = ? AND triggered_at > ?",
            )
            .bind(filter_id)
            .bind(&symbol)
            .bind(market.to_string())
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(row.0 == 0)
        })
    }

    fn sweep_triggers(&self, keep_days: i64) -> BoxFuture<'_, Result<u64, Report<StorageError>>> {
        Box::pin(async move {
            let cutoff = clock::now() - keep_days * 24 * 3600;
            let result = sqlx::query("DELETE FROM filter_triggers WHERE triggered_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Query)?;
            Ok(result.rows_affected())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, PriceChangeConfig};
    use std::collections::HashSet;

    fn make_candle(timestamp: i64, close: f64) -> Candle {
        Candle {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn price_change_config() -> FilterConfig {
        FilterConfig::PriceChange(PriceChangeConfig {
            market: Market::Spot,
            interval_minutes: 15,
            min_price_change_percent: 5.0,
            direction: Direction::Up,
            min_volume_period: 0.0,
            min_volume_24h: 0.0,
            max_volume_24h: None,
            exclude_coins: HashSet::new(),
            comment: String::new(),
        })
    }

    #[tokio::test]
    async fn save_and_query_candles_ascending() {
        let store = SqliteStore::in_memory().await;
        let now = clock::now();
        let candles = vec![make_candle(now - 120, 100.0), make_candle(now - 60, 110.0)];
        store.save_candles("BTC/USDT", Market::Spot, &candles).await.unwrap();

        let result = store.get_candles("BTC/USDT", Market::Spot, 10).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].close, 100.0);
        assert_eq!(result[1].close, 110.0);
    }

    #[tokio::test]
    async fn save_candle_is_idempotent_on_timestamp() {
        let store = SqliteStore::in_memory().await;
        let now = clock::now();
        store.save_candle("BTC/USDT", Market::Spot, &make_candle(now, 100.0)).await.unwrap();
        store.save_candle("BTC/USDT", Market::Spot, &make_candle(now, 200.0)).await.unwrap();

        let result = store.get_candles("BTC/USDT", Market::Spot, 10).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].close, 200.0);
    }

    #[tokio::test]
    async fn filter_crud_round_trip() {
        let store = SqliteStore::in_memory().await;
        let filter = store
            .create_filter("pump-watch", price_change_config(), true)
            .await
            .unwrap();
        assert!(filter.id > 0);

        let fetched = store.get_filter(filter.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "pump-watch");

        store
            .update_filter(filter.id, Some("renamed".into()), Some(false), None)
            .await
            .unwrap();
        let updated = store.get_filter(filter.id).await.unwrap().unwrap();
        assert_eq!(updated.name, "renamed");
        assert!(!updated.enabled);

        store.delete_filter(filter.id).await.unwrap();
        assert!(store.get_filter(filter.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trigger_save_starts_unnotified_then_can_be_marked() {
        let store = SqliteStore::in_memory().await;
        let filter = store
            .create_filter("pump-watch", price_change_config(), true)
            .await
            .unwrap();

        let trigger = store
            .save_trigger(filter.id, &filter.name, "BTC/USDT", Market::Spot, &TriggerData::default())
            .await
            .unwrap();
        assert!(!trigger.notified);

        store.mark_trigger_notified(trigger.id).await.unwrap();
        let page = store
            .get_triggers(TriggerQuery {
                filter_id: Some(filter.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.triggers[0].notified);
    }

    #[tokio::test]
    async fn cooldown_blocks_until_window_elapses() {
        let store = SqliteStore::in_memory().await;
        let filter = store
            .create_filter("pump-watch", price_change_config(), true)
            .await
            .unwrap();

        assert!(
            store
                .check_cooldown(filter.id, "BTC/USDT", Market::Spot, 15)
                .await
                .unwrap()
        );

        store
            .save_trigger(filter.id, &filter.name, "BTC/USDT", Market::Spot, &TriggerData::default())
            .await
            .unwrap();

        assert!(
            !store
                .check_cooldown(filter.id, "BTC/USDT", Market::Spot, 15)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn sweep_candles_removes_rows_older_than_window() {
        let store = SqliteStore::in_memory().await;
        let now = clock::now();
        store
            .save_candles(
                "BTC/USDT",
                Market::Spot,
                &[make_candle(now - 3 * 3600, 100.0), make_candle(now - 60, 110.0)],
            )
            .await
            .unwrap();

        let deleted = store.sweep_candles(2).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.get_candles("BTC/USDT", Market::Spot, 10_000).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
