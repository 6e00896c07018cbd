pub mod price_change;
pub mod volume_spike;

use error_stack::Report;

use crate::error::StorageError;
use crate::model::{Candle, Filter, FilterConfig, Market, TickerSnapshot, TriggerData};
use crate::store::Store;

/// Evaluate one filter's predicate against a symbol's candle window and
/// latest ticker snapshot. Does not consult cooldown or exclusion — see
/// [`evaluate_with_gates`] for the full check a symbol sweep should run.
pub fn evaluate(
    filter: &Filter,
    candles: &[Candle],
    ticker: Option<&TickerSnapshot>,
    url: String,
) -> Option<TriggerData> {
    match &filter.config {
        FilterConfig::PriceChange(config) => price_change::evaluate(config, candles, ticker, url),
        FilterConfig::VolumeSpike(config) => volume_spike::evaluate(config, candles, ticker, url),
    }
}

/// Full per-symbol check: market match, exclusion list, predicate, then
/// cooldown — in that order, since cooldown is the only gate that needs a
/// database round trip and the others are free.
pub async fn evaluate_with_gates(
    store: &dyn Store,
    filter: &Filter,
    symbol: &str,
    market: Market,
    candles: &[Candle],
    ticker: Option<&TickerSnapshot>,
    url: String,
    cooldown_minutes: i64,
) -> Result<Option<TriggerData>, Report<StorageError>> {
    if !filter.enabled {
        return Ok(None);
    }
    if filter.config.market() != market {
        return Ok(None);
    }
    if filter.config.excludes(symbol) {
        return Ok(None);
    }

    let Some(data) = evaluate(filter, candles, ticker, url) else {
        return Ok(None);
    };

    let can_trigger = store
        .check_cooldown(filter.id, symbol, market, cooldown_minutes)
        .await?;
    if !can_trigger {
        return Ok(None);
    }

    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, PriceChangeConfig};
    use std::collections::HashSet;

    fn filter_with(config: FilterConfig, enabled: bool) -> Filter {
        Filter {
            id: 1,
            name: "test".into(),
            enabled,
            config,
            created_at: 0,
            updated_at: None,
        }
    }

    fn price_change_config() -> PriceChangeConfig {
        PriceChangeConfig {
            market: Market::Spot,
            interval_minutes: 5,
            min_price_change_percent: 1.0,
            direction: Direction::Up,
            min_volume_period: 0.0,
            min_volume_24h: 0.0,
            max_volume_24h: None,
            exclude_coins: HashSet::new(),
            comment: String::new(),
        }
    }

    #[test]
    fn dispatch_routes_to_price_change() {
        let filter = filter_with(FilterConfig::PriceChange(price_change_config()), true);
        let candles: Vec<Candle> = (0..5)
            .map(|i| Candle {
                timestamp: i * 60,
                open: 100.0 + i as f64,
                high: 100.0 + i as f64,
                low: 100.0 + i as f64,
                close: 100.0 + i as f64,
                volume: 1.0,
            })
            .collect();

        let result = evaluate(&filter, &candles, None, "https://example.com".into());
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn gates_reject_disabled_filters_without_touching_the_store() {
        use crate::store::sqlite::SqliteStore;

        let store = SqliteStore::in_memory().await;

        let filter = filter_with(FilterConfig::PriceChange(price_change_config()), false);
        let candles: Vec<Candle> = (0..5)
            .map(|i| Candle {
                timestamp: i * 60,
                open: 100.0,
                high: 105.0,
                low: 95.0,
                close: 110.0,
                volume: 1.0,
            })
            .collect();

        let result = evaluate_with_gates(
            &store,
            &filter,
            "BTC/USDT",
            Market::Spot,
            &candles,
            None,
            String::new(),
            15,
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn gates_reject_wrong_market() {
        use crate::store::sqlite::SqliteStore;

        let store = SqliteStore::in_memory().await;

        let filter = filter_with(FilterConfig::PriceChange(price_change_config()), true);
        let candles: Vec<Candle> = (0..5)
            .map(|i| Candle {
                timestamp: i * 60,
                open: 100.0 + i as f64,
                high: 100.0 + i as f64,
                low: 100.0 + i as f64,
                close: 100.0 + i as f64,
                volume: 1.0,
            })
            .collect();

        let result = evaluate_with_gates(
            &store,
            &filter,
            "BTC/USDT",
            Market::Futures,
            &candles,
            None,
            String::new(),
            15,
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }
}
