use dashmap::DashMap;

use crate::clock;
use crate::model::{Candle, Market, TriggerMark};

const MAX_CANDLES_IN_CACHE: usize = 120;
const TRIGGER_MARK_TTL_SECS: i64 = 7_200;

fn key(symbol: &str, market: Market) -> (String, Market) {
    (symbol.to_owned(), market)
}

/// Rolling in-memory view of the most recent candles and filter matches per
/// (symbol, market). Feeds the chart WebSocket surface without round-tripping
/// through SQLite on every request; the database stays the durable copy.
///
/// Each (symbol, market) pair gets its own entry in a [`DashMap`] so readers
/// and writers for different symbols never contend on the same lock.
pub struct Cache {
    candles: DashMap<(String, Market), Vec<Candle>>,
    trigger_marks: DashMap<(String, Market), Vec<TriggerMark>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            candles: DashMap::new(),
            trigger_marks: DashMap::new(),
        }
    }

    pub fn candles(&self, symbol: &str, market: Market) -> Vec<Candle> {
        self.candles
            .get(&key(symbol, market))
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Insert or replace the candle at `candle.timestamp`, keeping the
    /// series sorted ascending and capped at [`MAX_CANDLES_IN_CACHE`].
    pub fn update_candle(&self, symbol: &str, market: Market, candle: Candle) {
        let mut entry = self.candles.entry(key(symbol, market)).or_default();

        match entry.iter_mut().find(|c| c.timestamp == candle.timestamp) {
            Some(existing) => *existing = candle,
            None => {
                entry.push(candle);
                entry.sort_by_key(|c| c.timestamp);
            }
        }

        if entry.len() > MAX_CANDLES_IN_CACHE {
            let excess = entry.len() - MAX_CANDLES_IN_CACHE;
            entry.drain(0..excess);
        }
    }

    /// Replace the whole series for (symbol, market), e.g. after a warm-up
    /// load from the database. Keeps only the most recent
    /// [`MAX_CANDLES_IN_CACHE`] entries.
    pub fn bulk_load_candles(&self, symbol: &str, market: Market, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        if candles.len() > MAX_CANDLES_IN_CACHE {
            let excess = candles.len() - MAX_CANDLES_IN_CACHE;
            candles.drain(0..excess);
        }
        self.candles.insert(key(symbol, market), candles);
    }

    /// All (symbol, market) pairs currently tracked.
    pub fn symbols(&self) -> Vec<(String, Market)> {
        self.candles.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn trigger_marks(&self, symbol: &str, market: Market) -> Vec<TriggerMark> {
        self.trigger_marks
            .get(&key(symbol, market))
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Record a trigger mark and prune marks older than
    /// [`TRIGGER_MARK_TTL_SECS`].
    pub fn add_trigger_mark(&self, symbol: &str, market: Market, mark: TriggerMark) {
        let mut entry = self.trigger_marks.entry(key(symbol, market)).or_default();
        entry.push(mark);
        let cutoff = clock::now() - TRIGGER_MARK_TTL_SECS;
        entry.retain(|m| m.timestamp > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn update_candle_inserts_sorted() {
        let cache = Cache::new();
        cache.update_candle("BTC/USDT", Market::Spot, candle(180, 3.0));
        cache.update_candle("BTC/USDT", Market::Spot, candle(60, 1.0));
        cache.update_candle("BTC/USDT", Market::Spot, candle(120, 2.0));

        let series = cache.candles("BTC/USDT", Market::Spot);
        assert_eq!(series.iter().map(|c| c.timestamp).collect::<Vec<_>>(), vec![60, 120, 180]);
    }

    #[test]
    fn update_candle_replaces_same_timestamp() {
        let cache = Cache::new();
        cache.update_candle("BTC/USDT", Market::Spot, candle(60, 1.0));
        cache.update_candle("BTC/USDT", Market::Spot, candle(60, 2.0));

        let series = cache.candles("BTC/USDT", Market::Spot);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close, 2.0);
    }

    #[test]
    fn update_candle_caps_at_max_size() {
        let cache = Cache::new();
        for i in 0..(MAX_CANDLES_IN_CACHE + 10) {
            cache.update_candle("BTC/USDT", Market::Spot, candle(i as i64 * 60, i as f64));
        }
        let series = cache.candles("BTC/USDT", Market::Spot);
        assert_eq!(series.len(), MAX_CANDLES_IN_CACHE);
        // Oldest entries were dropped; the first kept one is index 10.
        assert_eq!(series[0].close, 10.0);
    }

    #[test]
    fn bulk_load_sorts_and_caps() {
        let cache = Cache::new();
        let candles = vec![candle(180, 3.0), candle(60, 1.0), candle(120, 2.0)];
        cache.bulk_load_candles("ETH/USDT", Market::Futures, candles);

        let series = cache.candles("ETH/USDT", Market::Futures);
        assert_eq!(series.iter().map(|c| c.timestamp).collect::<Vec<_>>(), vec![60, 120, 180]);
    }

    #[test]
    fn trigger_marks_prune_older_than_two_hours() {
        let cache = Cache::new();
        let now = clock::now();
        cache.add_trigger_mark(
            "BTC/USDT",
            Market::Spot,
            TriggerMark {
                timestamp: now - 7_300,
                filter_id: 1,
                filter_name: "old".into(),
                filter_type: "price_change",
            },
        );
        cache.add_trigger_mark(
            "BTC/USDT",
            Market::Spot,
            TriggerMark {
                timestamp: now,
                filter_id: 2,
                filter_name: "fresh".into(),
                filter_type: "volume_spike",
            },
        );

        let marks = cache.trigger_marks("BTC/USDT", Market::Spot);
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].filter_name, "fresh");
    }

    #[test]
    fn symbols_lists_tracked_pairs() {
        let cache = Cache::new();
        cache.update_candle("BTC/USDT", Market::Spot, candle(60, 1.0));
        cache.update_candle("ETH/USDT", Market::Futures, candle(60, 1.0));

        let mut symbols = cache.symbols();
        symbols.sort();
        assert_eq!(
            symbols,
            vec![
                ("BTC/USDT".to_string(), Market::Spot),
                ("ETH/USDT".to_string(), Market::Futures),
            ]
        );
    }
}
