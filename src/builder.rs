use crate::clock;
use crate::exchange::TickerEvent;
use crate::model::Candle;

/// Accumulates ticks for one (symbol, market) into one-minute OHLCV bars.
///
/// Holds at most two candles: `current`, the minute still accumulating
/// ticks, and `previous`, the most recently closed one. [`CandleBuilder::update`]
/// is a pure mutator that never hands back a candle — the only way to read a
/// closed candle out is [`CandleBuilder::finalize`], driven by the minute
/// scheduler's clock tick, never by the tick-processing path itself.
pub struct CandleBuilder {
    current: Option<Candle>,
    previous: Option<Candle>,
}

impl Default for CandleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleBuilder {
    pub fn new() -> Self {
        Self {
            current: None,
            previous: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.previous.is_none()
    }

    /// Fold one ticker tick into the builder. Never returns a candle — a
    /// minute rollover moves `current` into `previous` and opens a new
    /// `current`, but the closed candle is only observable through
    /// [`Self::finalize`].
    pub fn update(&mut self, tick: &TickerEvent) {
        let tick_minute = clock::minute_of(tick.frame.exchange_ts_ms / 1000);
        let price = tick.frame.last;

        match self.current {
            None => {
                self.current = Some(Self::open_candle(tick_minute, price));
            }
            Some(ref mut candle) if tick_minute == candle.timestamp => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
                candle.close = price;
            }
            Some(ref candle) if tick_minute > candle.timestamp => {
                self.previous = self.current;
                self.current = Some(Self::open_candle(tick_minute, price));
            }
            // Exchange tick arrived for a minute we've already moved past —
            // a straggler from network reordering. Folded into the open
            // candle's high/low instead of dropped, since the price is
            // still real.
            Some(ref mut candle) => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
            }
        }
    }

    fn open_candle(minute: i64, price: f64) -> Candle {
        Candle {
            timestamp: minute,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// Read out the closed candle for `minute`, if any: `previous` if it's
    /// the requested minute, else `current` if it is — covering the case
    /// where the scheduler's tick lands before any tick has rolled the
    /// builder into the next minute. Pure and idempotent: calling it twice
    /// with the same `minute` returns the same value, since it never
    /// mutates the builder's state.
    pub fn finalize(&self, minute: i64) -> Option<Candle> {
        if let Some(previous) = self.previous {
            if previous.timestamp == minute {
                return Some(previous);
            }
        }
        if let Some(current) = self.current {
            if current.timestamp == minute {
                return Some(current);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Market;

    fn tick(ts_ms: i64, last: f64) -> TickerEvent {
        TickerEvent {
            symbol: "BTC/USDT".into(),
            market: Market::Spot,
            frame: crate::model::TickerFrame {
                exchange_ts_ms: ts_ms,
                last,
                quote_volume_24h: 0.0,
            },
        }
    }

    #[test]
    fn first_tick_opens_candle_without_emitting() {
        let mut builder = CandleBuilder::new();
        builder.update(&tick(60_000, 100.0));
        assert!(!builder.is_empty());
    }

    #[test]
    fn update_accumulates_high_low_close_within_the_same_minute() {
        let mut builder = CandleBuilder::new();
        builder.update(&tick(60_000, 100.0));
        builder.update(&tick(65_000, 105.0));
        builder.update(&tick(70_000, 95.0));
        builder.update(&tick(75_000, 102.0));

        let closed = builder.finalize(60).unwrap();
        assert_eq!(closed.timestamp, 60);
        assert_eq!(closed.open, 100.0);
        assert_eq!(closed.high, 105.0);
        assert_eq!(closed.low, 95.0);
        assert_eq!(closed.close, 102.0);
    }

    #[test]
    fn tick_in_next_minute_rolls_current_into_previous() {
        let mut builder = CandleBuilder::new();
        builder.update(&tick(60_000, 100.0));
        builder.update(&tick(125_000, 110.0));

        let closed = builder.finalize(60).expect("previous minute available");
        assert_eq!(closed.timestamp, 60);
        assert_eq!(closed.close, 100.0);
        assert!(!builder.is_empty());
    }

    #[test]
    fn finalize_returns_current_when_invoked_inside_its_own_minute() {
        let mut builder = CandleBuilder::new();
        builder.update(&tick(60_000, 100.0));
        assert_eq!(builder.finalize(60).unwrap().timestamp, 60);
    }

    #[test]
    fn finalize_is_idempotent_for_the_same_minute() {
        let mut builder = CandleBuilder::new();
        builder.update(&tick(60_000, 100.0));
        builder.update(&tick(125_000, 110.0));

        let first = builder.finalize(60);
        let second = builder.finalize(60);
        assert_eq!(first, second);
    }

    #[test]
    fn finalize_returns_none_for_an_unrelated_minute() {
        let mut builder = CandleBuilder::new();
        builder.update(&tick(60_000, 100.0));
        assert!(builder.finalize(300).is_none());
    }

    #[test]
    fn finalize_on_empty_builder_returns_none() {
        let builder = CandleBuilder::new();
        assert!(builder.finalize(120).is_none());
    }
}
