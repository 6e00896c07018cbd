use crate::model::{Candle, Direction, PriceChangeConfig, TickerSnapshot, TriggerData};

/// Percentage move over the trailing `interval_minutes` window, gated by
/// direction and volume floors.
///
/// `candles` must already be sorted ascending by timestamp; the window is
/// the last `interval_minutes` one-minute candles. Fewer candles than the
/// window requires means there isn't enough history yet, so this returns
/// `None` rather than guessing from a partial window.
pub fn evaluate(
    config: &PriceChangeConfig,
    candles: &[Candle],
    ticker: Option<&TickerSnapshot>,
    url: String,
) -> Option<TriggerData> {
    let window = config.interval_minutes as usize;
    if window == 0 || candles.len() < window {
        return None;
    }

    let slice = &candles[candles.len() - window..];
    let first = slice.first()?;
    let last = slice.last()?;

    if first.open <= 0.0 {
        return None;
    }
    let price_change_percent = (last.close - first.open) / first.open * 100.0;

    let matches_direction = match config.direction {
        Direction::Up => price_change_percent >= config.min_price_change_percent,
        Direction::Down => price_change_percent <= -config.min_price_change_percent,
        Direction::Any => price_change_percent.abs() >= config.min_price_change_percent,
    };
    if !matches_direction {
        return None;
    }

    let volume_period: f64 = slice.iter().map(|c| c.volume).sum();
    if volume_period < config.min_volume_period {
        return None;
    }

    if let Some(ticker) = ticker {
        if ticker.volume_24h < config.min_volume_24h {
            return None;
        }
        if let Some(max) = config.max_volume_24h {
            if ticker.volume_24h > max {
                return None;
            }
        }
    } else if config.min_volume_24h > 0.0 {
        return None;
    }

    Some(TriggerData {
        price_change_percent: Some(price_change_percent),
        price_from: Some(first.open),
        price_to: Some(last.close),
        volume_period: Some(volume_period),
        volume_24h: ticker.map(|t| t.volume_24h),
        spike_coefficient: None,
        average_volume: None,
        url,
        first_candle_timestamp: Some(first.timestamp),
        last_candle_timestamp: Some(last.timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Market;
    use std::collections::HashSet;

    fn candle(ts: i64, open: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: ts,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
        }
    }

    fn config(direction: Direction, min_pct: f64) -> PriceChangeConfig {
        PriceChangeConfig {
            market: Market::Spot,
            interval_minutes: 3,
            min_price_change_percent: min_pct,
            direction,
            min_volume_period: 0.0,
            min_volume_24h: 0.0,
            max_volume_24h: None,
            exclude_coins: HashSet::new(),
            comment: String::new(),
        }
    }

    fn ticker(volume_24h: f64) -> TickerSnapshot {
        TickerSnapshot {
            volume_24h,
            last_price: 100.0,
            updated_at: 0,
        }
    }

    #[test]
    fn upward_move_past_threshold_matches() {
        let candles = vec![
            candle(0, 100.0, 101.0, 10.0),
            candle(60, 101.0, 103.0, 10.0),
            candle(120, 103.0, 105.0, 10.0),
        ];
        let result = evaluate(&config(Direction::Up, 4.0), &candles, None, "u".into()).unwrap();
        assert_eq!(result.price_from, Some(100.0));
        assert_eq!(result.price_to, Some(105.0));
        assert!((result.price_change_percent.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn upward_move_below_threshold_does_not_match() {
        let candles = vec![
            candle(0, 100.0, 100.5, 10.0),
            candle(60, 100.5, 100.8, 10.0),
            candle(120, 100.8, 101.0, 10.0),
        ];
        assert!(evaluate(&config(Direction::Up, 4.0), &candles, None, String::new()).is_none());
    }

    #[test]
    fn down_direction_ignores_upward_moves() {
        let candles = vec![
            candle(0, 100.0, 101.0, 10.0),
            candle(60, 101.0, 103.0, 10.0),
            candle(120, 103.0, 110.0, 10.0),
        ];
        assert!(evaluate(&config(Direction::Down, 4.0), &candles, None, String::new()).is_none());
    }

    #[test]
    fn insufficient_history_returns_none() {
        let candles = vec![candle(0, 100.0, 105.0, 10.0)];
        assert!(evaluate(&config(Direction::Any, 1.0), &candles, None, String::new()).is_none());
    }

    #[test]
    fn ticker_volume_floor_rejects_thin_markets() {
        let candles = vec![
            candle(0, 100.0, 101.0, 10.0),
            candle(60, 101.0, 103.0, 10.0),
            candle(120, 103.0, 110.0, 10.0),
        ];
        let mut cfg = config(Direction::Up, 4.0);
        cfg.min_volume_24h = 1_000.0;
        assert!(evaluate(&cfg, &candles, Some(&ticker(500.0)), String::new()).is_none());
        assert!(evaluate(&cfg, &candles, Some(&ticker(2_000.0)), String::new()).is_some());
    }

    #[test]
    fn ticker_volume_ceiling_rejects_overheated_markets() {
        let candles = vec![
            candle(0, 100.0, 101.0, 10.0),
            candle(60, 101.0, 103.0, 10.0),
            candle(120, 103.0, 110.0, 10.0),
        ];
        let mut cfg = config(Direction::Up, 4.0);
        cfg.max_volume_24h = Some(1_000.0);
        assert!(evaluate(&cfg, &candles, Some(&ticker(2_000.0)), String::new()).is_none());
        assert!(evaluate(&cfg, &candles, Some(&ticker(500.0)), String::new()).is_some());
    }
}
