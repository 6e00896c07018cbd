use crate::model::{Candle, PriceDirection, TickerSnapshot, TriggerData, VolumeSpikeConfig};

/// Ratio of the short window's total volume to the historical window's
/// average volume, gated by a minimum spike coefficient and an optional
/// price-move requirement over the short window.
///
/// The base window is the trailing `base_period_minutes` candles, split into
/// `current` (the trailing `short_period_minutes` candles) and `historical`
/// (the remainder, i.e. base minus short). `current_volume` is the sum of
/// `current`'s volume; `avg_volume` is the mean of `historical`'s volume;
/// `spike = current_volume / avg_volume`. A quiet historical period followed
/// by a short burst produces a ratio well above 1.0.
pub fn evaluate(
    config: &VolumeSpikeConfig,
    candles: &[Candle],
    ticker: Option<&TickerSnapshot>,
    url: String,
) -> Option<TriggerData> {
    let base_window = config.base_period_minutes as usize;
    let short_window = config.short_period_minutes as usize;
    if base_window == 0 || short_window == 0 || short_window > base_window {
        return None;
    }
    if candles.len() < base_window {
        return None;
    }

    let historical_window = base_window - short_window;
    if historical_window == 0 {
        return None;
    }

    let short_slice = &candles[candles.len() - short_window..];
    let historical_slice =
        &candles[candles.len() - base_window..candles.len() - short_window];

    let current_volume = short_slice.iter().map(|c| c.volume).sum::<f64>();
    let avg_volume =
        historical_slice.iter().map(|c| c.volume).sum::<f64>() / historical_window as f64;

    if avg_volume <= 0.0 {
        return None;
    }
    let spike = current_volume / avg_volume;
    if spike < config.spike_coefficient {
        return None;
    }

    let first = short_slice.first()?;
    let last = short_slice.last()?;
    if first.open <= 0.0 {
        return None;
    }
    let price_change_percent = (last.close - first.open) / first.open * 100.0;

    let matches_direction = match config.price_direction {
        PriceDirection::Up => price_change_percent >= config.min_price_change_percent,
        PriceDirection::Down => price_change_percent <= -config.min_price_change_percent,
        PriceDirection::All => price_change_percent.abs() >= config.min_price_change_percent,
    };
    if !matches_direction {
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
        volume_period: Some(current_volume),
        volume_24h: ticker.map(|t| t.volume_24h),
        spike_coefficient: Some(spike),
        average_volume: Some(avg_volume),
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

    fn config(spike_coefficient: f64, price_direction: PriceDirection) -> VolumeSpikeConfig {
        VolumeSpikeConfig {
            market: Market::Spot,
            short_period_minutes: 1,
            base_period_minutes: 4,
            spike_coefficient,
            price_direction,
            min_price_change_percent: 0.0,
            min_volume_24h: 0.0,
            max_volume_24h: None,
            exclude_coins: HashSet::new(),
            comment: String::new(),
        }
    }

    fn burst_candles() -> Vec<Candle> {
        vec![
            candle(0, 100.0, 100.0, 1.0),
            candle(60, 100.0, 100.0, 1.0),
            candle(120, 100.0, 101.0, 1.0),
            candle(180, 101.0, 102.0, 20.0),
        ]
    }

    #[test]
    fn burst_above_coefficient_matches() {
        let result = evaluate(&config(3.0, PriceDirection::All), &burst_candles(), None, "u".into());
        let result = result.unwrap();
        assert_eq!(result.average_volume, Some(1.0));
        assert_eq!(result.spike_coefficient, Some(20.0));
    }

    #[test]
    fn ratio_below_coefficient_does_not_match() {
        let flat = vec![
            candle(0, 100.0, 100.0, 5.0),
            candle(60, 100.0, 100.0, 5.0),
            candle(120, 100.0, 100.0, 5.0),
            candle(180, 100.0, 100.0, 5.0),
        ];
        assert!(evaluate(&config(1.5, PriceDirection::All), &flat, None, String::new()).is_none());
    }

    #[test]
    fn direction_gate_rejects_wrong_way_move() {
        let mut cfg = config(3.0, PriceDirection::Down);
        cfg.min_price_change_percent = 0.5;
        assert!(evaluate(&cfg, &burst_candles(), None, String::new()).is_none());
    }

    #[test]
    fn insufficient_history_returns_none() {
        let candles = vec![candle(0, 100.0, 100.0, 1.0), candle(60, 100.0, 101.0, 10.0)];
        assert!(evaluate(&config(1.0, PriceDirection::All), &candles, None, String::new()).is_none());
    }

    #[test]
    fn short_window_longer_than_base_is_rejected() {
        let mut cfg = config(1.0, PriceDirection::All);
        cfg.short_period_minutes = 10;
        cfg.base_period_minutes = 4;
        assert!(evaluate(&cfg, &burst_candles(), None, String::new()).is_none());
    }
}
