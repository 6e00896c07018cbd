use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which order book a (symbol, market) pair trades on.
///
/// Bybit assigns spot and futures pairs overlapping base identifiers (e.g.
/// `BTC/USDT` vs `BTC/USDT:USDT`), so every lookup in this crate carries
/// `Market` alongside the symbol rather than inferring it from the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Spot,
    Futures,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => write!(f, "spot"),
            Self::Futures => write!(f, "futures"),
        }
    }
}

impl Market {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "spot" => Some(Self::Spot),
            "futures" => Some(Self::Futures),
            _ => None,
        }
    }
}

/// A closed one-minute OHLCV bar for a (symbol, market) pair.
///
/// A `Candle` that exists anywhere outside the builder is always closed —
/// the current, still-forming minute never leaves `builder::CandleBuilder`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// `low <= open,close <= high` and the timestamp is minute-aligned.
    pub fn is_well_formed(&self) -> bool {
        self.timestamp % 60 == 0
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0.0
    }
}

/// Last-observed 24h rollup for a (symbol, market) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub volume_24h: f64,
    pub last_price: f64,
    pub updated_at: i64,
}

/// A raw ticker frame as delivered by the exchange's streaming transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerFrame {
    pub exchange_ts_ms: i64,
    pub last: f64,
    pub quote_volume_24h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    Up,
    Down,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeConfig {
    pub market: Market,
    pub interval_minutes: u32,
    pub min_price_change_percent: f64,
    pub direction: Direction,
    #[serde(default)]
    pub min_volume_period: f64,
    #[serde(default)]
    pub min_volume_24h: f64,
    #[serde(default)]
    pub max_volume_24h: Option<f64>,
    #[serde(default)]
    pub exclude_coins: HashSet<String>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpikeConfig {
    pub market: Market,
    pub short_period_minutes: u32,
    pub base_period_minutes: u32,
    pub spike_coefficient: f64,
    pub price_direction: PriceDirection,
    #[serde(default)]
    pub min_price_change_percent: f64,
    #[serde(default)]
    pub min_volume_24h: f64,
    #[serde(default)]
    pub max_volume_24h: Option<f64>,
    #[serde(default)]
    pub exclude_coins: HashSet<String>,
    #[serde(default)]
    pub comment: String,
}

pub const VALID_INTERVAL_MINUTES: &[u32] = &[5, 10, 15, 30, 60, 120, 240];
pub const VALID_SHORT_PERIOD_MINUTES: &[u32] = &[5, 10, 15, 30];
pub const VALID_BASE_PERIOD_MINUTES: &[u32] = &[60, 120, 240];

/// Tagged union of filter configs. Stored as `{type, ...fields}` JSON for
/// forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    PriceChange(PriceChangeConfig),
    VolumeSpike(VolumeSpikeConfig),
}

impl FilterConfig {
    pub fn market(&self) -> Market {
        match self {
            Self::PriceChange(c) => c.market,
            Self::VolumeSpike(c) => c.market,
        }
    }

    pub fn excludes(&self, symbol: &str) -> bool {
        match self {
            Self::PriceChange(c) => c.exclude_coins.contains(symbol),
            Self::VolumeSpike(c) => c.exclude_coins.contains(symbol),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PriceChange(_) => "price_change",
            Self::VolumeSpike(_) => "volume_spike",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub config: FilterConfig,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// Evaluation payload attached to a trigger event. Stored verbatim as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_change_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_from: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_to: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_period: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spike_coefficient: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_volume: Option<f64>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_candle_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_candle_timestamp: Option<i64>,
}

/// An immutable record of one filter match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub filter_id: i64,
    pub filter_name: String,
    pub symbol: String,
    pub market: Market,
    pub triggered_at: i64,
    pub data: TriggerData,
    pub notified: bool,
}

/// A compact, ephemeral record of a recent filter match kept in the rolling
/// cache to annotate the live chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMark {
    pub timestamp: i64,
    pub filter_id: i64,
    pub filter_name: String,
    pub filter_type: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_round_trips_through_string() {
        assert_eq!(Market::from_str("spot"), Some(Market::Spot));
        assert_eq!(Market::from_str("futures"), Some(Market::Futures));
        assert_eq!(Market::from_str("margin"), None);
        assert_eq!(Market::Spot.to_string(), "spot");
    }

    #[test]
    fn candle_well_formed_checks_ohlc_bounds() {
        let good = Candle {
            timestamp: 60,
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: 11.0,
            volume: 5.0,
        };
        assert!(good.is_well_formed());

        let bad_bounds = Candle { low: 15.0, ..good };
        assert!(!bad_bounds.is_well_formed());

        let bad_alignment = Candle {
            timestamp: 61,
            ..good
        };
        assert!(!bad_alignment.is_well_formed());

        let bad_volume = Candle {
            volume: -1.0,
            ..good
        };
        assert!(!bad_volume.is_well_formed());
    }

    #[test]
    fn filter_config_serializes_with_type_tag() {
        let cfg = FilterConfig::PriceChange(PriceChangeConfig {
            market: Market::Spot,
            interval_minutes: 15,
            min_price_change_percent: 5.0,
            direction: Direction::Up,
            min_volume_period: 0.0,
            min_volume_24h: 0.0,
            max_volume_24h: None,
            exclude_coins: HashSet::new(),
            comment: String::new(),
        });
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["type"], "price_change");
        assert_eq!(json["interval_minutes"], 15);
    }

    #[test]
    fn filter_config_excludes_checks_symbol_set() {
        let mut exclude_coins = HashSet::new();
        exclude_coins.insert("DOGE/USDT".to_string());
        let cfg = FilterConfig::VolumeSpike(VolumeSpikeConfig {
            market: Market::Spot,
            short_period_minutes: 10,
            base_period_minutes: 120,
            spike_coefficient: 5.0,
            price_direction: PriceDirection::All,
            min_price_change_percent: 0.0,
            min_volume_24h: 0.0,
            max_volume_24h: None,
            exclude_coins,
            comment: String::new(),
        });
        assert!(cfg.excludes("DOGE/USDT"));
        assert!(!cfg.excludes("BTC/USDT"));
        assert_eq!(cfg.type_name(), "volume_spike");
    }
}
