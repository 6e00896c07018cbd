use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::VALID_INTERVAL_MINUTES;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_db_path() -> String {
    "./data/screener.db".into()
}

fn default_check_interval_seconds() -> u64 {
    60
}

fn default_cooldown_minutes() -> u64 {
    15
}

fn default_candle_keep_hours() -> u64 {
    2
}

fn default_trigger_keep_days() -> u64 {
    30
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_rest_requests_per_second() -> u32 {
    5
}

fn default_api_host() -> String {
    "127.0.0.1".into()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

/// Root config as loaded from `config.toml`. Secrets (Telegram token/chat id)
/// are read from the environment rather than stored here; see
/// [`TelegramConfig`].
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub screener: ScreenerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub testnet: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_rest_requests_per_second")]
    pub rest_requests_per_second: u32,
    #[serde(default = "default_true")]
    pub parse_spot: bool,
    #[serde(default = "default_true")]
    pub parse_futures: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            request_timeout_ms: default_request_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            rest_requests_per_second: default_rest_requests_per_second(),
            parse_spot: default_true(),
            parse_futures: default_true(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScreenerConfig {
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    #[serde(default = "default_candle_keep_hours")]
    pub candle_keep_hours: u64,
    #[serde(default = "default_trigger_keep_days")]
    pub trigger_keep_days: u64,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval_seconds(),
            cooldown_minutes: default_cooldown_minutes(),
            candle_keep_hours: default_candle_keep_hours(),
            trigger_keep_days: default_trigger_keep_days(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Telegram credentials. Present in the TOML only as a feature toggle; the
/// actual token and chat id are read from `TELEGRAM_BOT_TOKEN` /
/// `TELEGRAM_CHAT_ID` at startup (see [`load`]), so they never end up in a
/// config file that could be checked into version control.
#[derive(Debug, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip)]
    pub bot_token: Option<String>,
    #[serde(skip)]
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        self.enabled && self.bot_token.is_some() && self.chat_id.is_some()
    }
}

pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    dotenvy::dotenv().ok();

    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let mut config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    config.telegram.bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok();
    config.telegram.chat_id = std::env::var("TELEGRAM_CHAT_ID").ok();

    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_screener(&config.screener)?;
    validate_exchange(&config.exchange)?;
    validate_telegram(&config.telegram)?;
    Ok(())
}

fn validate_screener(screener: &ScreenerConfig) -> Result<(), Report<ConfigError>> {
    if !(60..=3600).contains(&screener.check_interval_seconds) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "screener.check_interval_seconds must be in 60..=3600, got {}",
                screener.check_interval_seconds
            ),
        }));
    }

    if !(1..=1440).contains(&screener.cooldown_minutes) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "screener.cooldown_minutes must be in 1..=1440, got {}",
                screener.cooldown_minutes
            ),
        }));
    }

    if screener.candle_keep_hours == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "screener.candle_keep_hours must be > 0".into(),
        }));
    }

    if screener.trigger_keep_days == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "screener.trigger_keep_days must be > 0".into(),
        }));
    }

    Ok(())
}

fn validate_exchange(exchange: &ExchangeConfig) -> Result<(), Report<ConfigError>> {
    if exchange.request_timeout_ms == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "exchange.request_timeout_ms must be > 0".into(),
        }));
    }

    if exchange.rest_requests_per_second == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "exchange.rest_requests_per_second must be > 0".into(),
        }));
    }

    if !exchange.parse_spot && !exchange.parse_futures {
        return Err(Report::new(ConfigError::Validation {
            field: "exchange: at least one of parse_spot / parse_futures must be true".into(),
        }));
    }

    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), Report<ConfigError>> {
    if telegram.enabled && (telegram.bot_token.is_none() || telegram.chat_id.is_none()) {
        return Err(Report::new(ConfigError::Validation {
            field: "telegram.enabled is true but TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID are not set"
                .into(),
        }));
    }
    Ok(())
}

/// Validate that an interval value used in a filter config is one of the
/// set the screener can actually build candles against.
pub fn validate_interval_minutes(minutes: u32) -> Result<(), Report<ConfigError>> {
    if VALID_INTERVAL_MINUTES.contains(&minutes) {
        Ok(())
    } else {
        Err(Report::new(ConfigError::Validation {
            field: format!("interval_minutes {minutes} is not one of {VALID_INTERVAL_MINUTES:?}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn defaults_applied_when_sections_omitted() {
        let config = parse("");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.screener.check_interval_seconds, 60);
        assert_eq!(config.screener.cooldown_minutes, 15);
        assert_eq!(config.screener.candle_keep_hours, 2);
        assert_eq!(config.screener.trigger_keep_days, 30);
        assert_eq!(config.api.port, 8080);
        assert!(config.exchange.parse_spot);
        assert!(config.exchange.parse_futures);
        assert!(!config.telegram.enabled);
    }

    #[test]
    fn check_interval_out_of_range_rejected() {
        let mut config = parse("");
        config.screener.check_interval_seconds = 30;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn cooldown_out_of_range_rejected() {
        let mut config = parse("");
        config.screener.cooldown_minutes = 0;
        assert!(validate(&config).is_err());
        config.screener.cooldown_minutes = 2000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn disabling_both_markets_rejected() {
        let mut config = parse("");
        config.exchange.parse_spot = false;
        config.exchange.parse_futures = false;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn telegram_enabled_without_credentials_rejected() {
        let mut config = parse("");
        config.telegram.enabled = true;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn telegram_enabled_with_credentials_accepted() {
        let mut config = parse("");
        config.telegram.enabled = true;
        config.telegram.bot_token = Some("token".into());
        config.telegram.chat_id = Some("chat".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn interval_minutes_validation() {
        assert!(validate_interval_minutes(15).is_ok());
        assert!(validate_interval_minutes(7).is_err());
    }
}
