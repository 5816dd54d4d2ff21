//! Configuration management with validation and defaults
//!
//! Defaults mirror the limits the casino bots shipped with. Values can be
//! loaded from TOML and overridden through `CHIPHOUSE_*` environment
//! variables.

use crate::errors::{ChipResult, ConfigurationError};
use crate::ledger::types::Chips;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub betting: BettingConfig,
    pub rate_limit: RateLimitConfig,
    pub house: HouseConfig,
    pub deposits: DepositConfig,
    pub bonus: BonusConfig,
    pub settlement: SettlementConfig,
    pub storage: StorageConfig,
}

/// Wager bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BettingConfig {
    pub min_bet: Chips,
    pub max_bet: Chips,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_bet: 1,
            max_bet: 100_000,
        }
    }
}

/// Per-user cooldown and sliding window
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum gap between two wagers by the same user
    pub bet_cooldown_ms: u64,
    /// Length of the rolling window
    pub window_secs: u64,
    /// Wagers allowed per user inside one window
    pub max_bets_per_window: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            bet_cooldown_ms: 3_000,
            window_secs: 60,
            max_bets_per_window: 20,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseConfig {
    /// Bankroll seeded the first time a ledger is opened
    pub initial_balance: Chips,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000,
        }
    }
}

/// External (Litecoin) deposit handling
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DepositConfig {
    pub min_confirmations: u32,
    /// Chips credited per whole coin
    pub chips_per_coin: u64,
    /// Base units (litoshi) per whole coin
    pub base_units_per_coin: u64,
    pub feed_timeout_ms: u64,
    pub house_address: Option<String>,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            min_confirmations: 2,
            chips_per_coin: 10_000,
            base_units_per_coin: 100_000_000,
            feed_timeout_ms: 10_000,
            house_address: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusConfig {
    pub daily_amount: Chips,
    pub interval_secs: u64,
}

impl Default for BonusConfig {
    fn default() -> Self {
        Self {
            daily_amount: 500,
            interval_secs: 86_400,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Extra attempts after a ledger write conflict
    pub max_conflict_retries: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Rocksdb,
    Memory,
}

/// Storage configuration with RocksDB tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: usize,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Rocksdb,
            data_directory: "./DB/chiphouse".to_string(),
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            clear_on_start: false,
        }
    }
}

impl EngineConfig {
    /// In-memory ledger with rate limiting relaxed, for tests and dry runs
    pub fn testing() -> Self {
        Self {
            rate_limit: RateLimitConfig {
                bet_cooldown_ms: 0,
                window_secs: 60,
                max_bets_per_window: 1_000_000,
            },
            storage: StorageConfig {
                backend: BackendKind::Memory,
                clear_on_start: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.betting.min_bet <= 0 {
            return Err(invalid("betting.min_bet", self.betting.min_bet, "must be > 0"));
        }
        if self.betting.max_bet < self.betting.min_bet {
            return Err(invalid("betting.max_bet", self.betting.max_bet, "must be >= min_bet"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs", 0, "must be > 0"));
        }
        if self.rate_limit.max_bets_per_window == 0 {
            return Err(invalid("rate_limit.max_bets_per_window", 0, "must be > 0"));
        }
        if self.house.initial_balance < 0 {
            return Err(invalid(
                "house.initial_balance",
                self.house.initial_balance,
                "house balance cannot start negative",
            ));
        }
        if self.deposits.chips_per_coin == 0 {
            return Err(invalid("deposits.chips_per_coin", 0, "must be > 0"));
        }
        if self.deposits.base_units_per_coin == 0 {
            return Err(invalid("deposits.base_units_per_coin", 0, "must be > 0"));
        }
        if self.deposits.feed_timeout_ms == 0 {
            return Err(invalid("deposits.feed_timeout_ms", 0, "must be > 0"));
        }
        if self.bonus.daily_amount < 0 {
            return Err(invalid("bonus.daily_amount", self.bonus.daily_amount, "must be >= 0"));
        }
        if self.storage.backend == BackendKind::Rocksdb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()));
        }
        Ok(())
    }

    pub fn bet_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit.bet_cooldown_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.deposits.feed_timeout_ms)
    }

    pub fn bonus_interval(&self) -> Duration {
        Duration::from_secs(self.bonus.interval_secs)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> ChipResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            Self::load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        Self::apply_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> ChipResult<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;
        Self::parse(&content)
    }

    /// Parse a TOML document; missing sections fall back to defaults
    pub fn parse(content: &str) -> ChipResult<EngineConfig> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `CHIPHOUSE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHIPHOUSE_MIN_BET") {
            config.betting.min_bet = parse_var("CHIPHOUSE_MIN_BET", v)?;
        }
        if let Some(v) = lookup("CHIPHOUSE_MAX_BET") {
            config.betting.max_bet = parse_var("CHIPHOUSE_MAX_BET", v)?;
        }
        if let Some(v) = lookup("CHIPHOUSE_BET_COOLDOWN_MS") {
            config.rate_limit.bet_cooldown_ms = parse_var("CHIPHOUSE_BET_COOLDOWN_MS", v)?;
        }
        if let Some(v) = lookup("CHIPHOUSE_MAX_BETS_PER_WINDOW") {
            config.rate_limit.max_bets_per_window = parse_var("CHIPHOUSE_MAX_BETS_PER_WINDOW", v)?;
        }
        if let Some(v) = lookup("CHIPHOUSE_DATA_DIR") {
            config.storage.data_directory = v;
        }
        if let Some(v) = lookup("CHIPHOUSE_HOUSE_ADDRESS") {
            config.deposits.house_address = Some(v);
        }
        if let Some(v) = lookup("CHIPHOUSE_MIN_CONFIRMATIONS") {
            config.deposits.min_confirmations = parse_var("CHIPHOUSE_MIN_CONFIRMATIONS", v)?;
        }
        if let Some(v) = lookup("CHIPHOUSE_FEED_TIMEOUT_MS") {
            config.deposits.feed_timeout_ms = parse_var("CHIPHOUSE_FEED_TIMEOUT_MS", v)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(field: &str, value: String) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: "Could not parse value".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bet_cooldown(), Duration::from_secs(3));
        assert_eq!(config.rate_limit.max_bets_per_window, 20);
        assert_eq!(config.deposits.chips_per_coin, 10_000);
    }

    #[test]
    fn test_testing_config_is_valid() {
        let config = EngineConfig::testing();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, BackendKind::Memory);
    }

    #[test]
    fn test_inverted_bet_range_rejected() {
        let mut config = EngineConfig::default();
        config.betting.min_bet = 500;
        config.betting.max_bet = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = EngineConfig::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ConfigLoader::parse(
            r#"
            [betting]
            max_bet = 2500

            [storage]
            backend = "memory"
            "#,
        )
        .expect("parse");
        assert_eq!(config.betting.max_bet, 2500);
        assert_eq!(config.betting.min_bet, 1);
        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.bonus.daily_amount, 500);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHIPHOUSE_MAX_BET", "777"),
            ("CHIPHOUSE_HOUSE_ADDRESS", "LhouseAddress"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        ConfigLoader::apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.betting.max_bet, 777);
        assert_eq!(config.deposits.house_address.as_deref(), Some("LhouseAddress"));
    }

    #[test]
    fn test_bad_env_override_reports_field() {
        let mut config = EngineConfig::default();
        let err = ConfigLoader::apply_overrides(&mut config, |k| {
            (k == "CHIPHOUSE_MIN_BET").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("CHIPHOUSE_MIN_BET"));
    }
}
