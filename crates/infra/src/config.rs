//! Configuration loading and representation.
//!
//! Layers, lowest precedence first:
//! 1. defaults in code
//! 2. optional `stockbook.toml` (or the file named by `STOCKBOOK_CONFIG`)
//! 3. `STOCKBOOK__*` environment variables (`STOCKBOOK__DATABASE__URL`, ...)

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use stockbook_core::DomainError;
use stockbook_inventory::StockThresholds;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub inventory: ThresholdSettings,
    pub transactions: TransactionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Stock alert levels.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdSettings {
    pub low_stock: i64,
    pub critical_stock: i64,
}

impl ThresholdSettings {
    pub fn thresholds(&self) -> Result<StockThresholds, DomainError> {
        StockThresholds::new(self.low_stock, self.critical_stock)
    }
}

/// Per-transaction timeouts.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TransactionSettings {
    pub lock_timeout_ms: u64,
    pub statement_timeout_ms: u64,
}

impl TransactionSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            statement_timeout_ms: 30_000,
        }
    }
}

impl Settings {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let file = std::env::var("STOCKBOOK_CONFIG").unwrap_or_else(|_| "stockbook".into());
        Self::builder()?
            .add_source(File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix("STOCKBOOK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("database.url", "postgres://localhost/stockbook")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("inventory.low_stock", 10)?
            .set_default("inventory.critical_stock", 3)?
            .set_default("transactions.lock_timeout_ms", 5_000)?
            .set_default("transactions.statement_timeout_ms", 30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize() {
        let settings: Settings = Settings::builder()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.inventory.thresholds().unwrap(), StockThresholds::default());
        assert_eq!(settings.transactions.lock_timeout(), Duration::from_secs(5));
        assert_eq!(settings.database.max_connections, 10);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let t = ThresholdSettings {
            low_stock: 2,
            critical_stock: 8,
        };
        assert!(t.thresholds().is_err());
    }
}
