//! Application configuration.
//!
//! Defaults carry the production tunables; anything can be overridden from
//! `config/Config.toml` or `LADDER_`-prefixed environment variables via
//! [`crate::config_loader::ConfigLoader`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub exchange: ExchangeConfig,
    pub planner: PlannerConfig,
    pub manager: ManagerConfig,
    /// Named credential entries, referenced by positions via `credential_ref`.
    #[serde(default)]
    pub credentials: HashMap<String, CredentialConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            exchange: ExchangeConfig::default(),
            planner: PlannerConfig::default(),
            manager: ManagerConfig::default(),
            credentials: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path, e.g. `sqlite://ladder.db`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://ladder.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub api_url: String,
    /// Requests per second allowed against the REST API.
    pub rate_limit_per_sec: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.gateio.ws".to_string(),
            rate_limit_per_sec: 10,
        }
    }
}

/// One API key pair. The secret is named by environment variable so it never
/// lands in a config file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub api_key_env: String,
    pub api_secret_env: String,
}

/// Sizing and pricing rules for new positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Fraction of the position closed at the first tier.
    pub tier1_fraction: Decimal,
    /// Fraction closed at the second tier; the rest is the runner.
    pub tier2_fraction: Decimal,
    /// Price offset of tier 1 from entry (0.015 = 1.5%).
    pub tier1_offset: Decimal,
    /// Price offset of tier 2 from entry.
    pub tier2_offset: Decimal,
    /// Below this contract quantity a multi-tier request is demoted to single.
    pub min_multi_tier_qty: i64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tier1_fraction: Decimal::new(5, 1),  // 0.5
            tier2_fraction: Decimal::new(3, 1),  // 0.3
            tier1_offset: Decimal::new(15, 3),   // 1.5%
            tier2_offset: Decimal::new(25, 3),   // 2.5%
            min_multi_tier_qty: 5,
        }
    }
}

/// Runtime tunables for the monitoring loops and stop management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Seconds between fill-detection polls.
    pub check_interval_secs: u64,
    /// Maximum attempts when re-placing a stop after cancellation.
    pub max_retries: u32,
    /// Breakeven stop offset from entry (0.0005 = 0.05%).
    pub breakeven_buffer: Decimal,
    /// Trailing stop distance from the tier-2 fill price (0.01 = 1%).
    pub trailing_distance: Decimal,
    /// Rolling error buffer capacity.
    pub error_buffer_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            max_retries: 3,
            breakeven_buffer: Decimal::new(5, 4), // 0.05%
            trailing_distance: Decimal::new(1, 2), // 1%
            error_buffer_size: 100,
        }
    }
}
