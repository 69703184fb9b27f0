use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;

use crate::reporting::rollup::GroupingKey;
use crate::variance::penalty::{PenaltyRule, PenaltySchedule};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub reporting: ReportingConfig,
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub penalties: Vec<PenaltyRule>,
    pub store: StoreConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base price per liter before the quality multiplier.
    pub base_rate_per_liter: Decimal,
    pub max_weighing_delay_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    pub page_size: u64,
    /// Rows per request when a report needs a whole window.
    pub fetch_batch_size: u64,
    /// Upper bound on a single primary fetch.
    pub fetch_timeout_seconds: u64,
    pub grouping: GroupingKey,
}

/// Weights and reference scales of the collector performance score.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub accuracy_weight: Decimal,
    pub penalty_weight: Decimal,
    pub consistency_weight: Decimal,
    /// Average penalty per collection at which the penalty factor halves.
    pub penalty_reference: Decimal,
    /// Mean absolute deviation (percentage points) at which consistency halves.
    pub spread_reference: Decimal,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            accuracy_weight: Decimal::new(5, 1),
            penalty_weight: Decimal::new(3, 1),
            consistency_weight: Decimal::new(2, 1),
            penalty_reference: Decimal::from(100),
            spread_reference: Decimal::from(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Rest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_path: String,
    pub rest_base_url: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

/// Secrets loaded exclusively from environment variables.
/// Not serializable, not stored in config files.
pub struct Secrets {
    pub store_api_key: Option<SecretString>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            store_api_key: std::env::var("STORE_API_KEY").ok().map(SecretString::from),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, overlaying environment variables for secrets.
    pub fn load(config_path: &Path) -> Result<(Self, Secrets)> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let secrets = Secrets::from_env();

        Ok((config, secrets))
    }

    pub fn penalty_schedule(&self) -> PenaltySchedule {
        PenaltySchedule::new(self.penalties.clone())
    }
}
