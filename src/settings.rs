use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_WINDOW: usize = 6;

/// Which observations seed the mean, spread and trend when a summary is first built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsBasis {
    /// Every retained observation, indexed from the start of history.
    #[default]
    FullHistory,
    /// Only the trailing window, indexed from the start of the window. Matches
    /// how incremental updates recompute the summary.
    Window,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub window: usize,
    pub min_history: usize,
    pub seasonal_weight: f64,
    pub seed_basis: StatsBasis,
    pub holdout: usize,
    /// Fewest known months an item needs before it is backtested.
    pub min_backtest_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            min_history: DEFAULT_WINDOW,
            seasonal_weight: 0.5,
            seed_basis: StatsBasis::FullHistory,
            holdout: 12,
            min_backtest_history: 24,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.window == 0 {
            return Err(ConfigLoadError::Invalid("window must be at least 1".into()));
        }
        if self.min_history == 0 {
            return Err(ConfigLoadError::Invalid(
                "min_history must be at least 1".into(),
            ));
        }
        if !(self.seasonal_weight > 0.0 && self.seasonal_weight <= 1.0) {
            return Err(ConfigLoadError::Invalid(format!(
                "seasonal_weight must be in (0, 1], got {}",
                self.seasonal_weight
            )));
        }
        if self.holdout == 0 {
            return Err(ConfigLoadError::Invalid("holdout must be at least 1".into()));
        }
        Ok(())
    }
}

/// Loads engine settings.
///
/// Sources, later ones winning:
/// 1. Built-in defaults
/// 2. The optional config file (any format the `config` crate detects by extension)
/// 3. Environment variables (`FORECAST__WINDOW`, `FORECAST__SEED_BASIS`, ...)
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigLoadError> {
    let defaults = EngineConfig::default();
    let mut builder = Config::builder()
        .set_default("window", defaults.window as i64)?
        .set_default("min_history", defaults.min_history as i64)?
        .set_default("seasonal_weight", defaults.seasonal_weight)?
        .set_default("seed_basis", "full_history")?
        .set_default("holdout", defaults.holdout as i64)?
        .set_default("min_backtest_history", defaults.min_backtest_history as i64)?;

    if let Some(path) = path {
        info!(path = %path.display(), "loading engine config file");
        builder = builder.add_source(File::from(path));
    }

    let config = builder
        .add_source(Environment::with_prefix("FORECAST").separator("__"))
        .build()?;

    let engine: EngineConfig = config.try_deserialize()?;
    engine.validate()?;
    Ok(engine)
}
