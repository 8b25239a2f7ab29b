//! Bot configuration.

use crate::error::{AppError, AppResult};
use avell_detector::PatientConfig;
use avell_executor::ExecConfig;
use avell_feed::FeedConfig;
use avell_mm::StoikovConfig;
use avell_risk::RiskLimits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}
fn default_nav() -> Decimal {
    Decimal::from(100_000)
}

/// Top-level configuration, aggregated from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Instrument to quote.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Net asset value used to normalise inventory.
    #[serde(default = "default_nav")]
    pub nav: Decimal,

    /// Seed for the volatility estimator before live data accumulates
    /// (annualised).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_volatility: Option<f64>,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub stoikov: StoikovConfig,

    #[serde(default)]
    pub risk: RiskLimits,

    #[serde(default)]
    pub exec: ExecConfig,

    #[serde(default)]
    pub patient: PatientConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            nav: default_nav(),
            seed_volatility: None,
            feed: FeedConfig::default(),
            stoikov: StoikovConfig::default(),
            risk: RiskLimits::default(),
            exec: ExecConfig::default(),
            patient: PatientConfig::default(),
        }
        .harmonized()
    }
}

impl BotConfig {
    /// Load configuration: `AVELL_CONFIG` env var, falling back to
    /// `config/default.toml`, falling back to defaults.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("AVELL_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config.harmonized())
    }

    /// Copy the ladder-shape and TTL parameters into the executor
    /// config so one `[stoikov]`/`[patient]` section drives both.
    pub fn harmonized(mut self) -> Self {
        self.exec.ladder_levels = self.stoikov.ladder_levels;
        self.exec.ttl_ms = self.stoikov.ttl_ms;
        self.exec.repost_ms = self.stoikov.repost_ms;
        self.exec.post_only_offset = self.stoikov.post_only_offset;
        self.exec.session_ttl_ms = self.patient.max_session_ttl_ms;
        self.exec.level_ttl_ms = self.patient.level_ttl_ms;
        self.exec.session_jitter_ms = self.patient.jitter_ms;
        self.exec.level_improvement = self.patient.level_improvement.clone();
        self
    }

    /// Validate every component config; violations are fatal.
    pub fn validate(&self) -> AppResult<()> {
        if self.symbol.is_empty() {
            return Err(AppError::Config("symbol must not be empty".to_string()));
        }
        if self.nav <= Decimal::ZERO {
            return Err(AppError::Config("nav must be positive".to_string()));
        }
        self.stoikov.validate()?;
        self.risk.validate()?;
        self.exec.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        // Harmonization keeps the executor in lockstep with the quoting
        // ladder shape.
        assert_eq!(config.exec.ladder_levels, config.stoikov.ladder_levels);
        assert_eq!(config.exec.ttl_ms, config.stoikov.ttl_ms);
        assert_eq!(config.exec.session_ttl_ms, config.patient.max_session_ttl_ms);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = BotConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.symbol, config.symbol);
        assert_eq!(parsed.stoikov.ladder_levels, config.stoikov.ladder_levels);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
symbol = "ETHUSDT"

[stoikov]
gamma = 1.2
ladder_levels = 2
"#;
        let config: BotConfig = toml::from_str(toml_str).unwrap();
        let config = config.harmonized();
        assert_eq!(config.symbol, "ETHUSDT");
        assert!((config.stoikov.gamma - 1.2).abs() < f64::EPSILON);
        assert_eq!(config.exec.ladder_levels, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_gamma_rejected() {
        let toml_str = r#"
[stoikov]
gamma = 7.5
"#;
        let config: BotConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }
}
