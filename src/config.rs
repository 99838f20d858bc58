use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::data::fetcher::RetryPolicy;

/// Runtime settings for acquisition and persistence.
///
/// Loaded in three layers, later ones winning:
///
/// 1. built-in defaults
/// 2. the TOML file named by `TRENDS_CONFIG`, if set
/// 3. individual environment overrides
///
/// | Env Var | Default | Purpose |
/// |---------|---------|---------|
/// | `TRENDS_CONFIG` | (none) | Path to a TOML settings file |
/// | `DATA_ROOT` | `~/.trendstitch/datasets` | Dataset root directory |
/// | `TRENDS_HL` | `en-US` | Host language sent with every query |
/// | `TRENDS_TZ` | `240` | Timezone offset in minutes west of UTC |
/// | `TRENDS_PACE` | `5` | Upper bound in seconds of the post-query random pause |
/// | `TRENDS_MAX_ATTEMPTS` | (unbounded) | Query attempts before a fetch gives up |
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    pub data_root: PathBuf,
    pub hl: String,
    pub tz: i32,
    /// Earliest date the service has data for; database baselines start here.
    pub history_start: NaiveDate,
    /// Widest low-precision chunk, in months.
    pub max_span_months: u32,
    pub pace_secs: f64,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_secs: u64,
    pub increment_secs: u64,
    pub max_attempts: Option<u32>,
    pub max_elapsed_secs: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            increment_secs: 5,
            max_attempts: None,
            max_elapsed_secs: None,
        }
    }
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            hl: "en-US".to_string(),
            tz: 240,
            history_start: NaiveDate::from_ymd_opt(2004, 1, 1).unwrap_or(NaiveDate::MIN),
            max_span_months: 8,
            pace_secs: 5.0,
            request_timeout_secs: 60,
            retry: RetrySettings::default(),
        }
    }
}

impl TrendsConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("TRENDS_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {path}"))?;
                Self::from_toml_str(&raw).with_context(|| format!("Invalid config file: {path}"))?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup("DATA_ROOT") {
            self.data_root = PathBuf::from(root);
        }
        if let Some(hl) = lookup("TRENDS_HL") {
            self.hl = hl;
        }
        if let Some(tz) = lookup("TRENDS_TZ") {
            self.tz = tz
                .parse()
                .with_context(|| format!("TRENDS_TZ is not an integer: {tz}"))?;
        }
        if let Some(pace) = lookup("TRENDS_PACE") {
            self.pace_secs = pace
                .parse()
                .with_context(|| format!("TRENDS_PACE is not a number: {pace}"))?;
        }
        if let Some(max) = lookup("TRENDS_MAX_ATTEMPTS") {
            self.retry.max_attempts = Some(
                max.parse()
                    .with_context(|| format!("TRENDS_MAX_ATTEMPTS is not a count: {max}"))?,
            );
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.retry.base_delay_secs),
            increment: Duration::from_secs(self.retry.increment_secs),
            max_attempts: self.retry.max_attempts,
            max_elapsed: self.retry.max_elapsed_secs.map(Duration::from_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Default dataset root: `~/.trendstitch/datasets`
fn default_data_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".trendstitch").join("datasets"),
        // No home directory available; fall back to a tmp-based path
        _ => std::env::temp_dir().join("trendstitch").join("datasets"),
    }
}
