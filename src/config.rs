//! Engine settings, from code or from the environment.

use crate::aggregate::{FieldStatistics, DEFAULT_COVERAGE_THRESHOLD};
use crate::timezone::TargetZone;
use crate::upstream::aemet::{AemetClient, DEFAULT_BASE_URL};
use crate::upstream::retry::RetryPolicy;
use bon::Builder;
use log::info;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_RANGE_DAYS: i64 = 31;
/// Longest accepted query range; a century of observations.
pub const MAX_RANGE_DAYS_LIMIT: i64 = 36_500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable {var} has invalid value '{value}': {reason}")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Environment variable {0} is required")]
    MissingVar(&'static str),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Everything the engine can be tuned with. Every field has a default.
///
/// # Examples
///
/// ```
/// use antarctic_meteo::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::builder()
///     .cache_ttl(Duration::from_secs(3600))
///     .coverage_threshold(0.75)
///     .build();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.max_range_days, 31);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct EngineConfig {
    /// AEMET OpenData base endpoint.
    #[builder(default = DEFAULT_BASE_URL.to_string(), into)]
    pub base_url: String,
    /// AEMET API key. Only needed to build the HTTP upstream.
    #[builder(into)]
    pub api_key: Option<String>,
    /// Cache folder for the file store. Defaults to the platform cache dir.
    #[builder(into)]
    pub cache_dir: Option<PathBuf>,
    #[builder(default = DEFAULT_CACHE_TTL)]
    pub cache_ttl: Duration,
    #[builder(default = DEFAULT_EVICTION_INTERVAL)]
    pub eviction_interval: Duration,
    /// Entries fetched longer ago than this are removed even if unexpired.
    /// Zero disables retention-based eviction.
    #[builder(default = DEFAULT_RETENTION)]
    pub retention: Duration,
    #[builder(default = DEFAULT_COVERAGE_THRESHOLD)]
    pub coverage_threshold: f64,
    /// The upstream's nominal sampling interval.
    #[builder(default = DEFAULT_SAMPLING_INTERVAL)]
    pub sampling_interval: Duration,
    #[builder(default)]
    pub retry: RetryPolicy,
    /// Zone used when a query does not name one.
    #[builder(default = TargetZone::Named(chrono_tz::Europe::Madrid))]
    pub default_zone: TargetZone,
    #[builder(default = DEFAULT_MAX_RANGE_DAYS)]
    pub max_range_days: i64,
    #[builder(default)]
    pub statistics: FieldStatistics,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Loads a `.env` file if present, then reads configuration from the
    /// process environment. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparseable values or an inconsistent result.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`EngineConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = var("AEMET_BASE_URL") {
            config.base_url = url;
        }
        config.api_key = var("AEMET_API_KEY");
        config.cache_dir = var("METEO_CACHE_DIR").map(PathBuf::from);
        if let Some(secs) = parse_var::<u64>("METEO_CACHE_TTL_SECS", var("METEO_CACHE_TTL_SECS"))? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("METEO_EVICTION_INTERVAL_SECS", var("METEO_EVICTION_INTERVAL_SECS"))? {
            config.eviction_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("METEO_RETENTION_SECS", var("METEO_RETENTION_SECS"))? {
            config.retention = Duration::from_secs(secs);
        }
        if let Some(threshold) = parse_var::<f64>("METEO_COVERAGE_THRESHOLD", var("METEO_COVERAGE_THRESHOLD"))? {
            config.coverage_threshold = threshold;
        }
        if let Some(secs) = parse_var::<u64>("METEO_SAMPLING_INTERVAL_SECS", var("METEO_SAMPLING_INTERVAL_SECS"))? {
            config.sampling_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32>("METEO_RETRY_MAX_ATTEMPTS", var("METEO_RETRY_MAX_ATTEMPTS"))? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>("METEO_RETRY_BASE_DELAY_MS", var("METEO_RETRY_BASE_DELAY_MS"))? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("METEO_RETRY_MAX_DELAY_MS", var("METEO_RETRY_MAX_DELAY_MS"))? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(zone) = parse_var::<TargetZone>("METEO_DEFAULT_TIMEZONE", var("METEO_DEFAULT_TIMEZONE"))? {
            config.default_zone = zone;
        }
        if let Some(days) = parse_var::<i64>("METEO_MAX_RANGE_DAYS", var("METEO_MAX_RANGE_DAYS"))? {
            config.max_range_days = days;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues: Vec<String> = Vec::new();

        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            issues.push(format!(
                "coverage threshold must be within 0..=1, got {}",
                self.coverage_threshold
            ));
        }
        if self.cache_ttl.is_zero() {
            issues.push("cache TTL must be > 0".into());
        }
        if self.eviction_interval.is_zero() {
            issues.push("eviction interval must be > 0".into());
        }
        if self.sampling_interval.as_secs() == 0 {
            issues.push("sampling interval must be at least one second".into());
        }
        if self.retry.max_attempts == 0 {
            issues.push("retry attempts must be > 0".into());
        }
        if self.retry.max_delay < self.retry.base_delay {
            issues.push("retry max delay must be >= base delay".into());
        }
        if self.max_range_days <= 0 || self.max_range_days > MAX_RANGE_DAYS_LIMIT {
            issues.push(format!(
                "max range days must be within 1..={}, got {}",
                MAX_RANGE_DAYS_LIMIT, self.max_range_days
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    /// The HTTP upstream described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] when no API key is configured.
    pub fn aemet_client(&self) -> Result<AemetClient, ConfigError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingVar("AEMET_API_KEY"))?;
        Ok(AemetClient::new(&self.base_url, api_key))
    }

    /// The retention horizon, or `None` when disabled.
    pub fn retention_horizon(&self) -> Option<Duration> {
        (!self.retention.is_zero()).then_some(self.retention)
    }

    pub(crate) fn sampling_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.sampling_interval).unwrap_or_else(|_| chrono::Duration::minutes(10))
    }
}

fn parse_var<T>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|e| ConfigError::InvalidVar {
            var: name,
            value: value.clone(),
            reason: e.to_string(),
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.cache_ttl, Duration::from_secs(43_200));
        assert_eq!(config.retention, Duration::from_secs(43_200));
        assert_eq!(config.eviction_interval, Duration::from_secs(600));
        assert_eq!(config.coverage_threshold, 0.5);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.default_zone, TargetZone::parse("Europe/Madrid").unwrap());
        assert!(config.api_key.is_none());
        assert!(matches!(config.aemet_client(), Err(ConfigError::MissingVar("AEMET_API_KEY"))));
    }

    #[test]
    fn test_values_from_environment() -> Result<(), ConfigError> {
        let config = EngineConfig::from_lookup(lookup(&[
            ("AEMET_API_KEY", "abc"),
            ("METEO_CACHE_DIR", "/tmp/meteo"),
            ("METEO_CACHE_TTL_SECS", "60"),
            ("METEO_RETENTION_SECS", "0"),
            ("METEO_COVERAGE_THRESHOLD", "0.8"),
            ("METEO_RETRY_MAX_ATTEMPTS", "3"),
            ("METEO_RETRY_BASE_DELAY_MS", "100"),
            ("METEO_DEFAULT_TIMEZONE", "+02:00"),
            ("METEO_MAX_RANGE_DAYS", "7"),
        ]))?;

        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/meteo")));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.retention, Duration::ZERO);
        assert_eq!(config.coverage_threshold, 0.8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.default_zone, TargetZone::parse("+02:00").unwrap());
        assert_eq!(config.max_range_days, 7);
        assert!(config.aemet_client().is_ok());
        Ok(())
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("METEO_CACHE_TTL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "METEO_CACHE_TTL_SECS", .. }));

        let err = EngineConfig::from_lookup(lookup(&[("METEO_DEFAULT_TIMEZONE", "Mars/Olympus")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "METEO_DEFAULT_TIMEZONE", .. }));

        let err = EngineConfig::from_lookup(lookup(&[
            ("METEO_COVERAGE_THRESHOLD", "2"),
            ("METEO_EVICTION_INTERVAL_SECS", "0"),
        ]))
        .unwrap_err();
        match err {
            ConfigError::Invalid(issues) => assert_eq!(issues.len(), 2),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_max_range_days_is_bounded() {
        let config = EngineConfig::builder().max_range_days(MAX_RANGE_DAYS_LIMIT).build();
        assert!(config.validate().is_ok());

        for days in [0, -1, MAX_RANGE_DAYS_LIMIT + 1, i64::MAX] {
            let config = EngineConfig::builder().max_range_days(days).build();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "max_range_days {} was accepted",
                days
            );
        }

        let err = EngineConfig::from_lookup(lookup(&[("METEO_MAX_RANGE_DAYS", "9223372036854775807")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
