use crate::error::{DossierError, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Runtime settings recognized at startup. Every field has a default and an
/// environment override (`DOSSIER_` prefix, upper snake case).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_max_concurrent")]
    pub max_concurrent_queries_per_investigation: usize,

    #[serde(default = "Settings::default_query_timeout_sec")]
    pub default_query_timeout_sec: u64,

    #[serde(default = "Settings::default_max_duration_min")]
    pub max_investigation_duration_min: u32,

    #[serde(default = "Settings::default_cache_ttl_sec")]
    pub cache_ttl_sec: u64,

    /// Mandatory LRU size cap for the result cache.
    #[serde(default = "Settings::default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "Settings::default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "Settings::default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "Settings::default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "Settings::default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "Settings::default_backoff_jitter_frac")]
    pub backoff_jitter_frac: f64,

    #[serde(default = "Settings::default_rate_limit_per_hour")]
    pub rate_limit_default_per_hour: u32,

    /// Per-connector rate limit overrides keyed by source name.
    #[serde(default)]
    pub rate_limit_overrides: BTreeMap<String, u32>,

    /// Per-connector cache TTL overrides in seconds.
    #[serde(default)]
    pub cache_ttl_overrides_sec: BTreeMap<String, u64>,

    #[serde(default = "Settings::default_entity_confidence")]
    pub entity_confidence_threshold: u8,

    #[serde(default = "Settings::default_source_confidence")]
    pub source_confidence_threshold: u8,

    /// Capacity of the progress event bus.
    #[serde(default = "Settings::default_progress_capacity")]
    pub progress_channel_capacity: usize,

    /// Extra blocked-query patterns layered on top of the built-ins.
    #[serde(default)]
    pub blocked_query_patterns: Vec<String>,

    /// Connector API keys keyed by source name; never serialized back out.
    #[serde(default, skip_serializing)]
    pub connector_api_keys: BTreeMap<String, SecretString>,
}

impl Settings {
    fn default_max_concurrent() -> usize {
        16
    }
    fn default_query_timeout_sec() -> u64 {
        30
    }
    fn default_max_duration_min() -> u32 {
        120
    }
    fn default_cache_ttl_sec() -> u64 {
        3600
    }
    fn default_cache_max_entries() -> usize {
        10_000
    }
    fn default_retry_max_attempts() -> u32 {
        3
    }
    fn default_backoff_base_ms() -> u64 {
        500
    }
    fn default_backoff_factor() -> f64 {
        2.0
    }
    fn default_backoff_cap_ms() -> u64 {
        30_000
    }
    fn default_backoff_jitter_frac() -> f64 {
        0.2
    }
    fn default_rate_limit_per_hour() -> u32 {
        600
    }
    fn default_entity_confidence() -> u8 {
        70
    }
    fn default_source_confidence() -> u8 {
        60
    }
    fn default_progress_capacity() -> usize {
        64
    }

    /// Load settings from `DOSSIER_*` environment variables on top of
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(v) = read_env_parse("DOSSIER_MAX_CONCURRENT_QUERIES_PER_INVESTIGATION")? {
            settings.max_concurrent_queries_per_investigation = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_DEFAULT_QUERY_TIMEOUT_SEC")? {
            settings.default_query_timeout_sec = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_MAX_INVESTIGATION_DURATION_MIN")? {
            settings.max_investigation_duration_min = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_CACHE_TTL_SEC")? {
            settings.cache_ttl_sec = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_CACHE_MAX_ENTRIES")? {
            settings.cache_max_entries = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_RETRY_MAX_ATTEMPTS")? {
            settings.retry_max_attempts = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_BACKOFF_BASE_MS")? {
            settings.backoff_base_ms = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_BACKOFF_FACTOR")? {
            settings.backoff_factor = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_BACKOFF_CAP_MS")? {
            settings.backoff_cap_ms = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_BACKOFF_JITTER_FRAC")? {
            settings.backoff_jitter_frac = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_RATE_LIMIT_DEFAULT_PER_HOUR")? {
            settings.rate_limit_default_per_hour = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_ENTITY_CONFIDENCE_THRESHOLD")? {
            settings.entity_confidence_threshold = v;
        }
        if let Some(v) = read_env_parse("DOSSIER_SOURCE_CONFIDENCE_THRESHOLD")? {
            settings.source_confidence_threshold = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_queries_per_investigation == 0 {
            return Err(DossierError::Configuration(
                "max_concurrent_queries_per_investigation must be >= 1".into(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(DossierError::Configuration(
                "cache_max_entries is mandatory and must be >= 1".into(),
            ));
        }
        if !(1..=360).contains(&self.max_investigation_duration_min) {
            return Err(DossierError::Configuration(
                "max_investigation_duration_min must be in 1..=360".into(),
            ));
        }
        if self.backoff_factor < 1.0 {
            return Err(DossierError::Configuration(
                "backoff_factor must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter_frac) {
            return Err(DossierError::Configuration(
                "backoff_jitter_frac must be in 0..=1".into(),
            ));
        }
        if self.entity_confidence_threshold > 100 || self.source_confidence_threshold > 100 {
            return Err(DossierError::Configuration(
                "confidence thresholds must be in 0..=100".into(),
            ));
        }
        // extra blocked patterns must compile at startup, not mid-plan
        crate::security::BlockedPatterns::with_extra(self.blocked_query_patterns.iter().cloned())?;
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.default_query_timeout_sec)
    }

    pub fn investigation_deadline(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_investigation_duration_min) * 60)
    }

    pub fn cache_ttl_for(&self, source_name: &str) -> Duration {
        let secs = self
            .cache_ttl_overrides_sec
            .get(source_name)
            .copied()
            .unwrap_or(self.cache_ttl_sec);
        Duration::from_secs(secs)
    }

    pub fn rate_limit_for(&self, source_name: &str, declared: u32) -> u32 {
        self.rate_limit_overrides
            .get(source_name)
            .copied()
            .unwrap_or(if declared > 0 {
                declared
            } else {
                self.rate_limit_default_per_hour
            })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_queries_per_investigation: Self::default_max_concurrent(),
            default_query_timeout_sec: Self::default_query_timeout_sec(),
            max_investigation_duration_min: Self::default_max_duration_min(),
            cache_ttl_sec: Self::default_cache_ttl_sec(),
            cache_max_entries: Self::default_cache_max_entries(),
            retry_max_attempts: Self::default_retry_max_attempts(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_factor: Self::default_backoff_factor(),
            backoff_cap_ms: Self::default_backoff_cap_ms(),
            backoff_jitter_frac: Self::default_backoff_jitter_frac(),
            rate_limit_default_per_hour: Self::default_rate_limit_per_hour(),
            rate_limit_overrides: BTreeMap::new(),
            cache_ttl_overrides_sec: BTreeMap::new(),
            entity_confidence_threshold: Self::default_entity_confidence(),
            source_confidence_threshold: Self::default_source_confidence(),
            progress_channel_capacity: Self::default_progress_capacity(),
            blocked_query_patterns: Vec::new(),
            connector_api_keys: BTreeMap::new(),
        }
    }
}

fn read_env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            DossierError::Configuration(format!("invalid value for {}: {}", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_concurrent_queries_per_investigation, 16);
        assert_eq!(settings.cache_max_entries, 10_000);
        assert_eq!(settings.query_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_duration_bounds() {
        let mut settings = Settings::default();
        settings.max_investigation_duration_min = 0;
        assert!(settings.validate().is_err());
        settings.max_investigation_duration_min = 361;
        assert!(settings.validate().is_err());
        settings.max_investigation_duration_min = 360;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_blocked_pattern_rejected() {
        let mut settings = Settings::default();
        settings.blocked_query_patterns = vec!["(unclosed".into()];
        assert!(settings.validate().is_err());
        settings.blocked_query_patterns = vec![r"(?i)internal-term".into()];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_per_source_overrides() {
        let mut settings = Settings::default();
        settings
            .cache_ttl_overrides_sec
            .insert("crtsh".into(), 7200);
        settings.rate_limit_overrides.insert("hibp".into(), 10);

        assert_eq!(settings.cache_ttl_for("crtsh"), Duration::from_secs(7200));
        assert_eq!(settings.cache_ttl_for("other"), Duration::from_secs(3600));
        assert_eq!(settings.rate_limit_for("hibp", 100), 10);
        assert_eq!(settings.rate_limit_for("other", 100), 100);
        assert_eq!(settings.rate_limit_for("zero", 0), 600);
    }
}
