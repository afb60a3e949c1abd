//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::retry::RetryPolicy;

/// Prefix of environment variables overriding file settings,
/// e.g. `TOLLGATE__RATE_LIMITING__MAX_REQUESTS=50`.
pub const ENV_PREFIX: &str = "TOLLGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Retry policy for upstream calls
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Length of the sliding window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests admitted per client within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// How often idle client logs are purged, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitingConfig {
    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_window_secs() -> u64 {
    15 * 60
}

fn default_max_requests() -> usize {
    100
}

fn default_sweep_interval() -> u64 {
    60
}

/// Result cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one, in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// How often expired entries are purged, in seconds
    #[serde(default = "default_cache_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_cache_sweep_interval(),
        }
    }
}

impl CacheConfig {
    /// The default TTL as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// The sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

// A fifth of the default TTL.
fn default_cache_sweep_interval() -> u64 {
    default_ttl_secs() / 5
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TOLLGATE__*` environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        Self::load_with_env(path, env)
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            let name = path
                .to_str()
                .ok_or_else(|| TollgateError::Config(format!("non UTF-8 config path: {}", path.display())))?;
            builder = builder.add_source(config::File::new(name, config::FileFormat::Yaml));
        }

        let config: TollgateConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the components cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.window_secs == 0 {
            return Err(TollgateError::Config("rate_limiting.window_secs must be positive".to_string()));
        }
        if self.rate_limiting.max_requests == 0 {
            return Err(TollgateError::Config("rate_limiting.max_requests must be positive".to_string()));
        }
        if self.rate_limiting.sweep_interval_secs == 0 || self.cache.sweep_interval_secs == 0 {
            return Err(TollgateError::Config("sweep intervals must be positive".to_string()));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(TollgateError::Config("cache.default_ttl_secs must be positive".to_string()));
        }
        self.retry
            .validate()
            .map_err(|e| TollgateError::Config(format!("retry: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        config::Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.rate_limiting.window(), Duration::from_secs(900));
        assert_eq!(config.rate_limiting.max_requests, 100);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
rate_limiting:
  max_requests: 10
retry:
  max_attempts: 5
  initial_delay_ms: 200
logging:
  format: json
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.max_requests, 10);
        assert_eq!(config.rate_limiting.window_secs, 900);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_yaml_invalid() {
        let err = TollgateConfig::from_yaml("rate_limiting: [1, 2]").unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = TollgateConfig::load_with_env(
            None,
            env(&[
                ("TOLLGATE__RATE_LIMITING__MAX_REQUESTS", "42"),
                ("TOLLGATE__CACHE__DEFAULT_TTL_SECS", "60"),
            ]),
        )
        .unwrap();

        assert_eq!(config.rate_limiting.max_requests, 42);
        assert_eq!(config.cache.default_ttl_secs, 60);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let result = TollgateConfig::load_with_env(None, env(&[("TOLLGATE__RETRY__BACKOFF_FACTOR", "0.5")]));
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = TollgateConfig::default();
        config.rate_limiting.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = TollgateConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = TollgateConfig::default();
        config.cache.default_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_missing_file() {
        let err = TollgateConfig::from_file("/nonexistent/tollgate.yaml").unwrap_err();
        assert!(matches!(err, TollgateError::Io(_)));
    }
}
