//! Sync configuration module
//!
//! Provides [`SyncConfig`], its builder, and loading from a TOML file with
//! `DOUBLECHECK_*` environment overrides.
//!
//! # Sources
//!
//! Values are resolved in order: built-in defaults, then the TOML file (if
//! any), then environment variables. Every field is optional in the file.
//!
//! ```toml
//! max_attempts = 5
//! base_delay_ms = 2000
//! supabase_url = "https://project.supabase.co"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "DOUBLECHECK_";

/// Offline queue and sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts before an action is marked failed
    pub max_attempts: u32,
    /// Backoff base delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Jitter fraction applied to each delay (0.2 = ±20%)
    pub jitter: f64,
    /// Upper bound for a single executor call in milliseconds
    pub executor_timeout_ms: u64,
    /// Executions allowed to run at once during a drain
    pub max_concurrent: usize,
    /// Period of the background drain timer, 0 disables it
    pub drain_interval_secs: u64,
    /// Spawn a timer that drains again when a retry becomes due
    pub schedule_retries: bool,
    /// SQLite file holding the queue
    pub database_path: Option<PathBuf>,
    /// Supabase project URL
    pub supabase_url: Option<String>,
    /// Supabase API key
    pub supabase_key: Option<String>,
    /// Storage bucket for inspection photos
    pub photo_bucket: String,
    /// Period of the connectivity probe
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.2,
            executor_timeout_ms: 30_000,
            max_concurrent: 4,
            drain_interval_secs: 60,
            schedule_retries: true,
            database_path: None,
            supabase_url: None,
            supabase_key: None,
            photo_bucket: "inspection-media".to_string(),
            probe_interval_secs: 15,
        }
    }
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Defaults, then `path` if it exists, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOUBLECHECK_*` overrides from an iterator of variables
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "MAX_ATTEMPTS" => self.max_attempts = parse_env(name, &value)?,
                "BASE_DELAY_MS" => self.base_delay_ms = parse_env(name, &value)?,
                "MAX_DELAY_MS" => self.max_delay_ms = parse_env(name, &value)?,
                "JITTER" => self.jitter = parse_env(name, &value)?,
                "EXECUTOR_TIMEOUT_MS" => self.executor_timeout_ms = parse_env(name, &value)?,
                "MAX_CONCURRENT" => self.max_concurrent = parse_env(name, &value)?,
                "DRAIN_INTERVAL_SECS" => self.drain_interval_secs = parse_env(name, &value)?,
                "SCHEDULE_RETRIES" => self.schedule_retries = parse_env(name, &value)?,
                "DATABASE_PATH" => self.database_path = Some(PathBuf::from(value)),
                "SUPABASE_URL" => self.supabase_url = Some(value),
                "SUPABASE_KEY" => self.supabase_key = Some(value),
                "PHOTO_BUCKET" => self.photo_bucket = value,
                "PROBE_INTERVAL_SECS" => self.probe_interval_secs = parse_env(name, &value)?,
                _ => tracing::debug!(variable = %key, "Ignoring unknown config variable"),
            }
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1"));
        }
        if self.base_delay_ms == 0 || self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid(
                "backoff requires 0 < base_delay_ms <= max_delay_ms",
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid("jitter must be in [0, 1)"));
        }
        if self.executor_timeout_ms == 0 {
            return Err(ConfigError::Invalid("executor_timeout_ms must be positive"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be at least 1"));
        }
        if let Some(url) = &self.supabase_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        Ok(())
    }

    /// Executor call timeout
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    /// Background drain period, `None` when disabled
    pub fn drain_interval(&self) -> Option<Duration> {
        (self.drain_interval_secs > 0).then(|| Duration::from_secs(self.drain_interval_secs))
    }

    /// Configured database file, or the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
            path.push("doublecheck");
            path.push("queue.db");
            path
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string(), value.to_string()))
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Set the attempt limit
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set backoff base and ceiling
    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.base_delay_ms = base.as_millis() as u64;
        self.config.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set the jitter fraction
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Set the executor timeout
    pub fn executor_timeout(mut self, timeout: Duration) -> Self {
        self.config.executor_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set drain parallelism
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    /// Set the background drain period in seconds
    pub fn drain_interval_secs(mut self, secs: u64) -> Self {
        self.config.drain_interval_secs = secs;
        self
    }

    /// Enable or disable retry timers
    pub fn schedule_retries(mut self, enabled: bool) -> Self {
        self.config.schedule_retries = enabled;
        self
    }

    /// Set the database file
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    /// Set Supabase credentials
    pub fn supabase(mut self, url: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.supabase_url = Some(url.into());
        self.config.supabase_key = Some(key.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("failed to read config: {0}")]
    Io(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
