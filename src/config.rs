use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::UsageError;

pub const DEFAULT_CONCURRENCY: usize = 6;
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";

/// Retry policy for network calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, the first one included (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms")]
    pub initial_delay: Duration,

    /// Upper bound for a single backoff delay (default: 30 s)
    #[serde(default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Everything a batch run needs to know besides the urls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory; every album gets its own subdirectory below it
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Network operations allowed in flight at once, across all albums
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,

    #[serde(default = "default_connect_timeout", with = "duration_ms")]
    pub connect_timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrency: DEFAULT_CONCURRENCY,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, UsageError> {
        let data = std::fs::read(path).map_err(|err| UsageError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let config: Config = serde_json::from_slice(&data).map_err(|err| UsageError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        config.validate().map_err(|reason| UsageError::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be positive".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be positive".to_string());
        }
        if !(self.retry.backoff_multiplier > 0.0) {
            return Err("retry.backoff_multiplier must be positive".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("request_timeout must be positive".to_string());
        }
        Ok(())
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
