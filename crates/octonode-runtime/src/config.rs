use std::time::Duration;

use octonode_state::{DEFAULT_WATCH_CAPACITY, RetryPolicy, WatchOptions};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub runtime: SchedulerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default derived via field defaults

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Scheduler validations
        if self.runtime.debounce_ms == 0 {
            return Err("runtime.debounce_ms must be > 0".into());
        }
        if self.runtime.backoff_initial_ms == 0 || self.runtime.backoff_max_ms == 0 {
            return Err("runtime backoffs must be > 0".into());
        }
        if self.runtime.backoff_initial_ms > self.runtime.backoff_max_ms {
            return Err("runtime.backoff_initial_ms must be <= runtime.backoff_max_ms".into());
        }
        // Retry validations
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".into());
        }
        if self.retry.backoff_ms == 0 {
            return Err("retry.backoff_ms must be > 0".into());
        }
        if self.watch.capacity == 0 {
            return Err("watch.capacity must be > 0".into());
        }
        if EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(format!("logging.level '{}' is not a valid filter", self.logging.level));
        }
        Ok(())
    }

    /// Configuration with short timings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            runtime: SchedulerSettings {
                debounce_ms: 5,
                backoff_initial_ms: 10,
                backoff_max_ms: 200,
                reconcile_timeout_ms: 0,
            },
            retry: RetrySettings {
                max_attempts: 10,
                backoff_ms: 1,
            },
            ..Default::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.runtime.debounce_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.runtime.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.runtime.backoff_max_ms)
    }

    /// Per-pass limit; `None` when `reconcile_timeout_ms` is zero.
    pub fn reconcile_timeout(&self) -> Option<Duration> {
        match self.runtime.reconcile_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts)
            .with_backoff(Duration::from_millis(self.retry.backoff_ms))
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions::with_capacity(self.watch.capacity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Quantum during which triggering events collapse into one pass.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// 0 disables the per-pass timeout.
    #[serde(default)]
    pub reconcile_timeout_ms: u64,
}
fn default_debounce_ms() -> u64 {
    20
}
fn default_backoff_initial_ms() -> u64 {
    100
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            reconcile_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}
fn default_max_attempts() -> u32 {
    RetryPolicy::DEFAULT_MAX_ATTEMPTS
}
fn default_retry_backoff_ms() -> u64 {
    5
}
impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchSettings {
    #[serde(default = "default_watch_capacity")]
    pub capacity: usize,
}
fn default_watch_capacity() -> usize {
    DEFAULT_WATCH_CAPACITY
}
impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            capacity: default_watch_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::RuntimeConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "octonode.toml";

    pub fn load_config(path: Option<&str>) -> Result<RuntimeConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., OCTONODE__RUNTIME__DEBOUNCE_MS=50
        builder = builder.add_source(
            Environment::with_prefix("OCTONODE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: RuntimeConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<RuntimeConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml_string(config: &RuntimeConfig) -> Result<String, String> {
        toml::to_string_pretty(config).map_err(|e| format!("config serialize error: {e}"))
    }
}
