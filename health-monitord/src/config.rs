use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Target length of one scheduling cycle
    #[serde(default = "default_cycle_period")]
    pub cycle_period_secs: u64,
    /// Poll cadence for services that registered without their own interval
    #[serde(default = "default_interval")]
    pub default_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Error rate above which a responding service is degraded
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_cycle_period() -> u64 {
    10
}

fn default_interval() -> u64 {
    10
}

fn default_workers() -> usize {
    5
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    2
}

fn default_error_threshold() -> f64 {
    0.2
}

fn default_health_path() -> String {
    shared::protocol::HEALTH_PATH.to_string()
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            cycle_period_secs: default_cycle_period(),
            default_interval_secs: default_interval(),
            workers: default_workers(),
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
            error_threshold: default_error_threshold(),
            health_path: default_health_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl PollerConfig {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.cycle_period_secs)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;

        if config.poller.workers == 0 {
            anyhow::bail!("poller.workers must be at least 1");
        }
        if config.poller.cycle_period_secs == 0 {
            anyhow::bail!("poller.cycle_period_secs must be at least 1");
        }
        if config.poller.request_timeout_ms == 0 {
            anyhow::bail!("poller.request_timeout_ms must be at least 1");
        }
        let threshold = config.poller.error_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            anyhow::bail!("poller.error_threshold must be a non-negative number, got {}", threshold);
        }

        Ok(config)
    }
}
