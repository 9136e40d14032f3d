use std::collections::HashMap;
use std::path::Path;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Address the monitor should use to reach this service
    pub public_url: String,
    /// Chance that a health request fails with a 500
    #[serde(default)]
    pub error_probability: f64,
    #[serde(default = "default_error_message")]
    pub error_message: String,
    /// Reported in every health response
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_url")]
    pub url: String,
    #[serde(default)]
    pub poll_interval_sec: u64,
    /// Sent once with the registration
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

fn default_listen() -> String {
    "0.0.0.0:9001".to_string()
}

fn default_error_message() -> String {
    "temporary error".to_string()
}

fn default_monitor_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            url: default_monitor_url(),
            poll_interval_sec: 0,
            attributes: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if !(0.0..=1.0).contains(&config.service.error_probability) {
            anyhow::bail!(
                "service.error_probability must be between 0 and 1, got {}",
                config.service.error_probability
            );
        }

        Ok(config)
    }
}
