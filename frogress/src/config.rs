use progress::config::Config as ProgressConfig;
use serde::Deserialize;
use std::fs::File;

/// Overrides `progress.ultimate_api_key` when set.
pub const ULTIMATE_API_KEY_ENV: &str = "ULTIMATE_API_KEY";

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let mut config: Config = serde_yaml::from_reader(file)?;
        config.override_ultimate_api_key(std::env::var(ULTIMATE_API_KEY_ENV).ok());

        Ok(config)
    }

    fn override_ultimate_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|key| !key.is_empty()) {
            self.progress.ultimate_api_key = Some(key);
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
