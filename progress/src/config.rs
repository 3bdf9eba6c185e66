use crate::entry_cache::{DEFAULT_CAPACITY, DEFAULT_TTL, EntryCache, MokaEntryCache};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn with_port(port: u16) -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_listener() -> Listener {
    Listener::with_port(8000)
}

fn default_admin_listener() -> Listener {
    Listener::with_port(8001)
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Database {
    pub path: PathBuf,
}

impl Default for Database {
    fn default() -> Self {
        Database {
            path: PathBuf::from("frogress.sqlite3"),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            ttl_secs: DEFAULT_TTL.as_secs(),
            max_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn build(&self) -> EntryCache {
        if self.enabled {
            EntryCache::new(Arc::new(MokaEntryCache::new(
                Duration::from_secs(self.ttl_secs),
                self.max_capacity,
            )))
        } else {
            EntryCache::disabled()
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_listener")]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub database: Database,
    /// Accepted as the api key of every project.
    pub ultimate_api_key: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: default_listener(),
            admin_listener: default_admin_listener(),
            database: Database::default(),
            ultimate_api_key: None,
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.cache.enabled && (self.cache.ttl_secs == 0 || self.cache.max_capacity == 0) {
            return Err(ValidationError::InvalidCache);
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("listener port must be non-zero")]
    InvalidPort,
    #[error("cache ttl_secs and max_capacity must be non-zero")]
    InvalidCache,
}
