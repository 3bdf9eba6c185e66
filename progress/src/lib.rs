pub mod api;
pub mod config;
pub mod digest;
pub mod entry_cache;
pub mod errors;
pub mod hierarchy;
pub mod ingest;
pub mod metrics_defs;
pub mod shield;
pub mod store;
pub mod structure;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod testutils;

use config::{Config, ValidationError};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use store::{ProgressStore, StoreError};
use tracker::Tracker;

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Api(#[from] api::ApiError),
}

/// Opens the database and builds the tracker described by `config`.
pub fn open_tracker(config: &Config) -> Result<Tracker, ServeError> {
    config.validate()?;
    let store = ProgressStore::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "opened progress database");

    Ok(Tracker::new(
        store,
        config.cache.build(),
        config.ultimate_api_key.clone(),
    ))
}

/// Serves the API and the admin probes until either listener fails.
pub async fn run(config: Config) -> Result<(), ServeError> {
    let tracker = open_tracker(&config)?;

    let ready = tracker.clone();
    let admin = AdminService::<_, ServeError>::new(move || ready.is_ready());

    let api_task = async {
        api::serve(&config.listener, tracker)
            .await
            .map_err(ServeError::from)
    };
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin,
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_tracker_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database: config::Database {
                path: dir.path().join("nested").join("db.sqlite3"),
            },
            ..Default::default()
        };

        let tracker = open_tracker(&config).unwrap();
        assert!(tracker.is_ready());
        assert!(tracker.list_projects().unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = Config::default();
        config.admin_listener.port = 0;
        assert!(matches!(
            open_tracker(&config),
            Err(ServeError::Config(ValidationError::InvalidPort))
        ));
    }
}
