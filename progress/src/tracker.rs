use crate::entry_cache::EntryCache;
use crate::errors::ProgressError;
use crate::store::ProgressStore;
use crate::types::Project;
use std::sync::Arc;

struct TrackerInner {
    store: ProgressStore,
    cache: EntryCache,
    // Accepted for every project in addition to the project's own key.
    ultimate_api_key: Option<String>,
}

/// Handle to the progress store and its entry cache. Cheap to clone.
///
/// Ingestion, digest queries and structure changes are implemented on this
/// type in their own modules. All of them block on the store and should be
/// run off the async executor.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(store: ProgressStore, cache: EntryCache, ultimate_api_key: Option<String>) -> Self {
        Tracker {
            inner: Arc::new(TrackerInner {
                store,
                cache,
                ultimate_api_key: ultimate_api_key.filter(|key| !key.is_empty()),
            }),
        }
    }

    pub fn store(&self) -> &ProgressStore {
        &self.inner.store
    }

    pub fn cache(&self) -> &EntryCache {
        &self.inner.cache
    }

    pub fn validate_api_key(
        &self,
        api_key: Option<&str>,
        project: &Project,
    ) -> Result<(), ProgressError> {
        let Some(api_key) = api_key else {
            return Err(ProgressError::MissingApiKey);
        };

        let is_ultimate = self.inner.ultimate_api_key.as_deref() == Some(api_key);
        if is_ultimate || api_key == project.auth_key {
            Ok(())
        } else {
            tracing::info!(project = %project.slug, "rejected write with incorrect api key");
            Err(ProgressError::InvalidApiKey)
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.store.ping()
    }
}
