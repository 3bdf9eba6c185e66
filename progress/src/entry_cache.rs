//! Read-through cache of full entry histories, keyed by
//! `(project, version, category)` slugs.
//!
//! The cache only ever holds results computed from the store. A backend that
//! fails is logged and treated as a miss.
use crate::metrics_defs::{ENTRY_CACHE_ERROR, ENTRY_CACHE_HIT, ENTRY_CACHE_MISS};
use crate::types::Entry;
use moka::sync::Cache;
use parking_lot::Mutex;
use shared::counter;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_CAPACITY: u64 = 10_000;

pub type CachedEntries = Arc<Vec<Entry>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project: String,
    pub version: String,
    pub category: String,
}

impl CacheKey {
    pub fn new(project: &str, version: &str, category: &str) -> Self {
        CacheKey {
            project: project.to_string(),
            version: version.to_string(),
            category: category.to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

pub trait EntryCacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntries>, CacheError>;
    fn set(&self, key: CacheKey, entries: CachedEntries) -> Result<(), CacheError>;
    fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;
}

/// In-process backend with a fixed time to live per slot.
pub struct MokaEntryCache {
    cache: Cache<CacheKey, CachedEntries>,
}

impl MokaEntryCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        MokaEntryCache { cache }
    }
}

impl Default for MokaEntryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl EntryCacheBackend for MokaEntryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntries>, CacheError> {
        Ok(self.cache.get(key))
    }

    fn set(&self, key: CacheKey, entries: CachedEntries) -> Result<(), CacheError> {
        self.cache.insert(key, entries);
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.cache.invalidate(key);
        Ok(())
    }
}

/// Backend that never stores anything. Every read goes to the store.
pub struct NoopEntryCache {}

impl EntryCacheBackend for NoopEntryCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CachedEntries>, CacheError> {
        Ok(None)
    }

    fn set(&self, _key: CacheKey, _entries: CachedEntries) -> Result<(), CacheError> {
        Ok(())
    }

    fn delete(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Ok(())
    }
}

pub struct EntryCache {
    backend: Arc<dyn EntryCacheBackend>,
    // Bumped on every invalidation. A reader only populates a slot if no
    // invalidation happened since it captured the generation.
    generation: AtomicU64,
    // Store writes that started and have not finished invalidating.
    in_flight: AtomicUsize,
    // Serializes "check generation then set" against "bump then delete".
    write_lock: Mutex<()>,
}

impl EntryCache {
    pub fn new(backend: Arc<dyn EntryCacheBackend>) -> Self {
        EntryCache {
            backend,
            generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopEntryCache {}))
    }

    /// Capture before reading from the store; pass to [`EntryCache::set`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Like [`EntryCache::generation`], but `None` while a store write is
    /// between [`EntryCache::begin_write`] and the drop of its guard. A reader
    /// combining several slots may trust them only if this returned `Some`
    /// and the generation is unchanged once it is done.
    pub fn stable_generation(&self) -> Option<u64> {
        let generation = self.generation.load(Ordering::SeqCst);
        (self.in_flight.load(Ordering::SeqCst) == 0).then_some(generation)
    }

    /// Call before a store write that touches cached histories. Keep the guard
    /// until the write is committed and its slots are invalidated.
    pub fn begin_write(&self) -> PendingWrite<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        PendingWrite { cache: self }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedEntries> {
        match self.backend.get(key) {
            Ok(Some(entries)) => {
                counter!(ENTRY_CACHE_HIT).increment(1);
                Some(entries)
            }
            Ok(None) => {
                counter!(ENTRY_CACHE_MISS).increment(1);
                None
            }
            Err(e) => {
                counter!(ENTRY_CACHE_ERROR).increment(1);
                tracing::warn!(error = %e, ?key, "entry cache read failed, reading from store");
                None
            }
        }
    }

    /// Stores `entries` unless the cache was invalidated after
    /// `read_generation` was captured. Returns whether the slot was written.
    pub fn set(&self, key: CacheKey, entries: CachedEntries, read_generation: u64) -> bool {
        let _guard = self.write_lock.lock();
        if self.generation.load(Ordering::Acquire) != read_generation {
            tracing::debug!(?key, "skipping cache fill after concurrent invalidation");
            return false;
        }

        match self.backend.set(key, entries) {
            Ok(()) => true,
            Err(e) => {
                counter!(ENTRY_CACHE_ERROR).increment(1);
                tracing::warn!(error = %e, "entry cache write failed");
                false
            }
        }
    }

    /// Drops the slot of every distinct category in `categories`.
    pub fn invalidate<'a, I>(&self, project: &str, version: &str, categories: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = categories.into_iter().collect();

        let _guard = self.write_lock.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);

        for category in distinct {
            let key = CacheKey::new(project, version, category);
            if let Err(e) = self.backend.delete(&key) {
                counter!(ENTRY_CACHE_ERROR).increment(1);
                tracing::error!(error = %e, ?key, "entry cache invalidation failed");
            }
        }
    }
}

/// A store write in progress, see [`EntryCache::begin_write`].
#[must_use]
pub struct PendingWrite<'a> {
    cache: &'a EntryCache,
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        self.cache.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn entries(git_hash: &str) -> CachedEntries {
        Arc::new(vec![Entry {
            timestamp: 1,
            git_hash: git_hash.into(),
            measures: Default::default(),
        }])
    }

    /// Backend that fails every call.
    pub(crate) struct BrokenEntryCache {
        pub calls: AtomicUsize,
    }

    impl EntryCacheBackend for BrokenEntryCache {
        fn get(&self, _key: &CacheKey) -> Result<Option<CachedEntries>, CacheError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(CacheError::Unavailable("down".into()))
        }

        fn set(&self, _key: CacheKey, _entries: CachedEntries) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(CacheError::Unavailable("down".into()))
        }

        fn delete(&self, _key: &CacheKey) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[test]
    fn set_get_invalidate() {
        let cache = EntryCache::new(Arc::new(MokaEntryCache::default()));
        let key = CacheKey::new("oot", "us", "default");
        assert!(cache.get(&key).is_none());

        assert!(cache.set(key.clone(), entries("a"), cache.generation()));
        assert_eq!(cache.get(&key).unwrap()[0].git_hash, "a");

        cache.invalidate("oot", "us", ["actors"]);
        assert!(cache.get(&key).is_some());

        cache.invalidate("oot", "us", ["default", "default"]);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn stale_fill_is_rejected() {
        let cache = EntryCache::new(Arc::new(MokaEntryCache::default()));
        let key = CacheKey::new("oot", "us", "default");

        let read_generation = cache.generation();
        cache.invalidate("oot", "us", ["default"]);

        assert!(!cache.set(key.clone(), entries("stale"), read_generation));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn pending_write_unsettles_generation() {
        let cache = EntryCache::new(Arc::new(MokaEntryCache::default()));
        let before = cache.stable_generation().unwrap();

        let write = cache.begin_write();
        assert_eq!(cache.stable_generation(), None);
        let during = cache.generation();
        assert_ne!(during, before);

        let nested = cache.begin_write();
        drop(write);
        assert_eq!(cache.stable_generation(), None);
        drop(nested);

        let after = cache.stable_generation().unwrap();
        assert_ne!(after, during);

        let key = CacheKey::new("oot", "us", "default");
        assert!(!cache.set(key.clone(), entries("a"), before));
        assert!(!cache.set(key.clone(), entries("a"), during));
        assert!(cache.set(key, entries("a"), after));
    }

    #[test]
    fn expires_after_ttl() {
        let cache = EntryCache::new(Arc::new(MokaEntryCache::new(
            Duration::from_millis(50),
            DEFAULT_CAPACITY,
        )));
        let key = CacheKey::new("oot", "us", "default");
        cache.set(key.clone(), entries("a"), cache.generation());
        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn broken_backend_degrades_to_miss() {
        let backend = Arc::new(BrokenEntryCache {
            calls: AtomicUsize::new(0),
        });
        let cache = EntryCache::new(backend.clone());
        let key = CacheKey::new("oot", "us", "default");

        assert!(cache.get(&key).is_none());
        assert!(!cache.set(key, entries("a"), cache.generation()));
        cache.invalidate("oot", "us", ["default"]);
        assert_eq!(backend.calls.load(Ordering::Relaxed), 3);
    }
}
