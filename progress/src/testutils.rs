use crate::entry_cache::{EntryCache, MokaEntryCache};
use crate::store::{ProgressStore, ProjectLinks};
use crate::tracker::Tracker;
use std::sync::Arc;

pub const SAMPLE_PROJECT: &str = "oot";
pub const SAMPLE_VERSION: &str = "us";
pub const SAMPLE_API_KEY: &str = "test_key_123";

/// Project `oot`, version `us` with categories `default` and `actors`.
pub fn seed_sample_store() -> ProgressStore {
    let store = ProgressStore::open_in_memory().unwrap();
    let project = store
        .create_project(
            SAMPLE_PROJECT,
            "Ocarina of Time",
            SAMPLE_API_KEY,
            &ProjectLinks::default(),
        )
        .unwrap();
    let version = store.create_version(&project, SAMPLE_VERSION, "US").unwrap();
    store
        .create_categories(&version, &[("actors".into(), "Actors".into())])
        .unwrap();
    store
}

pub fn sample_tracker() -> Tracker {
    Tracker::new(
        seed_sample_store(),
        EntryCache::new(Arc::new(MokaEntryCache::default())),
        None,
    )
}

pub fn sample_batch() -> serde_json::Value {
    serde_json::json!({
        "api_key": SAMPLE_API_KEY,
        "entries": [
            {
                "categories": {
                    "default": {
                        "code_matching": 103860,
                        "code_total": 4747584,
                        "asm": 4597948,
                        "nonmatching_functions_count": 49,
                        "assets_identified": 0,
                        "assets_total": 40816656,
                        "code_decompiled": 120152,
                        "assets_debinarised": 0
                    },
                    "actors": {
                        "code_matching": 103860,
                        "code_total": 4747584
                    }
                },
                "timestamp": 1615435438,
                "git_hash": "e788bfecbfb10afd4182332db99bb562ea75b1de"
            }
        ]
    })
}
