//! Entry ingestion: schema validation, atomic persistence and cache
//! invalidation for batches of measurements.
use crate::errors::ProgressError;
use crate::hierarchy::{resolve_project, resolve_version};
use crate::metrics_defs::{ENTRIES_WRITTEN, INGEST_DURATION, INGEST_REJECTED, MEASURES_WRITTEN};
use crate::store::StoreError;
use crate::tracker::Tracker;
use crate::types::{GIT_HASH_MAX_LEN, NewEntry, RowId};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::time::Instant;

/// Body of `POST /data/{project}/{version}/`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEntriesRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    pub entries: Vec<EntryPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryPayload {
    pub timestamp: i64,
    pub git_hash: String,
    /// Category slug to measure name to value. Values are checked to be
    /// integers once the category is known to exist.
    pub categories: IndexMap<String, IndexMap<String, Value>>,
}

impl CreateEntriesRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, ProgressError> {
        let request: CreateEntriesRequest = serde_json::from_slice(body)
            .map_err(|e| ProgressError::invalid_data(format!("Invalid request body: {e}")))?;

        if request.entries.is_empty() {
            return Err(ProgressError::invalid_data("entries must not be empty"));
        }

        for entry in &request.entries {
            if entry.git_hash.chars().count() > GIT_HASH_MAX_LEN {
                return Err(ProgressError::invalid_data(format!(
                    "git_hash '{}' is longer than {GIT_HASH_MAX_LEN} characters",
                    entry.git_hash
                )));
            }
        }

        Ok(request)
    }

    /// Distinct category slugs referenced anywhere in the batch.
    pub fn touched_categories(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .flat_map(|entry| entry.categories.keys().map(String::as_str))
    }
}

fn measure_value(category: &str, measure: &str, value: &Value) -> Result<i64, ProgressError> {
    if let Value::Number(number) = value
        && let Some(value) = number.as_i64()
    {
        return Ok(value);
    }

    Err(ProgressError::invalid_data(format!(
        "{category}:{measure} must be an integer, not {}: {value}",
        json_type_name(value)
    )))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "out of range integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Tracker {
    /// Validates and writes a batch of entries for one version. Returns the
    /// number of rows written (entries plus measures).
    ///
    /// Nothing is written unless the whole batch is valid and commits.
    pub fn create_entries(
        &self,
        project_slug: &str,
        version_slug: &str,
        request: &CreateEntriesRequest,
    ) -> Result<usize, ProgressError> {
        let started = Instant::now();
        let result = self.write_entries(project_slug, version_slug, request);
        histogram!(INGEST_DURATION).record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            counter!(INGEST_REJECTED).increment(1);
            tracing::info!(
                project = project_slug,
                version = version_slug,
                error = %e,
                "rejected entry batch"
            );
        }

        result
    }

    fn write_entries(
        &self,
        project_slug: &str,
        version_slug: &str,
        request: &CreateEntriesRequest,
    ) -> Result<usize, ProgressError> {
        let store = self.store();

        let project = resolve_project(store, project_slug).map_err(|_| {
            ProgressError::invalid_data(format!("Project '{project_slug}' does not exist"))
        })?;

        self.validate_api_key(request.api_key.as_deref(), &project)?;

        let version = resolve_version(store, &project, version_slug).map_err(|_| {
            ProgressError::invalid_data(format!("Version '{version_slug}' does not exist"))
        })?;

        let mut categories: HashMap<&str, RowId> = HashMap::new();
        let mut rows = Vec::new();

        for entry in &request.entries {
            for (slug, measures) in &entry.categories {
                let category_id = match categories.get(slug.as_str()) {
                    Some(id) => *id,
                    None => {
                        let category = store.category(&version, slug)?.ok_or_else(|| {
                            ProgressError::invalid_data(format!("Category '{slug}' does not exist"))
                        })?;
                        categories.insert(slug.as_str(), category.id);
                        category.id
                    }
                };

                let measures = measures
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), measure_value(slug, name, value)?)))
                    .collect::<Result<Vec<_>, ProgressError>>()?;

                rows.push(NewEntry {
                    category_id,
                    timestamp: entry.timestamp,
                    git_hash: entry.git_hash.clone(),
                    measures,
                });
            }
        }

        let pending = self.cache().begin_write();
        let written = store.insert_entries(&rows).map_err(|e| match e {
            StoreError::Integrity(message) => {
                ProgressError::invalid_data(format!("Integrity error: {message}"))
            }
            other => ProgressError::Store(other),
        })?;

        // Only after commit, so no reader can cache the pre-write state.
        self.cache()
            .invalidate(project_slug, version_slug, request.touched_categories());
        drop(pending);

        let measures: usize = rows.iter().map(|row| row.row_count() - 1).sum();
        counter!(ENTRIES_WRITTEN).increment(rows.len() as u64);
        counter!(MEASURES_WRITTEN).increment(measures as u64);
        tracing::info!(
            project = project_slug,
            version = version_slug,
            wrote = written,
            "wrote entry batch"
        );

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry_cache::CacheKey;
    use crate::testutils::{SAMPLE_API_KEY, sample_batch, sample_tracker};
    use serde_json::json;

    fn request(value: Value) -> CreateEntriesRequest {
        CreateEntriesRequest::from_json(value.to_string().as_bytes()).unwrap()
    }

    fn actors_entry(timestamp: i64, git_hash: &str) -> Value {
        json!({
            "timestamp": timestamp,
            "git_hash": git_hash,
            "categories": {"actors": {"code_matching": 1, "code_total": 2}}
        })
    }

    #[test]
    fn writes_sample_batch() {
        let tracker = sample_tracker();
        let written = tracker
            .create_entries("oot", "us", &request(sample_batch()))
            .unwrap();

        assert_eq!(written, 12);
        assert_eq!(tracker.store().row_counts().unwrap(), (2, 10));
    }

    #[test]
    fn count_is_entries_times_categories_plus_measures() {
        let tracker = sample_tracker();
        let batch = json!({
            "api_key": SAMPLE_API_KEY,
            "entries": [
                {"timestamp": 1, "git_hash": "a", "categories": {
                    "default": {"m": 1},
                    "actors": {"m": 1, "n": 2, "o": 3}
                }},
                {"timestamp": 2, "git_hash": "b", "categories": {
                    "default": {},
                    "actors": {"m": 5}
                }},
                {"timestamp": 3, "git_hash": "c", "categories": {}}
            ]
        });

        // 4 entry rows and 5 measure rows
        assert_eq!(tracker.create_entries("oot", "us", &request(batch)).unwrap(), 9);
        assert_eq!(tracker.store().row_counts().unwrap(), (4, 5));
    }

    #[test]
    fn count_holds_for_every_batch_shape() {
        // (entries, measures written per entry to each category)
        let shapes: Vec<(usize, Vec<(&str, usize)>)> = vec![
            (1, vec![("default", 0)]),
            (1, vec![("actors", 3)]),
            (2, vec![]),
            (2, vec![("default", 1), ("actors", 2)]),
            (3, vec![("default", 0), ("actors", 0)]),
            (5, vec![("actors", 1), ("default", 4)]),
        ];

        for (n, categories) in shapes {
            let tracker = sample_tracker();
            let entries: Vec<Value> = (0..n)
                .map(|i| {
                    let touched: serde_json::Map<String, Value> = categories
                        .iter()
                        .map(|(slug, count)| {
                            let measures: serde_json::Map<String, Value> =
                                (0..*count).map(|m| (format!("m{m}"), json!(m))).collect();
                            (slug.to_string(), Value::Object(measures))
                        })
                        .collect();
                    json!({"timestamp": i, "git_hash": format!("h{i}"), "categories": touched})
                })
                .collect();
            let batch = json!({"api_key": SAMPLE_API_KEY, "entries": entries});

            let entry_rows = n * categories.len();
            let measure_rows = n * categories.iter().map(|(_, count)| count).sum::<usize>();
            let written = tracker.create_entries("oot", "us", &request(batch)).unwrap();
            assert_eq!(written, entry_rows + measure_rows, "{n} x {categories:?}");
            assert_eq!(
                tracker.store().row_counts().unwrap(),
                (entry_rows, measure_rows),
                "{n} x {categories:?}"
            );
        }

        // Empty batches are refused when parsing a body, but a request built
        // directly still writes zero rows.
        let tracker = sample_tracker();
        let empty = CreateEntriesRequest {
            api_key: Some(SAMPLE_API_KEY.into()),
            entries: vec![],
        };
        assert_eq!(tracker.create_entries("oot", "us", &empty).unwrap(), 0);
        assert_eq!(tracker.store().row_counts().unwrap(), (0, 0));
    }

    #[test]
    fn duplicate_within_batch_writes_nothing() {
        let tracker = sample_tracker();
        let batch = json!({
            "api_key": SAMPLE_API_KEY,
            "entries": [actors_entry(1615435438, "e788"), actors_entry(1615435438, "e788")]
        });

        let err = tracker
            .create_entries("oot", "us", &request(batch))
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidData(ref m) if m.starts_with("Integrity error")));
        assert_eq!(tracker.store().row_counts().unwrap(), (0, 0));
    }

    #[test]
    fn reposting_a_batch_is_rejected() {
        let tracker = sample_tracker();
        tracker
            .create_entries("oot", "us", &request(sample_batch()))
            .unwrap();

        let err = tracker
            .create_entries("oot", "us", &request(sample_batch()))
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidData(_)));
        assert_eq!(tracker.store().row_counts().unwrap(), (2, 10));
    }

    #[test]
    fn non_integer_measure_voids_batch() {
        let tracker = sample_tracker();
        let batch = json!({
            "api_key": SAMPLE_API_KEY,
            "entries": [
                actors_entry(1, "a"),
                {"timestamp": 2, "git_hash": "b", "categories": {"actors": {"code_matching": 1.5}}}
            ]
        });

        let err = tracker
            .create_entries("oot", "us", &request(batch))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "actors:code_matching must be an integer, not float: 1.5"
        );
        assert_eq!(tracker.store().row_counts().unwrap(), (0, 0));
    }

    #[test]
    fn booleans_and_strings_are_not_integers() {
        assert!(measure_value("c", "m", &json!(true)).is_err());
        assert!(measure_value("c", "m", &json!("12")).is_err());
        assert_eq!(measure_value("c", "m", &json!(-12)).unwrap(), -12);
    }

    #[test]
    fn validation_order() {
        let tracker = sample_tracker();
        let mut batch = json!({
            "api_key": "wrong",
            "entries": [{"timestamp": 1, "git_hash": "a", "categories": {"items": {"m": 1}}}]
        });

        let err = tracker
            .create_entries("sm64", "us", &request(batch.clone()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Project 'sm64' does not exist");
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);

        let err = tracker
            .create_entries("oot", "eu", &request(batch.clone()))
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidApiKey));

        batch["api_key"] = json!(SAMPLE_API_KEY);
        let err = tracker
            .create_entries("oot", "eu", &request(batch.clone()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Version 'eu' does not exist");

        let err = tracker
            .create_entries("oot", "us", &request(batch))
            .unwrap_err();
        assert_eq!(err.to_string(), "Category 'items' does not exist");
    }

    #[test]
    fn malformed_bodies_are_invalid_data() {
        let cases = [
            json!({"api_key": SAMPLE_API_KEY, "entries": []}),
            json!({"api_key": SAMPLE_API_KEY}),
            json!({"api_key": SAMPLE_API_KEY, "entries": [{"timestamp": "now", "git_hash": "a", "categories": {}}]}),
            json!({"api_key": SAMPLE_API_KEY, "entries": [{"timestamp": 1, "git_hash": "a".repeat(41), "categories": {}}]}),
            json!({"api_key": SAMPLE_API_KEY, "entries": [], "extra": 1}),
        ];

        for case in cases {
            let err = CreateEntriesRequest::from_json(case.to_string().as_bytes()).unwrap_err();
            assert!(matches!(err, ProgressError::InvalidData(_)), "{case}");
        }
    }

    #[test]
    fn successful_write_invalidates_touched_categories() {
        let tracker = sample_tracker();
        let default_key = CacheKey::new("oot", "us", "default");
        let actors_key = CacheKey::new("oot", "us", "actors");
        let generation = tracker.cache().generation();
        tracker
            .cache()
            .set(default_key.clone(), Default::default(), generation);
        tracker
            .cache()
            .set(actors_key.clone(), Default::default(), generation);

        let batch = json!({"api_key": SAMPLE_API_KEY, "entries": [actors_entry(1, "a")]});
        tracker.create_entries("oot", "us", &request(batch)).unwrap();

        assert!(tracker.cache().get(&default_key).is_some());
        assert!(tracker.cache().get(&actors_key).is_none());
    }

    #[test]
    fn failed_write_keeps_cache() {
        let tracker = sample_tracker();
        let key = CacheKey::new("oot", "us", "actors");
        tracker
            .cache()
            .set(key.clone(), Default::default(), tracker.cache().generation());

        let batch = json!({"api_key": "wrong", "entries": [actors_entry(1, "a")]});
        assert!(tracker.create_entries("oot", "us", &request(batch)).is_err());
        assert!(tracker.cache().get(&key).is_some());
    }
}
