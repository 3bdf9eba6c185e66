use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type RowId = i64;

/// Measure name to value for a single entry, in the order they were written.
pub type Measures = IndexMap<String, i64>;

/// Default category every version is created with.
pub const DEFAULT_CATEGORY_SLUG: &str = "default";
pub const DEFAULT_CATEGORY_NAME: &str = "Default";

/// Upper bound on the length of a commit hash.
pub const GIT_HASH_MAX_LEN: usize = 40;

/// Length of a generated project auth key.
pub const AUTH_KEY_LEN: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub id: RowId,
    pub slug: String,
    pub name: String,
    pub auth_key: String,
    pub repository: String,
    pub discord: String,
    pub website: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Version {
    pub id: RowId,
    pub project_id: RowId,
    pub slug: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Category {
    pub id: RowId,
    pub version_id: RowId,
    pub slug: String,
    pub name: String,
}

/// A progress snapshot for one category, as exposed by the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub timestamp: i64,
    pub git_hash: String,
    pub measures: Measures,
}

/// An entry row waiting to be written, already bound to its category.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    pub category_id: RowId,
    pub timestamp: i64,
    pub git_hash: String,
    pub measures: Vec<(String, i64)>,
}

impl NewEntry {
    /// Rows this entry occupies once written: itself plus one per measure.
    pub fn row_count(&self) -> usize {
        1 + self.measures.len()
    }
}

/// Slugs are restricted to ASCII letters, digits, underscores and hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
