//! Read side of the API: latest entries, full histories and shields at
//! category, version, project and root scope.
use crate::entry_cache::CacheKey;
use crate::errors::ProgressError;
use crate::hierarchy::{CategoryPath, resolve_project, resolve_version};
use crate::shield::{Shield, ShieldParams, compute_shield};
use crate::store::{Snapshot, StoreError};
use crate::tracker::Tracker;
use crate::types::{Category, Entry, Project, Version};
use indexmap::IndexMap;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Latest,
    All,
    Shield,
}

impl Mode {
    /// Parses the `mode` query parameter, defaulting to [`Mode::Latest`].
    pub fn parse(mode: Option<&str>) -> Result<Mode, ProgressError> {
        mode.map_or(Ok(Mode::default()), str::parse)
    }
}

impl FromStr for Mode {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Mode::Latest),
            "all" => Ok(Mode::All),
            "shield" => Ok(Mode::Shield),
            _ => Err(ProgressError::invalid_data(format!(
                "Invalid mode specified: {s}"
            ))),
        }
    }
}

/// Category slug to entries, newest first.
pub type VersionDigest = IndexMap<String, Vec<Entry>>;
/// Version slug to its categories.
pub type ProjectDigest = IndexMap<String, VersionDigest>;
/// Project slug to its versions.
pub type ProgressDigest = IndexMap<String, ProjectDigest>;

#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataResponse {
    /// `{project: {version: {category: [entry, ...]}}}`
    Scoped(ProgressDigest),
    /// `{"progress": {project: {version: {category: [entry]}}}}`
    Progress { progress: ProgressDigest },
    Shield(Shield),
}

impl DataResponse {
    fn scoped(project: &str, version: &str, categories: VersionDigest) -> Self {
        let mut versions = ProjectDigest::new();
        versions.insert(version.to_string(), categories);
        let mut projects = ProgressDigest::new();
        projects.insert(project.to_string(), versions);
        DataResponse::Scoped(projects)
    }
}

impl Tracker {
    pub fn category_data(
        &self,
        project: &str,
        version: &str,
        category: &str,
        mode: Mode,
        shield: &ShieldParams,
    ) -> Result<DataResponse, ProgressError> {
        let path = CategoryPath::resolve(self.store(), project, version, category)?;

        let entries = match mode {
            Mode::Latest => vec![self.require_latest(&path)?],
            Mode::All => self.all_entries(&path.project, &path.version, &path.category)?,
            Mode::Shield => {
                let latest = self.require_latest(&path)?;
                let shield = compute_shield(&path.version, &path.category, &latest, shield)?;
                return Ok(DataResponse::Shield(shield));
            }
        };

        let mut categories = VersionDigest::new();
        categories.insert(path.category.slug, entries);
        Ok(DataResponse::scoped(
            &path.project.slug,
            &path.version.slug,
            categories,
        ))
    }

    /// In latest mode only categories with entries are listed. In all mode
    /// every category is listed, empty ones as `[]`.
    pub fn version_data(
        &self,
        project: &str,
        version: &str,
        mode: Mode,
    ) -> Result<DataResponse, ProgressError> {
        let project = resolve_project(self.store(), project)?;
        let version = resolve_version(self.store(), &project, version)?;
        if mode == Mode::Shield {
            return Err(shield_needs_category());
        }

        let mut categories = VersionDigest::new();
        for (slot, entries) in self.walk(&Scope::Version(&project, &version), mode)? {
            if mode == Mode::All || !entries.is_empty() {
                categories.insert(slot.category.slug, entries);
            }
        }

        Ok(DataResponse::scoped(&project.slug, &version.slug, categories))
    }

    pub fn project_data(&self, project: &str, mode: Mode) -> Result<DataResponse, ProgressError> {
        if mode == Mode::Shield {
            return Err(shield_needs_category());
        }

        let project = resolve_project(self.store(), project)?;
        let progress = pruned(self.walk(&Scope::Project(&project), mode)?);
        Ok(DataResponse::Progress { progress })
    }

    pub fn root_data(&self, mode: Mode) -> Result<DataResponse, ProgressError> {
        if mode == Mode::Shield {
            return Err(shield_needs_category());
        }

        let progress = pruned(self.walk(&Scope::Root, mode)?);
        Ok(DataResponse::Progress { progress })
    }

    /// Entries of every category in `scope`, all taken from one store
    /// snapshot.
    fn walk(&self, scope: &Scope<'_>, mode: Mode) -> Result<Vec<(Slot, Vec<Entry>)>, ProgressError> {
        if mode == Mode::All {
            return self.walk_histories(scope);
        }

        let walked: Vec<(Slot, Vec<Entry>)> = self.store().snapshot(|snapshot| {
            scope
                .slots(snapshot)?
                .into_iter()
                .map(|slot| {
                    let latest = snapshot.latest_entry(&slot.category)?;
                    Ok::<_, StoreError>((slot, latest.into_iter().collect()))
                })
                .collect()
        })?;
        Ok(walked)
    }

    /// Full histories of every category in `scope`. Cached histories are
    /// combined with store reads only if no write started before the walk
    /// finished. Otherwise every history is reread from one snapshot.
    fn walk_histories(&self, scope: &Scope<'_>) -> Result<Vec<(Slot, Vec<Entry>)>, ProgressError> {
        let cache = self.cache();

        if let Some(generation) = cache.stable_generation() {
            let slots = self.store().snapshot(|snapshot| scope.slots(snapshot))?;
            let cached: Vec<_> = slots.iter().map(|slot| cache.get(&slot.key)).collect();

            let mut fresh = self.store().snapshot(|snapshot| {
                slots
                    .iter()
                    .zip(&cached)
                    .filter(|(_, cached)| cached.is_none())
                    .map(|(slot, _)| snapshot.all_entries(&slot.category))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .into_iter();

            if cache.generation() == generation {
                let mut walked = Vec::with_capacity(slots.len());
                for (slot, cached) in slots.into_iter().zip(cached) {
                    let entries = match cached {
                        Some(entries) => entries,
                        None => {
                            let entries = Arc::new(fresh.next().unwrap_or_default());
                            cache.set(slot.key.clone(), Arc::clone(&entries), generation);
                            entries
                        }
                    };
                    walked.push((slot, Arc::unwrap_or_clone(entries)));
                }
                return Ok(walked);
            }

            tracing::debug!("entries written during digest walk, rereading from store");
        }

        let walked: Vec<(Slot, Vec<Entry>)> = self.store().snapshot(|snapshot| {
            scope
                .slots(snapshot)?
                .into_iter()
                .map(|slot| {
                    let entries = snapshot.all_entries(&slot.category)?;
                    Ok::<_, StoreError>((slot, entries))
                })
                .collect()
        })?;
        Ok(walked)
    }

    fn require_latest(&self, path: &CategoryPath) -> Result<Entry, ProgressError> {
        self.store()
            .latest_entry(&path.category)?
            .ok_or_else(|| ProgressError::EmptyCategory {
                project: path.project.slug.clone(),
                version: path.version.slug.clone(),
                category: path.category.slug.clone(),
            })
    }

    /// Full history of a category, read through the entry cache.
    fn all_entries(
        &self,
        project: &Project,
        version: &Version,
        category: &Category,
    ) -> Result<Vec<Entry>, ProgressError> {
        let key = CacheKey::new(&project.slug, &version.slug, &category.slug);
        if let Some(entries) = self.cache().get(&key) {
            return Ok(Arc::unwrap_or_clone(entries));
        }

        let generation = self.cache().generation();
        let entries = Arc::new(self.store().all_entries(category)?);
        self.cache().set(key, Arc::clone(&entries), generation);

        Ok(Arc::unwrap_or_clone(entries))
    }
}

/// What a multi-category digest covers.
enum Scope<'a> {
    Root,
    Project(&'a Project),
    Version(&'a Project, &'a Version),
}

/// One category reached by a digest walk.
struct Slot {
    key: CacheKey,
    project: String,
    version: String,
    category: Category,
}

impl Scope<'_> {
    /// Categories in scope, ordered by project, version and category
    /// creation.
    fn slots(&self, snapshot: &Snapshot<'_>) -> Result<Vec<Slot>, StoreError> {
        let projects = match self {
            Scope::Root => snapshot.projects()?,
            Scope::Project(project) | Scope::Version(project, _) => vec![(*project).clone()],
        };

        let mut slots = Vec::new();
        for project in &projects {
            let versions = match self {
                Scope::Version(_, version) => vec![(*version).clone()],
                Scope::Root | Scope::Project(_) => snapshot.versions_of(project)?,
            };
            for version in &versions {
                for category in snapshot.categories_of(version)? {
                    slots.push(Slot {
                        key: CacheKey::new(&project.slug, &version.slug, &category.slug),
                        project: project.slug.clone(),
                        version: version.slug.clone(),
                        category,
                    });
                }
            }
        }

        Ok(slots)
    }
}

/// Nests walked categories by project and version, dropping empty
/// categories, versions and projects.
fn pruned(walked: Vec<(Slot, Vec<Entry>)>) -> ProgressDigest {
    let mut progress = ProgressDigest::new();
    for (slot, entries) in walked {
        if entries.is_empty() {
            continue;
        }
        progress
            .entry(slot.project)
            .or_default()
            .entry(slot.version)
            .or_default()
            .insert(slot.category.slug, entries);
    }
    progress
}

fn shield_needs_category() -> ProgressError {
    ProgressError::invalid_data("Category must be specified for shield output")
}
