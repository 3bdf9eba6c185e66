//! Strict Project -> Version -> Category path resolution.
//!
//! A deeper slug is only ever looked up under the parent resolved just before
//! it, so a missing intermediate level short-circuits with its own error.
use crate::errors::ProgressError;
use crate::store::ProgressStore;
use crate::types::{Category, Project, Version};

pub fn resolve_project(store: &ProgressStore, project: &str) -> Result<Project, ProgressError> {
    store
        .project(project)?
        .ok_or_else(|| ProgressError::NonexistentProject {
            project: project.to_string(),
        })
}

pub fn resolve_version(
    store: &ProgressStore,
    project: &Project,
    version: &str,
) -> Result<Version, ProgressError> {
    store
        .version(project, version)?
        .ok_or_else(|| ProgressError::NonexistentVersion {
            project: project.slug.clone(),
            version: version.to_string(),
        })
}

pub fn resolve_category(
    store: &ProgressStore,
    project: &Project,
    version: &Version,
    category: &str,
) -> Result<Category, ProgressError> {
    store
        .category(version, category)?
        .ok_or_else(|| ProgressError::NonexistentCategory {
            project: project.slug.clone(),
            version: version.slug.clone(),
            category: category.to_string(),
        })
}

/// A fully resolved `project/version/category` path.
#[derive(Clone, Debug)]
pub struct CategoryPath {
    pub project: Project,
    pub version: Version,
    pub category: Category,
}

impl CategoryPath {
    pub fn resolve(
        store: &ProgressStore,
        project: &str,
        version: &str,
        category: &str,
    ) -> Result<Self, ProgressError> {
        let project = resolve_project(store, project)?;
        let version = resolve_version(store, &project, version)?;
        let category = resolve_category(store, &project, &version, category)?;
        Ok(CategoryPath {
            project,
            version,
            category,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProjectLinks;
    use crate::testutils::seed_sample_store;

    #[test]
    fn resolves_full_path() {
        let store = seed_sample_store();
        let path = CategoryPath::resolve(&store, "oot", "us", "actors").unwrap();
        assert_eq!(path.project.slug, "oot");
        assert_eq!(path.version.slug, "us");
        assert_eq!(path.category.slug, "actors");
    }

    #[test]
    fn missing_levels_report_their_own_error() {
        let store = seed_sample_store();

        let err = CategoryPath::resolve(&store, "sm64", "us", "actors").unwrap_err();
        assert!(matches!(err, ProgressError::NonexistentProject { project } if project == "sm64"));

        let err = CategoryPath::resolve(&store, "oot", "eu", "actors").unwrap_err();
        assert!(matches!(
            err,
            ProgressError::NonexistentVersion { ref version, .. } if version == "eu"
        ));

        let err = CategoryPath::resolve(&store, "oot", "us", "items").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Category 'items' does not exist for project 'oot', version 'us'"
        );
    }

    #[test]
    fn same_slug_under_another_parent_does_not_match() {
        let store = seed_sample_store();
        let mm = store
            .create_project("mm", "Majora's Mask", "mm_key", &ProjectLinks::default())
            .unwrap();
        let jp = store.create_version(&mm, "jp", "JP").unwrap();
        store
            .create_categories(&jp, &[("masks".into(), "Masks".into())])
            .unwrap();

        assert!(CategoryPath::resolve(&store, "mm", "jp", "masks").is_ok());
        let err = CategoryPath::resolve(&store, "oot", "jp", "masks").unwrap_err();
        assert!(matches!(err, ProgressError::NonexistentVersion { .. }));
    }
}
