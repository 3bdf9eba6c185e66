//! Projects, versions and categories: listing and administrative writes.
use crate::errors::ProgressError;
use crate::hierarchy::{resolve_project, resolve_version};
use crate::store::{ProjectLinks, StoreError};
use crate::tracker::Tracker;
use crate::types::{AUTH_KEY_LEN, Project, is_valid_slug};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, PartialEq, Serialize)]
pub struct VersionListing {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct ProjectListing {
    pub slug: String,
    pub name: String,
    pub versions: Vec<VersionListing>,
    pub repository: String,
    pub discord: String,
    pub website: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCategoriesRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    pub categories: IndexMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateVersionRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Defaults to the version slug.
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of `POST /projects/{project}/{version}/`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StructureRequest {
    Categories(CreateCategoriesRequest),
    Version(CreateVersionRequest),
}

impl StructureRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, ProgressError> {
        serde_json::from_slice(body).map_err(|_| {
            ProgressError::invalid_data(
                "Invalid request body: expected {api_key, name} or {api_key, categories}",
            )
        })
    }
}

/// Body of `DELETE /projects/{project}/{version}/`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteVersionRequest {
    #[serde(default)]
    pub api_key: Option<String>,
}

impl DeleteVersionRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, ProgressError> {
        serde_json::from_slice(body)
            .map_err(|e| ProgressError::invalid_data(format!("Invalid request body: {e}")))
    }
}

fn check_slug(kind: &str, slug: &str) -> Result<(), ProgressError> {
    if is_valid_slug(slug) {
        Ok(())
    } else {
        Err(ProgressError::invalid_data(format!(
            "{kind} slug '{slug}' may only contain letters, digits, '_' and '-'"
        )))
    }
}

fn already_exists(message: String) -> impl FnOnce(StoreError) -> ProgressError {
    move |e| match e {
        StoreError::Integrity(_) => ProgressError::AlreadyExists(message),
        other => ProgressError::Store(other),
    }
}

/// A random project key of [`AUTH_KEY_LEN`] hex characters.
pub fn generate_auth_key() -> String {
    let mut key = Uuid::new_v4().simple().to_string();
    key.truncate(AUTH_KEY_LEN);
    key
}

impl Tracker {
    pub fn list_projects(&self) -> Result<Vec<ProjectListing>, ProgressError> {
        let store = self.store();
        let mut listings = Vec::new();

        for project in store.projects()? {
            let versions = store
                .versions_of(&project)?
                .into_iter()
                .map(|version| VersionListing {
                    slug: version.slug,
                    name: version.name,
                })
                .collect();

            listings.push(ProjectListing {
                slug: project.slug,
                name: project.name,
                versions,
                repository: project.repository,
                discord: project.discord,
                website: project.website,
            });
        }

        Ok(listings)
    }

    /// Creates a project. Not exposed over HTTP. A key is generated when
    /// `auth_key` is `None`.
    pub fn create_project(
        &self,
        slug: &str,
        name: &str,
        auth_key: Option<&str>,
        links: &ProjectLinks,
    ) -> Result<Project, ProgressError> {
        check_slug("Project", slug)?;
        let auth_key = match auth_key {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => generate_auth_key(),
        };

        let project = self
            .store()
            .create_project(slug, name, &auth_key, links)
            .map_err(already_exists(format!("Project '{slug}' already exists")))?;

        tracing::info!(project = %project.slug, "created project");
        Ok(project)
    }

    /// Applies a structure write and returns the number of rows created.
    pub fn apply_structure(
        &self,
        project_slug: &str,
        version_slug: &str,
        request: &StructureRequest,
    ) -> Result<usize, ProgressError> {
        match request {
            StructureRequest::Version(request) => {
                self.create_version(project_slug, version_slug, request)
            }
            StructureRequest::Categories(request) => {
                self.create_categories(project_slug, version_slug, request)
            }
        }
    }

    /// Creates a version with its default category.
    pub fn create_version(
        &self,
        project_slug: &str,
        version_slug: &str,
        request: &CreateVersionRequest,
    ) -> Result<usize, ProgressError> {
        let store = self.store();
        let project = resolve_project(store, project_slug)?;
        self.validate_api_key(request.api_key.as_deref(), &project)?;
        check_slug("Version", version_slug)?;

        let name = request.name.as_deref().unwrap_or(version_slug);
        store
            .create_version(&project, version_slug, name)
            .map_err(already_exists(format!(
                "Version '{version_slug}' already exists for project '{project_slug}'"
            )))?;

        tracing::info!(project = project_slug, version = version_slug, "created version");
        Ok(2)
    }

    /// Creates categories under an existing version. Fails without writing
    /// anything if any of them already exists.
    pub fn create_categories(
        &self,
        project_slug: &str,
        version_slug: &str,
        request: &CreateCategoriesRequest,
    ) -> Result<usize, ProgressError> {
        let store = self.store();
        let project = resolve_project(store, project_slug)?;
        self.validate_api_key(request.api_key.as_deref(), &project)?;
        let version = resolve_version(store, &project, version_slug)?;

        if request.categories.is_empty() {
            return Err(ProgressError::invalid_data("categories must not be empty"));
        }

        let mut to_create = Vec::with_capacity(request.categories.len());
        for (slug, name) in &request.categories {
            check_slug("Category", slug)?;
            if store.category(&version, slug)?.is_some() {
                return Err(ProgressError::AlreadyExists(format!(
                    "Category {slug} already exists for project '{project_slug}', version '{version_slug}'"
                )));
            }
            to_create.push((slug.clone(), name.clone()));
        }

        let created = store
            .create_categories(&version, &to_create)
            .map_err(already_exists(format!(
                "Categories already exist for project '{project_slug}', version '{version_slug}'"
            )))?;

        tracing::info!(
            project = project_slug,
            version = version_slug,
            created,
            "created categories"
        );
        Ok(created)
    }

    /// Deletes a version and everything below it. Returns the number of
    /// rows removed.
    pub fn delete_version(
        &self,
        project_slug: &str,
        version_slug: &str,
        request: &DeleteVersionRequest,
    ) -> Result<usize, ProgressError> {
        let store = self.store();
        let project = resolve_project(store, project_slug)?;
        self.validate_api_key(request.api_key.as_deref(), &project)?;
        let version = resolve_version(store, &project, version_slug)?;

        let categories = store.categories_of(&version)?;
        let pending = self.cache().begin_write();
        let deleted = store.delete_version(&version)?;

        self.cache().invalidate(
            project_slug,
            version_slug,
            categories.iter().map(|category| category.slug.as_str()),
        );
        drop(pending);

        tracing::info!(
            project = project_slug,
            version = version_slug,
            deleted,
            "deleted version"
        );
        Ok(deleted)
    }
}
