//! Relational storage for the project hierarchy and its measurements.
//!
//! Every public method takes the connection lock once, so each call observes a
//! single consistent snapshot of the database and multi-row writes are applied
//! inside one transaction. Reads spanning several calls go through
//! [`ProgressStore::snapshot`].
use crate::types::{
    Category, DEFAULT_CATEGORY_NAME, DEFAULT_CATEGORY_SLUG, Entry, Measures, NewEntry, Project,
    RowId, Version,
};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_on INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        auth_key TEXT NOT NULL,
        repository TEXT NOT NULL DEFAULT '',
        discord TEXT NOT NULL DEFAULT '',
        website TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_on INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
        project_id INTEGER NOT NULL REFERENCES projects(id),
        slug TEXT NOT NULL,
        name TEXT NOT NULL,
        UNIQUE (project_id, slug)
    );

    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_on INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
        version_id INTEGER NOT NULL REFERENCES versions(id),
        slug TEXT NOT NULL,
        name TEXT NOT NULL,
        UNIQUE (version_id, slug)
    );

    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_on INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
        category_id INTEGER NOT NULL REFERENCES categories(id),
        timestamp INTEGER NOT NULL,
        git_hash TEXT NOT NULL,
        UNIQUE (category_id, timestamp, git_hash)
    );

    CREATE TABLE IF NOT EXISTS measures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id INTEGER NOT NULL REFERENCES entries(id),
        name TEXT NOT NULL,
        value INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_entries_category_timestamp
        ON entries(category_id, timestamp DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_measures_entry ON measures(entry_id);
"#;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("could not create database directory: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Integrity(message.clone().unwrap_or_else(|| failure.to_string()))
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Optional project metadata shown in the project listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectLinks {
    pub repository: String,
    pub discord: String,
    pub website: String,
}

pub struct ProgressStore {
    conn: Mutex<Connection>,
}

impl ProgressStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(ProgressStore {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `read` against one consistent state of the database. Nothing
    /// written by another caller becomes visible until `read` returns.
    pub fn snapshot<T>(
        &self,
        read: impl FnOnce(&Snapshot<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        read(&Snapshot { conn: &*tx })
    }

    pub fn project(&self, slug: &str) -> Result<Option<Project>, StoreError> {
        self.snapshot(|snapshot| snapshot.project(slug))
    }

    pub fn projects(&self) -> Result<Vec<Project>, StoreError> {
        self.snapshot(|snapshot| snapshot.projects())
    }

    pub fn version(&self, project: &Project, slug: &str) -> Result<Option<Version>, StoreError> {
        self.snapshot(|snapshot| snapshot.version(project, slug))
    }

    pub fn versions_of(&self, project: &Project) -> Result<Vec<Version>, StoreError> {
        self.snapshot(|snapshot| snapshot.versions_of(project))
    }

    pub fn category(&self, version: &Version, slug: &str) -> Result<Option<Category>, StoreError> {
        self.snapshot(|snapshot| snapshot.category(version, slug))
    }

    pub fn categories_of(&self, version: &Version) -> Result<Vec<Category>, StoreError> {
        self.snapshot(|snapshot| snapshot.categories_of(version))
    }

    pub fn latest_entry(&self, category: &Category) -> Result<Option<Entry>, StoreError> {
        self.snapshot(|snapshot| snapshot.latest_entry(category))
    }

    pub fn all_entries(&self, category: &Category) -> Result<Vec<Entry>, StoreError> {
        self.snapshot(|snapshot| snapshot.all_entries(category))
    }

    /// Writes all entries and their measures in one transaction and returns
    /// the number of rows written. Nothing is written if any insert fails.
    pub fn insert_entries(&self, entries: &[NewEntry]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut written = 0;

        {
            let mut insert_entry = tx.prepare_cached(
                "INSERT INTO entries (category_id, timestamp, git_hash) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_measure = tx.prepare_cached(
                "INSERT INTO measures (entry_id, name, value) VALUES (?1, ?2, ?3)",
            )?;

            for entry in entries {
                let entry_id = insert_entry.insert(params![
                    entry.category_id,
                    entry.timestamp,
                    entry.git_hash
                ])?;
                written += 1;

                for (name, value) in &entry.measures {
                    insert_measure.execute(params![entry_id, name, value])?;
                    written += 1;
                }
            }
        }

        tx.commit()?;
        Ok(written)
    }

    pub fn create_project(
        &self,
        slug: &str,
        name: &str,
        auth_key: &str,
        links: &ProjectLinks,
    ) -> Result<Project, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO projects (slug, name, auth_key, repository, discord, website)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                slug,
                name,
                auth_key,
                links.repository,
                links.discord,
                links.website
            ],
        )?;

        Ok(Project {
            id: conn.last_insert_rowid(),
            slug: slug.to_string(),
            name: name.to_string(),
            auth_key: auth_key.to_string(),
            repository: links.repository.clone(),
            discord: links.discord.clone(),
            website: links.website.clone(),
        })
    }

    /// Creates a version together with its default category.
    pub fn create_version(
        &self,
        project: &Project,
        slug: &str,
        name: &str,
    ) -> Result<Version, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO versions (project_id, slug, name) VALUES (?1, ?2, ?3)",
            params![project.id, slug, name],
        )?;
        let version_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO categories (version_id, slug, name) VALUES (?1, ?2, ?3)",
            params![version_id, DEFAULT_CATEGORY_SLUG, DEFAULT_CATEGORY_NAME],
        )?;

        tx.commit()?;

        Ok(Version {
            id: version_id,
            project_id: project.id,
            slug: slug.to_string(),
            name: name.to_string(),
        })
    }

    /// Creates the given `(slug, name)` categories under a version, all or none.
    pub fn create_categories(
        &self,
        version: &Version,
        categories: &[(String, String)],
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO categories (version_id, slug, name) VALUES (?1, ?2, ?3)",
            )?;
            for (slug, name) in categories {
                insert.execute(params![version.id, slug, name])?;
            }
        }

        tx.commit()?;
        Ok(categories.len())
    }

    /// Deletes a version with its categories, entries and measures. Returns
    /// the total number of rows removed.
    pub fn delete_version(&self, version: &Version) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut deleted = tx.execute(
            "DELETE FROM measures WHERE entry_id IN (
                SELECT e.id FROM entries e
                JOIN categories c ON c.id = e.category_id
                WHERE c.version_id = ?1
            )",
            params![version.id],
        )?;
        deleted += tx.execute(
            "DELETE FROM entries WHERE category_id IN (
                SELECT id FROM categories WHERE version_id = ?1
            )",
            params![version.id],
        )?;
        deleted += tx.execute(
            "DELETE FROM categories WHERE version_id = ?1",
            params![version.id],
        )?;
        deleted += tx.execute("DELETE FROM versions WHERE id = ?1", params![version.id])?;

        tx.commit()?;
        Ok(deleted)
    }

    /// Number of stored `(entries, measures)` rows.
    pub fn row_counts(&self) -> Result<(usize, usize), StoreError> {
        let conn = self.conn.lock();
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        let measures: i64 =
            conn.query_row("SELECT COUNT(*) FROM measures", [], |row| row.get(0))?;
        Ok((entries as usize, measures as usize))
    }

    /// Cheap round trip used by the readiness probe.
    pub fn ping(&self) -> bool {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

/// Read access held open by [`ProgressStore::snapshot`]. Every read through
/// one `Snapshot` sees the same committed state.
pub struct Snapshot<'a> {
    conn: &'a Connection,
}

impl Snapshot<'_> {
    pub fn project(&self, slug: &str) -> Result<Option<Project>, StoreError> {
        let project = self
            .conn
            .query_row(
                "SELECT id, slug, name, auth_key, repository, discord, website
                 FROM projects WHERE slug = ?1",
                params![slug],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn projects(&self) -> Result<Vec<Project>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, slug, name, auth_key, repository, discord, website
             FROM projects ORDER BY id",
        )?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    pub fn version(&self, project: &Project, slug: &str) -> Result<Option<Version>, StoreError> {
        let version = self
            .conn
            .query_row(
                "SELECT id, project_id, slug, name FROM versions
                 WHERE project_id = ?1 AND slug = ?2",
                params![project.id, slug],
                version_from_row,
            )
            .optional()?;
        Ok(version)
    }

    pub fn versions_of(&self, project: &Project) -> Result<Vec<Version>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, project_id, slug, name FROM versions
             WHERE project_id = ?1 ORDER BY id",
        )?;
        let versions = stmt
            .query_map(params![project.id], version_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    pub fn category(&self, version: &Version, slug: &str) -> Result<Option<Category>, StoreError> {
        let category = self
            .conn
            .query_row(
                "SELECT id, version_id, slug, name FROM categories
                 WHERE version_id = ?1 AND slug = ?2",
                params![version.id, slug],
                category_from_row,
            )
            .optional()?;
        Ok(category)
    }

    pub fn categories_of(&self, version: &Version) -> Result<Vec<Category>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, version_id, slug, name FROM categories
             WHERE version_id = ?1 ORDER BY id",
        )?;
        let categories = stmt
            .query_map(params![version.id], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Most recent entry of a category. Ties on timestamp go to the entry
    /// written last.
    pub fn latest_entry(&self, category: &Category) -> Result<Option<Entry>, StoreError> {
        let head = self
            .conn
            .query_row(
                "SELECT id, timestamp, git_hash FROM entries
                 WHERE category_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT 1",
                params![category.id],
                |row| {
                    Ok((
                        row.get::<_, RowId>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((entry_id, timestamp, git_hash)) = head else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare_cached("SELECT name, value FROM measures WHERE entry_id = ?1 ORDER BY id")?;
        let measures = stmt
            .query_map(params![entry_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Measures, _>>()?;

        Ok(Some(Entry {
            timestamp,
            git_hash,
            measures,
        }))
    }

    /// Every entry of a category, newest first. Measures keep the order
    /// they were written in.
    pub fn all_entries(&self, category: &Category) -> Result<Vec<Entry>, StoreError> {
        let mut measures_by_entry: HashMap<RowId, Measures> = HashMap::new();
        let mut stmt = self.conn.prepare_cached(
            "SELECT m.entry_id, m.name, m.value
             FROM measures m JOIN entries e ON e.id = m.entry_id
             WHERE e.category_id = ?1
             ORDER BY m.id",
        )?;
        let rows = stmt.query_map(params![category.id], |row| {
            Ok((
                row.get::<_, RowId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (entry_id, name, value) = row?;
            measures_by_entry
                .entry(entry_id)
                .or_default()
                .insert(name, value);
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT id, timestamp, git_hash FROM entries
             WHERE category_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let entries = stmt
            .query_map(params![category.id], |row| {
                Ok((
                    row.get::<_, RowId>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .map(|row| {
                row.map(|(entry_id, timestamp, git_hash)| Entry {
                    timestamp,
                    git_hash,
                    measures: measures_by_entry.remove(&entry_id).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        auth_key: row.get(3)?,
        repository: row.get(4)?,
        discord: row.get(5)?,
        website: row.get(6)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    Ok(Version {
        id: row.get(0)?,
        project_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        version_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
    })
}
