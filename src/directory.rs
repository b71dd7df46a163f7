//! Read-side view of the external catalog and identity collaborators.
//!
//! Catalog items and collaborators are owned elsewhere; this module only
//! answers "does it exist, and is it usable" for the period workflow. The
//! local `catalog_item` / `collaborator` tables are the projection those
//! systems feed.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use moka::sync::Cache;
use rusqlite::Connection;

use crate::config::IdentityConfig;
use crate::db::{self, CatalogItemRecord, CollaboratorRecord};

pub const COORDINATOR_ROLE: &str = "coordinator";
pub const COLLABORATOR_ROLE: &str = "collaborator";

pub fn resolve_catalog_item(
    conn: &Connection,
    id: &str,
) -> Result<Option<CatalogItemRecord>, DirectoryError> {
    Ok(db::get_catalog_item(conn, id)?)
}

/// Assignable items must exist and be active.
pub fn require_active_item(conn: &Connection, id: &str) -> Result<CatalogItemRecord, DirectoryError> {
    match resolve_catalog_item(conn, id)? {
        Some(item) if item.active => Ok(item),
        Some(_) => Err(DirectoryError::InactiveItem(id.to_string())),
        None => Err(DirectoryError::UnknownItem(id.to_string())),
    }
}

/// Collaborator lookups with a bounded TTL cache. Every write through this
/// type invalidates the touched id before returning.
#[derive(Clone)]
pub struct CollaboratorDirectory {
    cache: Cache<String, Option<CollaboratorRecord>>,
}

impl fmt::Debug for CollaboratorDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaboratorDirectory")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl CollaboratorDirectory {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(Duration::from_secs(config.cache_ttl_secs))
                .build(),
        }
    }

    pub fn resolve(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<Option<CollaboratorRecord>, DirectoryError> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached);
        }
        let loaded = db::get_collaborator(conn, id)?;
        self.cache.insert(id.to_string(), loaded.clone());
        Ok(loaded)
    }

    pub fn require_active(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<CollaboratorRecord, DirectoryError> {
        match self.resolve(conn, id)? {
            Some(record) if record.active => Ok(record),
            Some(_) => Err(DirectoryError::InactiveCollaborator(id.to_string())),
            None => Err(DirectoryError::UnknownCollaborator(id.to_string())),
        }
    }

    pub fn require_coordinator(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<CollaboratorRecord, DirectoryError> {
        let record = self.require_active(conn, id)?;
        if record.role != COORDINATOR_ROLE {
            return Err(DirectoryError::NotCoordinator(id.to_string()));
        }
        Ok(record)
    }

    pub fn register(
        &self,
        conn: &Connection,
        record: &CollaboratorRecord,
    ) -> Result<(), DirectoryError> {
        db::upsert_collaborator(conn, record)?;
        self.invalidate(&record.id);
        Ok(())
    }

    pub fn remove(&self, conn: &Connection, id: &str) -> Result<bool, DirectoryError> {
        let removed = db::delete_collaborator(conn, id)?;
        self.invalidate(id);
        Ok(removed)
    }

    pub fn invalidate(&self, id: &str) {
        self.cache.invalidate(id);
    }
}

#[derive(Debug)]
pub enum DirectoryError {
    Db(rusqlite::Error),
    UnknownItem(String),
    InactiveItem(String),
    UnknownCollaborator(String),
    InactiveCollaborator(String),
    NotCoordinator(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Db(err) => write!(f, "database error: {}", err),
            DirectoryError::UnknownItem(id) => write!(f, "catalog item '{}' not found", id),
            DirectoryError::InactiveItem(id) => write!(f, "catalog item '{}' is inactive", id),
            DirectoryError::UnknownCollaborator(id) => {
                write!(f, "collaborator '{}' not found", id)
            }
            DirectoryError::InactiveCollaborator(id) => {
                write!(f, "collaborator '{}' is inactive", id)
            }
            DirectoryError::NotCoordinator(id) => {
                write!(f, "collaborator '{}' is not a coordinator", id)
            }
        }
    }
}

impl Error for DirectoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DirectoryError::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(value: rusqlite::Error) -> Self {
        DirectoryError::Db(value)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{require_active_item, CollaboratorDirectory, DirectoryError, COORDINATOR_ROLE};
    use crate::config::IdentityConfig;
    use crate::db::{self, CatalogItemRecord, CollaboratorRecord};

    fn open() -> (rusqlite::Connection, String) {
        let path = std::env::temp_dir()
            .join(format!("mperiod-directory-{}.sqlite", Uuid::now_v7()))
            .display()
            .to_string();
        (db::open_connection(&path).expect("open"), path)
    }

    fn cleanup(path: &str) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }

    fn collaborator(id: &str, role: &str) -> CollaboratorRecord {
        CollaboratorRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            policy_id: None,
            role: role.to_string(),
            active: true,
        }
    }

    #[test]
    fn inactive_and_missing_items_are_distinguished() {
        let (conn, path) = open();
        db::upsert_catalog_item(
            &conn,
            &CatalogItemRecord {
                id: "dev-x".to_string(),
                kind: "extinguisher".to_string(),
                location: None,
                building: None,
                level: None,
                active: false,
            },
        )
        .expect("seed item");

        assert!(matches!(
            require_active_item(&conn, "dev-x"),
            Err(DirectoryError::InactiveItem(_))
        ));
        assert!(matches!(
            require_active_item(&conn, "dev-missing"),
            Err(DirectoryError::UnknownItem(_))
        ));
        cleanup(&path);
    }

    #[test]
    fn cached_negative_lookup_is_cleared_by_register() {
        let (conn, path) = open();
        let directory = CollaboratorDirectory::new(&IdentityConfig::default());
        assert!(directory.resolve(&conn, "c1").expect("lookup").is_none());

        directory
            .register(&conn, &collaborator("c1", "collaborator"))
            .expect("register");
        assert!(directory.resolve(&conn, "c1").expect("lookup").is_some());
        cleanup(&path);
    }

    #[test]
    fn stale_entries_survive_external_writes_until_invalidated() {
        let (conn, path) = open();
        let directory = CollaboratorDirectory::new(&IdentityConfig::default());
        directory
            .register(&conn, &collaborator("c1", "collaborator"))
            .expect("register");
        assert!(directory.require_active(&conn, "c1").is_ok());

        db::delete_collaborator(&conn, "c1").expect("external delete");
        assert!(directory.require_active(&conn, "c1").is_ok());

        directory.invalidate("c1");
        assert!(matches!(
            directory.require_active(&conn, "c1"),
            Err(DirectoryError::UnknownCollaborator(_))
        ));
        cleanup(&path);
    }

    #[test]
    fn coordinator_role_is_enforced() {
        let (conn, path) = open();
        let directory = CollaboratorDirectory::new(&IdentityConfig::default());
        directory
            .register(&conn, &collaborator("boss", COORDINATOR_ROLE))
            .expect("register");
        directory
            .register(&conn, &collaborator("tech", "collaborator"))
            .expect("register");
        assert!(directory.require_coordinator(&conn, "boss").is_ok());
        assert!(matches!(
            directory.require_coordinator(&conn, "tech"),
            Err(DirectoryError::NotCoordinator(_))
        ));
        cleanup(&path);
    }
}
