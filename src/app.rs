use std::error::Error;
use std::fmt;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::{Config, ConfigError};
use crate::db::{self, CatalogItemRecord, CollaboratorRecord, PeriodEventRecord};
use crate::directory::{CollaboratorDirectory, DirectoryError};
use crate::domain::period::Period;
use crate::domain::report::CollaborationError;
use crate::domain::state::{InvalidStateTransition, ParseStateError};
use crate::domain::timestamp::{now_utc, TimestampError};
use crate::lifecycle::expire_if_ended;
use crate::locks::{LockError, PeriodLocks};

/// Entry point for every period operation. Holds no open connection, so one
/// `App` can be shared across threads; each call opens its own.
#[derive(Debug)]
pub struct App {
    db_path: String,
    config: Config,
    locks: PeriodLocks,
    collaborators: CollaboratorDirectory,
}

impl App {
    pub fn open(db_path: &str, config: Config) -> Result<Self, AppError> {
        ensure_parent_dir(db_path)?;
        drop(db::open_connection(db_path)?);
        let collaborators = CollaboratorDirectory::new(&config.identity);
        Ok(Self {
            db_path: db_path.to_string(),
            config,
            locks: PeriodLocks::new(),
            collaborators,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn collaborators(&self) -> &CollaboratorDirectory {
        &self.collaborators
    }

    pub(crate) fn connect(&self) -> Result<Connection, AppError> {
        Ok(db::connect(&self.db_path)?)
    }

    /// Loads one period under its lock inside an immediate write transaction.
    /// `apply` owns the loaded row; nothing is written back on its behalf.
    pub(crate) fn with_locked_period<T, F>(&self, period_id: &str, apply: F) -> Result<T, AppError>
    where
        F: FnOnce(&Transaction<'_>, Period) -> Result<T, AppError>,
    {
        let _guard = self
            .locks
            .acquire(period_id, self.config.locks.timeout())?;
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let period = db::get_period(&tx, period_id)?
            .ok_or_else(|| AppError::NotFound(format!("period '{}' not found", period_id)))?;
        let outcome = apply(&tx, period)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Runs `apply` against one period and writes the row back with a version
    /// check, but only when `apply` actually changed it. A period found past
    /// its end is deactivated first; that write survives even when `apply`
    /// then fails, while everything `apply` did is rolled back.
    pub(crate) fn mutate_period<T, F>(&self, period_id: &str, apply: F) -> Result<(Period, T), AppError>
    where
        F: FnOnce(&Transaction<'_>, &mut Period, OffsetDateTime) -> Result<T, AppError>,
    {
        self.with_locked_period(period_id, |tx, mut period| {
            let now = now_utc();
            let expired = expire_if_ended(tx, &mut period, now)?;
            if !expired {
                return write_back(tx, period, now, apply).map(Ok);
            }

            tx.execute_batch("SAVEPOINT period_apply")?;
            match write_back(tx, period, now, apply) {
                Ok(written) => {
                    tx.execute_batch("RELEASE period_apply")?;
                    Ok(Ok(written))
                }
                Err(err) => {
                    tx.execute_batch("ROLLBACK TO period_apply; RELEASE period_apply")?;
                    tracing::info!(period_id, "expired period deactivated on write");
                    Ok(Err(err))
                }
            }
        })?
    }

    /// Write transaction that is not scoped to a single period.
    pub(crate) fn with_transaction<T, F>(&self, apply: F) -> Result<T, AppError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, AppError>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = apply(&tx)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn show_period(&self, period_id: &str) -> Result<Period, AppError> {
        let conn = self.connect()?;
        db::get_period(&conn, period_id)?
            .ok_or_else(|| AppError::NotFound(format!("period '{}' not found", period_id)))
    }

    pub fn period_events(&self, period_id: &str) -> Result<Vec<PeriodEventRecord>, AppError> {
        let conn = self.connect()?;
        if db::get_period(&conn, period_id)?.is_none() {
            return Err(AppError::NotFound(format!("period '{}' not found", period_id)));
        }
        Ok(db::list_period_events(&conn, period_id)?)
    }

    pub fn register_catalog_item(&self, item: &CatalogItemRecord) -> Result<(), AppError> {
        if item.id.trim().is_empty() || item.kind.trim().is_empty() {
            return Err(AppError::Validation(
                "catalog item id and kind are required".to_string(),
            ));
        }
        let conn = self.connect()?;
        db::upsert_catalog_item(&conn, item)?;
        Ok(())
    }

    pub fn remove_catalog_item(&self, id: &str) -> Result<(), AppError> {
        let conn = self.connect()?;
        if !db::delete_catalog_item(&conn, id)? {
            return Err(AppError::NotFound(format!("catalog item '{}' not found", id)));
        }
        tracing::info!(catalog_item_id = id, "catalog item removed");
        Ok(())
    }

    pub fn list_catalog_items(&self) -> Result<Vec<CatalogItemRecord>, AppError> {
        let conn = self.connect()?;
        Ok(db::list_catalog_items(&conn)?)
    }

    pub fn register_collaborator(&self, record: &CollaboratorRecord) -> Result<(), AppError> {
        if record.id.trim().is_empty() || record.name.trim().is_empty() {
            return Err(AppError::Validation(
                "collaborator id and name are required".to_string(),
            ));
        }
        let conn = self.connect()?;
        self.collaborators.register(&conn, record)?;
        Ok(())
    }

    pub fn remove_collaborator(&self, id: &str) -> Result<(), AppError> {
        let conn = self.connect()?;
        if !self.collaborators.remove(&conn, id)? {
            return Err(AppError::NotFound(format!("collaborator '{}' not found", id)));
        }
        Ok(())
    }
}

fn write_back<T, F>(
    tx: &Transaction<'_>,
    mut period: Period,
    now: OffsetDateTime,
    apply: F,
) -> Result<(Period, T), AppError>
where
    F: FnOnce(&Transaction<'_>, &mut Period, OffsetDateTime) -> Result<T, AppError>,
{
    let before = period.clone();
    let outcome = apply(tx, &mut period, now)?;
    period.refresh_progress();

    if period != before {
        period.updated_at = now;
        if !db::update_period(tx, &period, before.version)? {
            return Err(AppError::Conflict(format!(
                "period '{}' was modified concurrently; retry the operation",
                period.id
            )));
        }
        period.version = before.version + 1;
    }
    Ok((period, outcome))
}

fn ensure_parent_dir(path: &str) -> Result<(), AppError> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Stable, caller-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authorization,
    State,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Authorization => 403,
            ErrorKind::State | ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Db(rusqlite::Error),
    Json(serde_json::Error),
    Config(ConfigError),
    Lock(LockError),
    ParseState(ParseStateError),
    Validation(String),
    NotFound(String),
    Authorization(String),
    State(String),
    Conflict(String),
    PeriodHasReports { period_id: String, count: usize },
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Io(_) | AppError::Db(_) | AppError::Json(_) | AppError::Config(_) => {
                ErrorKind::Internal
            }
            AppError::Lock(_) => ErrorKind::Conflict,
            AppError::ParseState(_) | AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Authorization(_) => ErrorKind::Authorization,
            AppError::State(_) => ErrorKind::State,
            AppError::Conflict(_) | AppError::PeriodHasReports { .. } => ErrorKind::Conflict,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Db(err) => write!(f, "database error: {}", err),
            AppError::Json(err) => write!(f, "json error: {}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Lock(err) => write!(f, "{}", err),
            AppError::ParseState(err) => write!(f, "{}", err),
            AppError::Validation(message)
            | AppError::NotFound(message)
            | AppError::Authorization(message)
            | AppError::State(message)
            | AppError::Conflict(message) => write!(f, "{}", message),
            AppError::PeriodHasReports { period_id, count } => write!(
                f,
                "period '{}' still has {} completion record(s); force the deletion to remove them",
                period_id, count
            ),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Db(err) => Some(err),
            AppError::Json(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::Lock(err) => Some(err),
            AppError::ParseState(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::Json(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<LockError> for AppError {
    fn from(value: LockError) -> Self {
        AppError::Lock(value)
    }
}

impl From<ParseStateError> for AppError {
    fn from(value: ParseStateError) -> Self {
        AppError::ParseState(value)
    }
}

impl From<InvalidStateTransition> for AppError {
    fn from(value: InvalidStateTransition) -> Self {
        AppError::State(value.to_string())
    }
}

impl From<TimestampError> for AppError {
    fn from(value: TimestampError) -> Self {
        AppError::Validation(value.to_string())
    }
}

impl From<CollaborationError> for AppError {
    fn from(value: CollaborationError) -> Self {
        AppError::Validation(value.to_string())
    }
}

impl From<DirectoryError> for AppError {
    fn from(value: DirectoryError) -> Self {
        match value {
            DirectoryError::Db(err) => AppError::Db(err),
            DirectoryError::UnknownItem(_) | DirectoryError::UnknownCollaborator(_) => {
                AppError::NotFound(value.to_string())
            }
            DirectoryError::InactiveItem(_) | DirectoryError::InactiveCollaborator(_) => {
                AppError::Validation(value.to_string())
            }
            DirectoryError::NotCoordinator(_) => AppError::Authorization(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests;
