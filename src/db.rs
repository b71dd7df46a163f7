use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result, Row};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::assignment::AssignmentRecord;
use crate::domain::period::{index_assignments, Period, Progress};
use crate::domain::report::CompletionRecord;
use crate::domain::state::ReportState;
use crate::domain::timestamp::{format_rfc3339, now_utc};

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "baseline_period_schema_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS period (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    coordinator_id TEXT NOT NULL,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    active INTEGER NOT NULL,
    description TEXT,
    total_devices INTEGER NOT NULL DEFAULT 0,
    completed_devices INTEGER NOT NULL DEFAULT 0,
    completion_percent INTEGER NOT NULL DEFAULT 0,
    assignments_json TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS completion_record (
    id TEXT PRIMARY KEY,
    catalog_item_id TEXT NOT NULL,
    collaborator_id TEXT NOT NULL,
    specialty_id TEXT,
    captured_at TEXT NOT NULL,
    evidence_json TEXT NOT NULL DEFAULT '[]',
    note TEXT,
    state TEXT NOT NULL,
    is_collaborative INTEGER NOT NULL DEFAULT 0,
    contributors_json TEXT NOT NULL DEFAULT '[]',
    period_id TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_period_coordinator ON period(coordinator_id);
CREATE INDEX IF NOT EXISTS idx_period_active ON period(active);
CREATE INDEX IF NOT EXISTS idx_completion_record_period ON completion_record(period_id);
CREATE INDEX IF NOT EXISTS idx_completion_record_item ON completion_record(catalog_item_id);
"#,
    },
    Migration {
        version: 2,
        name: "directory_and_audit_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS catalog_item (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    location TEXT,
    building TEXT,
    level TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS collaborator (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    policy_id TEXT,
    role TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS period_event (
    event_id TEXT PRIMARY KEY,
    period_id TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    type TEXT NOT NULL,
    data_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_period_event_period ON period_event(period_id, occurred_at);
"#,
    },
];

/// Opens the store and brings the schema up to date.
pub fn open_connection(path: &str) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure_for_speed(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

/// Per-operation connection against an already migrated store.
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure_for_speed(&conn)?;
    Ok(conn)
}

fn configure_for_speed(conn: &Connection) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.pragma_update(None::<DatabaseName>, "busy_timeout", 5000i64)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, format_rfc3339(now_utc())],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_timestamp(row: &Row<'_>, idx: usize) -> Result<OffsetDateTime> {
    let raw: String = row.get(idx)?;
    OffsetDateTime::parse(&raw, &Rfc3339).map_err(|err| conversion_error(idx, err))
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion_error(idx, err))
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

const PERIOD_COLUMNS: &str = r#"
id, name, coordinator_id, start_at, end_at, active, description,
total_devices, completed_devices, completion_percent, assignments_json,
version, created_at, updated_at
"#;

fn period_from_row(row: &Row<'_>) -> Result<Period> {
    Ok(Period {
        id: row.get(0)?,
        name: row.get(1)?,
        coordinator_id: row.get(2)?,
        start_at: get_timestamp(row, 3)?,
        end_at: get_timestamp(row, 4)?,
        active: row.get(5)?,
        description: row.get(6)?,
        progress: Progress {
            total_devices: row.get(7)?,
            completed_devices: row.get(8)?,
            completion_percent: row.get(9)?,
        },
        assignments: {
            let records: Vec<AssignmentRecord> = get_json(row, 10)?;
            index_assignments(records).map_err(|err| conversion_error(10, err))?
        },
        version: row.get(11)?,
        created_at: get_timestamp(row, 12)?,
        updated_at: get_timestamp(row, 13)?,
    })
}

fn assignments_json(period: &Period) -> Result<String> {
    let records: Vec<_> = period.assignments.values().collect();
    to_json(&records)
}

pub fn insert_period(conn: &Connection, period: &Period) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO period (
    id, name, coordinator_id, start_at, end_at, active, description,
    total_devices, completed_devices, completion_percent, assignments_json,
    version, created_at, updated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
"#,
        params![
            period.id,
            period.name,
            period.coordinator_id,
            format_rfc3339(period.start_at),
            format_rfc3339(period.end_at),
            period.active,
            period.description,
            period.progress.total_devices,
            period.progress.completed_devices,
            period.progress.completion_percent,
            assignments_json(period)?,
            period.version,
            format_rfc3339(period.created_at),
            format_rfc3339(period.updated_at),
        ],
    )?;
    Ok(())
}

/// Compare-and-swap on `version`. Returns false when another writer got
/// there first; the stored version becomes `expected_version + 1`.
pub fn update_period(conn: &Connection, period: &Period, expected_version: i64) -> Result<bool> {
    let changed = conn.execute(
        r#"
UPDATE period SET
    name = ?2,
    coordinator_id = ?3,
    start_at = ?4,
    end_at = ?5,
    active = ?6,
    description = ?7,
    total_devices = ?8,
    completed_devices = ?9,
    completion_percent = ?10,
    assignments_json = ?11,
    version = version + 1,
    updated_at = ?12
WHERE id = ?1 AND version = ?13
"#,
        params![
            period.id,
            period.name,
            period.coordinator_id,
            format_rfc3339(period.start_at),
            format_rfc3339(period.end_at),
            period.active,
            period.description,
            period.progress.total_devices,
            period.progress.completed_devices,
            period.progress.completion_percent,
            assignments_json(period)?,
            format_rfc3339(period.updated_at),
            expected_version,
        ],
    )?;
    Ok(changed == 1)
}

pub fn get_period(conn: &Connection, id: &str) -> Result<Option<Period>> {
    conn.query_row(
        &format!("SELECT {PERIOD_COLUMNS} FROM period WHERE id = ?1"),
        params![id],
        period_from_row,
    )
    .optional()
}

pub fn list_periods(conn: &Connection) -> Result<Vec<Period>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PERIOD_COLUMNS} FROM period ORDER BY start_at DESC, id ASC"
    ))?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(period_from_row(row)?);
    }
    Ok(result)
}

pub fn list_period_ids(conn: &Connection, active_only: bool) -> Result<Vec<String>> {
    let sql = if active_only {
        "SELECT id FROM period WHERE active = 1 ORDER BY id"
    } else {
        "SELECT id FROM period ORDER BY id"
    };
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn delete_period(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM period WHERE id = ?1", params![id])?;
    Ok(removed == 1)
}

const REPORT_COLUMNS: &str = r#"
id, catalog_item_id, collaborator_id, specialty_id, captured_at, evidence_json,
note, state, is_collaborative, contributors_json, period_id, updated_at
"#;

fn report_from_row(row: &Row<'_>) -> Result<CompletionRecord> {
    let state_raw: String = row.get(7)?;
    let state = state_raw
        .parse::<ReportState>()
        .map_err(|err| conversion_error(7, err))?;
    Ok(CompletionRecord {
        id: row.get(0)?,
        catalog_item_id: row.get(1)?,
        collaborator_id: row.get(2)?,
        specialty_id: row.get(3)?,
        captured_at: get_timestamp(row, 4)?,
        evidence: get_json(row, 5)?,
        note: row.get(6)?,
        state,
        is_collaborative: row.get(8)?,
        contributors: get_json(row, 9)?,
        period_id: row.get(10)?,
        updated_at: get_timestamp(row, 11)?,
    })
}

pub fn upsert_report(conn: &Connection, report: &CompletionRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO completion_record (
    id, catalog_item_id, collaborator_id, specialty_id, captured_at, evidence_json,
    note, state, is_collaborative, contributors_json, period_id, updated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT(id) DO UPDATE SET
    specialty_id = excluded.specialty_id,
    evidence_json = excluded.evidence_json,
    note = excluded.note,
    state = excluded.state,
    is_collaborative = excluded.is_collaborative,
    contributors_json = excluded.contributors_json,
    period_id = excluded.period_id,
    updated_at = excluded.updated_at
"#,
        params![
            report.id,
            report.catalog_item_id,
            report.collaborator_id,
            report.specialty_id,
            format_rfc3339(report.captured_at),
            to_json(&report.evidence)?,
            report.note,
            report.state.as_str(),
            report.is_collaborative,
            to_json(&report.contributors)?,
            report.period_id,
            format_rfc3339(report.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_report(conn: &Connection, id: &str) -> Result<Option<CompletionRecord>> {
    conn.query_row(
        &format!("SELECT {REPORT_COLUMNS} FROM completion_record WHERE id = ?1"),
        params![id],
        report_from_row,
    )
    .optional()
}

pub fn list_reports_for_period(conn: &Connection, period_id: &str) -> Result<Vec<CompletionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPORT_COLUMNS} FROM completion_record WHERE period_id = ?1 ORDER BY captured_at, id"
    ))?;
    let mut rows = stmt.query(params![period_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(report_from_row(row)?);
    }
    Ok(result)
}

pub fn report_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM completion_record WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub fn delete_report(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM completion_record WHERE id = ?1", params![id])?;
    Ok(removed == 1)
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CatalogItemRecord {
    pub id: String,
    pub kind: String,
    pub location: Option<String>,
    pub building: Option<String>,
    pub level: Option<String>,
    pub active: bool,
}

pub fn upsert_catalog_item(conn: &Connection, item: &CatalogItemRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO catalog_item (id, kind, location, building, level, active)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(id) DO UPDATE SET
    kind = excluded.kind,
    location = excluded.location,
    building = excluded.building,
    level = excluded.level,
    active = excluded.active
"#,
        params![
            item.id,
            item.kind,
            item.location,
            item.building,
            item.level,
            item.active
        ],
    )?;
    Ok(())
}

pub fn get_catalog_item(conn: &Connection, id: &str) -> Result<Option<CatalogItemRecord>> {
    conn.query_row(
        "SELECT id, kind, location, building, level, active FROM catalog_item WHERE id = ?1",
        params![id],
        |row| {
            Ok(CatalogItemRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                location: row.get(2)?,
                building: row.get(3)?,
                level: row.get(4)?,
                active: row.get(5)?,
            })
        },
    )
    .optional()
}

pub fn list_catalog_items(conn: &Connection) -> Result<Vec<CatalogItemRecord>> {
    let mut stmt = conn
        .prepare("SELECT id, kind, location, building, level, active FROM catalog_item ORDER BY id")?;
    let items = stmt
        .query_map([], |row| {
            Ok(CatalogItemRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                location: row.get(2)?,
                building: row.get(3)?,
                level: row.get(4)?,
                active: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(items)
}

pub fn delete_catalog_item(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM catalog_item WHERE id = ?1", params![id])?;
    Ok(removed == 1)
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CollaboratorRecord {
    pub id: String,
    pub name: String,
    pub policy_id: Option<String>,
    pub role: String,
    pub active: bool,
}

pub fn upsert_collaborator(conn: &Connection, collaborator: &CollaboratorRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO collaborator (id, name, policy_id, role, active)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    policy_id = excluded.policy_id,
    role = excluded.role,
    active = excluded.active
"#,
        params![
            collaborator.id,
            collaborator.name,
            collaborator.policy_id,
            collaborator.role,
            collaborator.active
        ],
    )?;
    Ok(())
}

pub fn get_collaborator(conn: &Connection, id: &str) -> Result<Option<CollaboratorRecord>> {
    conn.query_row(
        "SELECT id, name, policy_id, role, active FROM collaborator WHERE id = ?1",
        params![id],
        |row| {
            Ok(CollaboratorRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                policy_id: row.get(2)?,
                role: row.get(3)?,
                active: row.get(4)?,
            })
        },
    )
    .optional()
}

pub fn delete_collaborator(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM collaborator WHERE id = ?1", params![id])?;
    Ok(removed == 1)
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PeriodEventRecord {
    pub event_id: String,
    pub period_id: String,
    pub occurred_at: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

pub fn insert_period_event(conn: &Connection, event: &PeriodEventRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO period_event (event_id, period_id, occurred_at, type, data_json)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
        params![
            event.event_id,
            event.period_id,
            event.occurred_at,
            event.event_type,
            to_json(&event.data)?,
        ],
    )?;
    Ok(())
}

pub fn delete_period_events(conn: &Connection, period_id: &str) -> Result<usize> {
    conn.execute("DELETE FROM period_event WHERE period_id = ?1", params![period_id])
}

pub fn list_period_events(conn: &Connection, period_id: &str) -> Result<Vec<PeriodEventRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT event_id, period_id, occurred_at, type, data_json
FROM period_event
WHERE period_id = ?1
ORDER BY occurred_at ASC, event_id ASC
"#,
    )?;
    let mut rows = stmt.query(params![period_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(PeriodEventRecord {
            event_id: row.get(0)?,
            period_id: row.get(1)?,
            occurred_at: row.get(2)?,
            event_type: row.get(3)?,
            data: get_json(row, 4)?,
        });
    }
    Ok(result)
}

#[cfg(test)]
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}
