use rusqlite::Connection;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{self, PeriodEventRecord};
use crate::domain::timestamp::format_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodEventKind {
    PeriodCreated,
    PeriodDatesSet,
    PeriodFinalized,
    PeriodSwept,
    AssignmentAdded,
    AssignmentReassigned,
    AssignmentProgressed,
    AssignmentCompleted,
    AssignmentRemoved,
    AssignmentReverted,
    ReportUpdated,
    ReportDeleted,
    ReferencesRepaired,
}

impl PeriodEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodEventKind::PeriodCreated => "period.created",
            PeriodEventKind::PeriodDatesSet => "period.dates_set",
            PeriodEventKind::PeriodFinalized => "period.finalized",
            PeriodEventKind::PeriodSwept => "period.swept",
            PeriodEventKind::AssignmentAdded => "assignment.added",
            PeriodEventKind::AssignmentReassigned => "assignment.reassigned",
            PeriodEventKind::AssignmentProgressed => "assignment.progressed",
            PeriodEventKind::AssignmentCompleted => "assignment.completed",
            PeriodEventKind::AssignmentRemoved => "assignment.removed",
            PeriodEventKind::AssignmentReverted => "assignment.reverted",
            PeriodEventKind::ReportUpdated => "report.updated",
            PeriodEventKind::ReportDeleted => "report.deleted",
            PeriodEventKind::ReferencesRepaired => "period.references_repaired",
        }
    }
}

pub fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

/// Appends one audit row. Callers pass the open transaction so the event
/// commits or rolls back with the change it describes.
pub fn record(
    conn: &Connection,
    period_id: &str,
    kind: PeriodEventKind,
    occurred_at: OffsetDateTime,
    data: Value,
) -> rusqlite::Result<()> {
    db::insert_period_event(
        conn,
        &PeriodEventRecord {
            event_id: new_event_id(),
            period_id: period_id.to_string(),
            occurred_at: format_rfc3339(occurred_at),
            event_type: kind.as_str().to_string(),
            data,
        },
    )
}
