use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::{App, AppError};
use crate::db;
use crate::directory::CollaboratorDirectory;
use crate::domain::assignment::CompletionStamp;
use crate::domain::period::{Period, Progress};
use crate::domain::report::{validate_collaboration, CompletionPayload, CompletionRecord};
use crate::domain::state::ReportState;
use crate::domain::timestamp::{format_rfc3339, non_empty, now_utc};
use crate::events::{self, PeriodEventKind};
use crate::lifecycle::require_active;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub period_id: String,
    pub catalog_item_id: String,
    pub shape: &'static str,
    pub completion_record_id: String,
    pub completed_by: String,
    pub completed_at: String,
    pub is_collaborative: bool,
    /// Everyone whose view of the assignment now reads `completed`. A pool
    /// is one shared record, so this is its whole eligible list.
    pub covered_collaborators: Vec<String>,
    pub progress: Progress,
}

/// Corrections a participant may make to a submitted record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportPatch {
    pub note: Option<String>,
    pub specialty_id: Option<String>,
}

impl ReportPatch {
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.specialty_id.is_none()
    }
}

pub fn new_report_id() -> String {
    format!("R-{}", Uuid::now_v7())
}

fn not_assigned(catalog_item_id: &str, collaborator_id: &str) -> AppError {
    AppError::NotFound(format!(
        "assignment of '{}' not found or collaborator '{}' not authorized",
        catalog_item_id, collaborator_id
    ))
}

fn check_payload(
    conn: &Connection,
    directory: &CollaboratorDirectory,
    collaborator_id: &str,
    payload: &CompletionPayload,
) -> Result<(), AppError> {
    if !payload.is_collaborative() {
        return Ok(());
    }
    validate_collaboration(collaborator_id, &payload.contributors)?;
    for contributor in &payload.contributors {
        directory.require_active(conn, contributor.collaborator_id.trim())?;
    }
    Ok(())
}

fn build_report(
    period_id: &str,
    catalog_item_id: &str,
    collaborator_id: &str,
    payload: CompletionPayload,
    now: OffsetDateTime,
) -> CompletionRecord {
    let is_collaborative = payload.is_collaborative();
    CompletionRecord {
        id: new_report_id(),
        catalog_item_id: catalog_item_id.to_string(),
        collaborator_id: collaborator_id.to_string(),
        specialty_id: payload.specialty_id.as_deref().and_then(non_empty),
        captured_at: now,
        evidence: payload.evidence,
        note: payload.note.as_deref().and_then(non_empty),
        state: ReportState::Submitted,
        is_collaborative,
        contributors: payload.contributors,
        period_id: Some(period_id.to_string()),
        updated_at: now,
    }
}

impl App {
    /// Completes the caller's assignment for `catalog_item_id`. The lookup,
    /// the completed-state check and the report insert all run in one
    /// locked write, so of two racing callers only the first succeeds.
    /// Stamping a pooled record completes it for every eligible collaborator.
    pub fn complete(
        &self,
        period_id: &str,
        catalog_item_id: &str,
        collaborator_id: &str,
        payload: CompletionPayload,
    ) -> Result<CompletionSummary, AppError> {
        let (period, summary) = self.mutate_period(period_id, |tx, period, now| {
            require_active(period, now)?;
            let key = period
                .find_for_collaborator(catalog_item_id, collaborator_id)
                .ok_or_else(|| not_assigned(catalog_item_id, collaborator_id))?;
            let record = period
                .assignments
                .get(&key)
                .ok_or_else(|| not_assigned(catalog_item_id, collaborator_id))?;
            if record.is_completed() {
                return Err(AppError::State(format!(
                    "assignment of '{}' was already completed by '{}'",
                    catalog_item_id,
                    record.completed_by.as_deref().unwrap_or("unknown")
                )));
            }
            let shape = record.target.shape();
            let covered: Vec<String> = record
                .target
                .collaborators()
                .into_iter()
                .map(str::to_string)
                .collect();

            check_payload(tx, self.collaborators(), collaborator_id, &payload)?;
            let report = build_report(&period.id, catalog_item_id, collaborator_id, payload, now);
            db::upsert_report(tx, &report)?;

            let stamp = CompletionStamp {
                completed_at: now,
                completed_by: collaborator_id.to_string(),
                completion_record_id: report.id.clone(),
                contributors: report.contributor_ids(),
            };
            if let Some(record) = period.assignments.get_mut(&key) {
                record.mark_completed(&stamp)?;
            }

            events::record(
                tx,
                &period.id,
                PeriodEventKind::AssignmentCompleted,
                now,
                json!({
                    "catalog_item_id": catalog_item_id,
                    "completed_by": collaborator_id,
                    "completion_record_id": report.id,
                    "shape": shape,
                    "collaborative": report.is_collaborative,
                }),
            )?;

            Ok(CompletionSummary {
                period_id: period.id.clone(),
                catalog_item_id: catalog_item_id.to_string(),
                shape,
                completion_record_id: report.id,
                completed_by: collaborator_id.to_string(),
                completed_at: format_rfc3339(now),
                is_collaborative: report.is_collaborative,
                covered_collaborators: covered,
                progress: Progress::default(),
            })
        })?;

        let summary = CompletionSummary {
            progress: period.progress,
            ..summary
        };
        tracing::info!(
            period_id,
            catalog_item_id,
            completed_by = collaborator_id,
            shape = summary.shape,
            covered = summary.covered_collaborators.len(),
            "assignment completed"
        );
        Ok(summary)
    }

    /// Marks the caller's assignment as started. Informational only.
    pub fn record_progress(
        &self,
        period_id: &str,
        catalog_item_id: &str,
        collaborator_id: &str,
    ) -> Result<Period, AppError> {
        let (period, _) = self.mutate_period(period_id, |tx, period, now| {
            require_active(period, now)?;
            let key = period
                .find_for_collaborator(catalog_item_id, collaborator_id)
                .ok_or_else(|| not_assigned(catalog_item_id, collaborator_id))?;
            let record = period
                .assignments
                .get_mut(&key)
                .ok_or_else(|| not_assigned(catalog_item_id, collaborator_id))?;
            record.mark_in_progress()?;
            events::record(
                tx,
                &period.id,
                PeriodEventKind::AssignmentProgressed,
                now,
                json!({
                    "catalog_item_id": catalog_item_id,
                    "collaborator_id": collaborator_id,
                }),
            )?;
            Ok(())
        })?;
        Ok(period)
    }

    pub fn show_report(&self, report_id: &str) -> Result<CompletionRecord, AppError> {
        let conn = self.connect()?;
        db::get_report(&conn, report_id)?.ok_or_else(|| report_not_found(report_id))
    }

    /// Metadata correction by someone who took part in the work.
    pub fn update_report(
        &self,
        report_id: &str,
        actor_id: &str,
        patch: ReportPatch,
    ) -> Result<CompletionRecord, AppError> {
        if patch.is_empty() {
            return Err(AppError::Validation(
                "nothing to update: pass a note or a specialty".to_string(),
            ));
        }
        let report = self.with_transaction(|tx| {
            let mut report = db::get_report(tx, report_id)?.ok_or_else(|| report_not_found(report_id))?;
            if !report.involves(actor_id) {
                return Err(AppError::Authorization(format!(
                    "collaborator '{}' did not take part in completion record '{}'",
                    actor_id, report_id
                )));
            }
            if let Some(note) = patch.note {
                report.note = non_empty(&note);
            }
            if let Some(specialty_id) = patch.specialty_id {
                report.specialty_id = non_empty(&specialty_id);
            }
            let now = now_utc();
            report.updated_at = now;
            db::upsert_report(tx, &report)?;
            record_report_event(tx, &report, PeriodEventKind::ReportUpdated, now, json!({ "by": actor_id }))?;
            Ok(report)
        })?;
        tracing::debug!(report_id, actor_id, "completion record updated");
        Ok(report)
    }

    /// Sets the reporting-side review state. Assignment state is untouched.
    pub fn review_report(&self, report_id: &str, state: ReportState) -> Result<CompletionRecord, AppError> {
        self.with_transaction(|tx| {
            let mut report = db::get_report(tx, report_id)?.ok_or_else(|| report_not_found(report_id))?;
            if report.state == state {
                return Ok(report);
            }
            let now = now_utc();
            let previous = report.state;
            report.state = state;
            report.updated_at = now;
            db::upsert_report(tx, &report)?;
            record_report_event(
                tx,
                &report,
                PeriodEventKind::ReportUpdated,
                now,
                json!({ "state": state.as_str(), "previous": previous.as_str() }),
            )?;
            Ok(report)
        })
    }
}

pub(crate) fn report_not_found(report_id: &str) -> AppError {
    AppError::NotFound(format!("completion record '{}' not found", report_id))
}

fn record_report_event(
    conn: &Connection,
    report: &CompletionRecord,
    kind: PeriodEventKind,
    now: OffsetDateTime,
    mut data: serde_json::Value,
) -> Result<(), AppError> {
    let Some(period_id) = report.period_id.as_deref() else {
        return Ok(());
    };
    if let Some(fields) = data.as_object_mut() {
        fields.insert("completion_record_id".to_string(), json!(report.id));
    }
    events::record(conn, period_id, kind, now, data)?;
    Ok(())
}
