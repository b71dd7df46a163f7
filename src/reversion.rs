//! Removing assignments and undoing what their completion left behind.
//!
//! Individual and pooled deletions share one path keyed by the assignment
//! slot. Reports are deleted before the assignment disappears, and any
//! record still pointing at a deleted report is put back to `pending`.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::app::{App, AppError};
use crate::completion::report_not_found;
use crate::db;
use crate::domain::assignment::{AssignmentKey, AssignmentRecord, AssignmentSlot};
use crate::domain::period::Period;
use crate::events::{self, PeriodEventKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalSummary {
    pub period_id: String,
    pub catalog_item_id: String,
    pub shape: &'static str,
    pub was_completed: bool,
    pub reports_deleted: Vec<String>,
    /// Retained records that pointed at a deleted report.
    pub reverted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevertSummary {
    pub completion_record_id: String,
    pub period_ids: Vec<String>,
    pub reverted: usize,
}

/// Reports owned by a removed assignment: its linked record, plus, for
/// completed pooled work, any participant's report for the item that no
/// remaining assignment in `period` links to. `period` must already have
/// the removed record taken out.
fn owned_reports(
    conn: &Connection,
    period: &Period,
    key: &AssignmentKey,
    record: &AssignmentRecord,
) -> Result<Vec<String>, AppError> {
    let mut ids: Vec<String> = record.completion_record_id.iter().cloned().collect();
    if key.slot == AssignmentSlot::Pool && record.is_completed() {
        let participants = record.completion_participants();
        for report in db::list_reports_for_period(conn, &period.id)? {
            if report.catalog_item_id == key.catalog_item_id
                && participants.contains(&report.collaborator_id)
                && period.keys_linked_to(&report.id).is_empty()
                && !ids.contains(&report.id)
            {
                ids.push(report.id);
            }
        }
    }
    Ok(ids)
}

/// Resets every record in `period` linked to `report_id`.
fn revert_links(
    conn: &Connection,
    period: &mut Period,
    report_id: &str,
    now: OffsetDateTime,
) -> Result<usize, AppError> {
    let keys = period.keys_linked_to(report_id);
    for key in &keys {
        if let Some(record) = period.assignments.get_mut(key) {
            record.revert_to_pending();
            events::record(
                conn,
                &period.id,
                PeriodEventKind::AssignmentReverted,
                now,
                json!({
                    "catalog_item_id": key.catalog_item_id,
                    "completion_record_id": report_id,
                }),
            )?;
        }
    }
    Ok(keys.len())
}

fn periods_linked_to(conn: &Connection, report_id: &str) -> Result<Vec<String>, AppError> {
    Ok(db::list_periods(conn)?
        .into_iter()
        .filter(|period| !period.keys_linked_to(report_id).is_empty())
        .map(|period| period.id)
        .collect())
}

impl App {
    pub fn delete_assignment(
        &self,
        period_id: &str,
        catalog_item_id: &str,
        collaborator_id: &str,
    ) -> Result<RemovalSummary, AppError> {
        self.remove_assignment(period_id, AssignmentKey::individual(catalog_item_id, collaborator_id))
    }

    pub fn delete_pooled_assignment(
        &self,
        period_id: &str,
        catalog_item_id: &str,
    ) -> Result<RemovalSummary, AppError> {
        self.remove_assignment(period_id, AssignmentKey::pooled(catalog_item_id))
    }

    /// Allowed on inactive periods too; cleanup is never blocked by dates.
    fn remove_assignment(&self, period_id: &str, key: AssignmentKey) -> Result<RemovalSummary, AppError> {
        let (_, summary) = self.mutate_period(period_id, |tx, period, now| {
            let record = period.assignments.remove(&key).ok_or_else(|| match &key.slot {
                AssignmentSlot::Individual(collaborator_id) => AppError::NotFound(format!(
                    "no assignment of '{}' to '{}' in period '{}'",
                    key.catalog_item_id, collaborator_id, period.id
                )),
                AssignmentSlot::Pool => AppError::NotFound(format!(
                    "no pooled assignment of '{}' in period '{}'",
                    key.catalog_item_id, period.id
                )),
            })?;

            let report_ids = owned_reports(tx, period, &key, &record)?;
            let mut reports_deleted = Vec::new();
            let mut reverted = 0;
            for report_id in report_ids {
                if db::delete_report(tx, &report_id)? {
                    events::record(
                        tx,
                        &period.id,
                        PeriodEventKind::ReportDeleted,
                        now,
                        json!({ "completion_record_id": report_id }),
                    )?;
                    reports_deleted.push(report_id.clone());
                }
                reverted += revert_links(tx, period, &report_id, now)?;
            }

            events::record(
                tx,
                &period.id,
                PeriodEventKind::AssignmentRemoved,
                now,
                json!({
                    "catalog_item_id": key.catalog_item_id,
                    "shape": record.target.shape(),
                    "was_completed": record.is_completed(),
                    "reports_deleted": reports_deleted,
                }),
            )?;
            Ok(RemovalSummary {
                period_id: period.id.clone(),
                catalog_item_id: key.catalog_item_id.clone(),
                shape: record.target.shape(),
                was_completed: record.is_completed(),
                reports_deleted,
                reverted,
            })
        })?;
        tracing::info!(
            period_id,
            catalog_item_id = %summary.catalog_item_id,
            shape = summary.shape,
            reports_deleted = summary.reports_deleted.len(),
            "assignment removed"
        );
        Ok(summary)
    }

    /// Resets whatever still references a report that was deleted outside
    /// the ledger. Safe to call again; a second run finds nothing linked.
    pub fn revert_to_pending(&self, report_id: &str) -> Result<RevertSummary, AppError> {
        let conn = self.connect()?;
        let period_ids = periods_linked_to(&conn, report_id)?;
        drop(conn);

        let mut summary = RevertSummary {
            completion_record_id: report_id.to_string(),
            ..RevertSummary::default()
        };
        for period_id in period_ids {
            let (_, reverted) =
                self.mutate_period(&period_id, |tx, period, now| revert_links(tx, period, report_id, now))?;
            if reverted > 0 {
                summary.reverted += reverted;
                summary.period_ids.push(period_id);
            }
        }
        tracing::info!(report_id, reverted = summary.reverted, "assignments reverted to pending");
        Ok(summary)
    }

    /// Standalone report deletion. The owning period's links are reverted in
    /// the same write as the delete.
    pub fn delete_report(&self, report_id: &str) -> Result<RevertSummary, AppError> {
        let conn = self.connect()?;
        let report = db::get_report(&conn, report_id)?.ok_or_else(|| report_not_found(report_id))?;
        let mut linked = periods_linked_to(&conn, report_id)?;
        drop(conn);

        let mut summary = RevertSummary {
            completion_record_id: report_id.to_string(),
            ..RevertSummary::default()
        };
        let owner = report
            .period_id
            .clone()
            .filter(|period_id| linked.contains(period_id))
            .or_else(|| linked.first().cloned());

        match owner {
            Some(owner) => {
                linked.retain(|period_id| *period_id != owner);
                let (_, reverted) = self.mutate_period(&owner, |tx, period, now| {
                    if !db::delete_report(tx, report_id)? {
                        return Err(report_not_found(report_id));
                    }
                    events::record(
                        tx,
                        &period.id,
                        PeriodEventKind::ReportDeleted,
                        now,
                        json!({ "completion_record_id": report_id }),
                    )?;
                    revert_links(tx, period, report_id, now)
                })?;
                summary.reverted += reverted;
                summary.period_ids.push(owner);
            }
            None => {
                self.with_transaction(|tx| {
                    if !db::delete_report(tx, report_id)? {
                        return Err(report_not_found(report_id));
                    }
                    Ok(())
                })?;
            }
        }

        for period_id in linked {
            let (_, reverted) =
                self.mutate_period(&period_id, |tx, period, now| revert_links(tx, period, report_id, now))?;
            if reverted > 0 {
                summary.reverted += reverted;
                summary.period_ids.push(period_id);
            }
        }
        tracing::info!(report_id, reverted = summary.reverted, "completion record deleted");
        Ok(summary)
    }
}
