use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::app::{App, AppError};
use crate::db;
use crate::directory::{require_active_item, CollaboratorDirectory, DirectoryError};
use crate::domain::assignment::{
    AssignmentKey, AssignmentRecord, AssignmentSlot, AssignmentSpec, AssignmentTarget,
};
use crate::domain::period::Period;
use crate::domain::timestamp::non_empty;
use crate::events::{self, PeriodEventKind};
use crate::lifecycle::require_active;

/// One assignment as a given collaborator sees it. Pooled records appear in
/// the view of every eligible collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentView {
    pub period_id: String,
    pub period_name: String,
    pub period_active: bool,
    #[serde(flatten)]
    pub record: AssignmentRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub periods_touched: usize,
    pub records_removed: usize,
    pub records_reverted: usize,
}

/// Validates and inserts a batch of specs into `period`. Nothing is kept
/// unless every spec resolves, since callers run this inside the write
/// transaction and abort on the first error.
pub(crate) fn apply_specs(
    conn: &Connection,
    directory: &CollaboratorDirectory,
    period: &mut Period,
    specs: &[AssignmentSpec],
    now: OffsetDateTime,
) -> Result<Vec<AssignmentKey>, AppError> {
    let mut added = Vec::new();
    for spec in specs {
        let catalog_item_id = non_empty(&spec.catalog_item_id)
            .ok_or_else(|| AppError::Validation("catalog item id is required".to_string()))?;
        require_active_item(conn, &catalog_item_id)?;

        let mut collaborators: Vec<String> = Vec::with_capacity(spec.collaborators.len());
        for raw in &spec.collaborators {
            let id = non_empty(raw).ok_or_else(|| {
                AppError::Validation("collaborator ids cannot be empty".to_string())
            })?;
            if !collaborators.contains(&id) {
                collaborators.push(id);
            }
        }
        if collaborators.is_empty() {
            return Err(AppError::Validation(format!(
                "assignment of '{}' needs at least one collaborator",
                catalog_item_id
            )));
        }
        for id in &collaborators {
            directory.require_active(conn, id)?;
        }

        let notes = spec.notes.as_deref().and_then(non_empty);
        let targets = if spec.assign_to_all {
            vec![AssignmentTarget::Pooled {
                eligible: collaborators,
            }]
        } else {
            collaborators
                .into_iter()
                .map(|collaborator_id| AssignmentTarget::Individual { collaborator_id })
                .collect()
        };

        for target in targets {
            let record = AssignmentRecord::new(&catalog_item_id, target, notes.clone(), now);
            let key = record.key();
            if !period.insert_assignment(record) {
                return Err(duplicate_conflict(&key));
            }
            added.push(key);
        }
    }
    Ok(added)
}

fn duplicate_conflict(key: &AssignmentKey) -> AppError {
    match &key.slot {
        AssignmentSlot::Individual(collaborator_id) => {
            AppError::Conflict(format!(
                "'{}' is already assigned to '{}' in this period",
                key.catalog_item_id, collaborator_id
            ))
        }
        AssignmentSlot::Pool => AppError::Conflict(format!(
            "'{}' already has a pooled assignment in this period",
            key.catalog_item_id
        )),
    }
}

fn item_exists(
    conn: &Connection,
    known: &mut HashMap<String, bool>,
    catalog_item_id: &str,
) -> Result<bool, AppError> {
    if let Some(exists) = known.get(catalog_item_id) {
        return Ok(*exists);
    }
    let exists = db::get_catalog_item(conn, catalog_item_id)?.is_some();
    known.insert(catalog_item_id.to_string(), exists);
    Ok(exists)
}

fn describe_key(key: &AssignmentKey) -> serde_json::Value {
    match &key.slot {
        AssignmentSlot::Individual(collaborator_id) => json!({
            "catalog_item_id": key.catalog_item_id,
            "collaborator_id": collaborator_id,
        }),
        AssignmentSlot::Pool => json!({
            "catalog_item_id": key.catalog_item_id,
            "pooled": true,
        }),
    }
}

impl App {
    pub fn assign_individual(
        &self,
        period_id: &str,
        catalog_item_id: &str,
        collaborator_id: &str,
        notes: Option<&str>,
    ) -> Result<Period, AppError> {
        let mut spec = AssignmentSpec::individual(catalog_item_id, collaborator_id);
        spec.notes = notes.map(str::to_string);
        self.assign_devices(period_id, &[spec])
    }

    pub fn assign_pooled(
        &self,
        period_id: &str,
        catalog_item_id: &str,
        eligible: &[&str],
        notes: Option<&str>,
    ) -> Result<Period, AppError> {
        if eligible.is_empty() {
            return Err(AppError::Validation(
                "a pooled assignment needs at least one eligible collaborator".to_string(),
            ));
        }
        let mut spec = AssignmentSpec::pooled(catalog_item_id, eligible);
        spec.notes = notes.map(str::to_string);
        self.assign_devices(period_id, &[spec])
    }

    /// Batch form used by the CLI. All specs land or none do.
    pub fn assign_devices(&self, period_id: &str, specs: &[AssignmentSpec]) -> Result<Period, AppError> {
        if specs.is_empty() {
            return Err(AppError::Validation(
                "at least one assignment is required".to_string(),
            ));
        }
        let (period, added) = self.mutate_period(period_id, |tx, period, now| {
            require_active(period, now)?;
            let added = apply_specs(tx, self.collaborators(), period, specs, now)?;
            for key in &added {
                events::record(tx, &period.id, PeriodEventKind::AssignmentAdded, now, describe_key(key))?;
            }
            Ok(added.len())
        })?;
        tracing::info!(period_id, added, "assignments added");
        Ok(period)
    }

    /// Moves an individual assignment to another collaborator. Completed
    /// work keeps its owner.
    pub fn reassign_owner(
        &self,
        period_id: &str,
        catalog_item_id: &str,
        old_collaborator_id: &str,
        new_collaborator_id: &str,
    ) -> Result<Period, AppError> {
        let new_owner = non_empty(new_collaborator_id)
            .ok_or_else(|| AppError::Validation("new collaborator is required".to_string()))?;

        let (period, _) = self.mutate_period(period_id, |tx, period, now| {
            require_active(period, now)?;
            let old_key = AssignmentKey::individual(catalog_item_id, old_collaborator_id);
            let record = period.assignments.get(&old_key).ok_or_else(|| {
                AppError::NotFound(format!(
                    "no assignment of '{}' to '{}' in period '{}'",
                    catalog_item_id, old_collaborator_id, period.id
                ))
            })?;
            if record.is_completed() {
                return Err(AppError::State(format!(
                    "assignment of '{}' is already completed and cannot be reassigned",
                    catalog_item_id
                )));
            }
            if new_owner == old_collaborator_id {
                return Ok(());
            }

            match self.collaborators().require_active(tx, &new_owner) {
                Ok(_) => {}
                Err(DirectoryError::Db(err)) => return Err(err.into()),
                Err(err) => return Err(AppError::Validation(err.to_string())),
            }
            let new_key = AssignmentKey::individual(catalog_item_id, &new_owner);
            if period.assignments.contains_key(&new_key) {
                return Err(duplicate_conflict(&new_key));
            }

            if let Some(mut record) = period.assignments.remove(&old_key) {
                record.target = AssignmentTarget::Individual {
                    collaborator_id: new_owner.clone(),
                };
                period.assignments.insert(new_key, record);
            }
            events::record(
                tx,
                &period.id,
                PeriodEventKind::AssignmentReassigned,
                now,
                json!({
                    "catalog_item_id": catalog_item_id,
                    "from": old_collaborator_id,
                    "to": new_owner,
                }),
            )?;
            Ok(())
        })?;
        tracing::info!(period_id, catalog_item_id, "assignment reassigned");
        Ok(period)
    }

    /// Open work across active periods: owned individual records plus pooled
    /// records the collaborator is eligible for.
    pub fn list_pending_for_collaborator(
        &self,
        collaborator_id: &str,
    ) -> Result<Vec<AssignmentView>, AppError> {
        self.sweep_before_read()?;
        self.collect_views(collaborator_id, |period, record| {
            period.active && record.state.is_open()
        })
    }

    /// History view: every state, active and inactive periods alike.
    pub fn list_all_for_collaborator(
        &self,
        collaborator_id: &str,
    ) -> Result<Vec<AssignmentView>, AppError> {
        self.collect_views(collaborator_id, |_, _| true)
    }

    fn collect_views<F>(&self, collaborator_id: &str, keep: F) -> Result<Vec<AssignmentView>, AppError>
    where
        F: Fn(&Period, &AssignmentRecord) -> bool,
    {
        let conn = self.connect()?;
        let mut views = Vec::new();
        for period in db::list_periods(&conn)? {
            for record in period.assignments.values() {
                if record.target.admits(collaborator_id) && keep(&period, record) {
                    views.push(AssignmentView {
                        period_id: period.id.clone(),
                        period_name: period.name.clone(),
                        period_active: period.active,
                        record: record.clone(),
                    });
                }
            }
        }
        Ok(views)
    }

    /// Drops assignments whose catalog item no longer exists and resets
    /// assignments whose completion record was deleted elsewhere. A second
    /// run over a clean store touches nothing.
    pub fn repair_broken_references(&self) -> Result<RepairSummary, AppError> {
        let conn = self.connect()?;
        let period_ids = db::list_period_ids(&conn, false)?;
        let mut known_items: HashMap<String, bool> = HashMap::new();
        let mut summary = RepairSummary::default();

        for period_id in period_ids {
            let Some(snapshot) = db::get_period(&conn, &period_id)? else {
                continue;
            };
            let mut needs_work = false;
            for record in snapshot.assignments.values() {
                let exists = item_exists(&conn, &mut known_items, &record.catalog_item_id)?;
                let dangling_report = match record.completion_record_id.as_deref() {
                    Some(report_id) => !db::report_exists(&conn, report_id)?,
                    None => false,
                };
                if !exists || dangling_report {
                    needs_work = true;
                    break;
                }
            }
            if !needs_work {
                continue;
            }

            let outcome = self.mutate_period(&period_id, |tx, period, now| {
                let mut current: HashMap<String, bool> = HashMap::new();
                let mut broken: Vec<AssignmentKey> = Vec::new();
                for key in period.assignments.keys() {
                    if !item_exists(tx, &mut current, &key.catalog_item_id)? {
                        broken.push(key.clone());
                    }
                }
                let mut removed = 0;
                for key in &broken {
                    if period.assignments.remove(key).is_some() {
                        removed += 1;
                    }
                }

                let mut reverted = 0;
                for record in period.assignments.values_mut() {
                    if let Some(report_id) = record.completion_record_id.clone() {
                        if !db::report_exists(tx, &report_id)? {
                            record.revert_to_pending();
                            reverted += 1;
                        }
                    }
                }

                if removed + reverted > 0 {
                    events::record(
                        tx,
                        &period.id,
                        PeriodEventKind::ReferencesRepaired,
                        now,
                        json!({ "removed": removed, "reverted": reverted }),
                    )?;
                }
                Ok((removed, reverted))
            });
            match outcome {
                Ok((_, (removed, reverted))) => {
                    if removed + reverted > 0 {
                        summary.periods_touched += 1;
                        summary.records_removed += removed;
                        summary.records_reverted += reverted;
                    }
                }
                Err(AppError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            periods_touched = summary.periods_touched,
            removed = summary.records_removed,
            reverted = summary.records_reverted,
            "broken references repaired"
        );
        Ok(summary)
    }
}
