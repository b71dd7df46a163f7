use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::{App, AppError};
use crate::db;
use crate::domain::assignment::AssignmentSpec;
use crate::domain::period::{derive_active, window_is_valid, Period, Progress};
use crate::domain::timestamp::{format_rfc3339, non_empty, now_utc};
use crate::events::{self, PeriodEventKind};
use crate::ledger;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct NewPeriod {
    pub name: String,
    pub coordinator_id: String,
    pub start_at: OffsetDateTime,
    pub end_at: OffsetDateTime,
    pub description: Option<String>,
    pub seed: Vec<AssignmentSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct PeriodFilter {
    pub coordinator_id: Option<String>,
    pub active: Option<bool>,
    /// Periods overlapping `[from, to]` match; either side may be open.
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PeriodFilter {
    fn matches(&self, period: &Period) -> bool {
        if let Some(coordinator_id) = self.coordinator_id.as_deref() {
            if period.coordinator_id != coordinator_id {
                return false;
            }
        }
        if let Some(active) = self.active {
            if period.active != active {
                return false;
            }
        }
        if let Some(from) = self.from {
            if period.end_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if period.start_at > to {
                return false;
            }
        }
        true
    }

    fn paging(&self) -> Result<(u32, u32), AppError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::Validation("page numbers start at 1".to_string()));
        }
        let per_page = match self.per_page {
            None => DEFAULT_PAGE_SIZE,
            Some(0) => {
                return Err(AppError::Validation(
                    "per_page must be greater than zero".to_string(),
                ))
            }
            Some(value) => value.min(MAX_PAGE_SIZE),
        };
        Ok((page, per_page))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodPage {
    pub items: Vec<Period>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub deactivated: usize,
    pub period_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedPeriod {
    pub period_id: String,
    pub reports_deleted: usize,
    /// Audit rows removed with the period.
    pub events_deleted: usize,
}

pub fn new_period_id() -> String {
    format!("P-{}", Uuid::now_v7())
}

/// Assignment mutations are refused once a period is closed or its end
/// has passed, swept or not.
pub(crate) fn require_active(period: &Period, now: OffsetDateTime) -> Result<(), AppError> {
    if period.active && !period.is_expired(now) {
        Ok(())
    } else {
        Err(AppError::State(format!(
            "period '{}' is inactive",
            period.id
        )))
    }
}

/// Deactivates `period` when it is still flagged active past its end,
/// writing the row and a swept event. Returns whether it flipped.
pub(crate) fn expire_if_ended(
    conn: &Connection,
    period: &mut Period,
    now: OffsetDateTime,
) -> Result<bool, AppError> {
    if !period.active || !period.is_expired(now) {
        return Ok(false);
    }
    period.active = false;
    period.updated_at = now;
    if !db::update_period(conn, period, period.version)? {
        return Err(AppError::Conflict(format!(
            "period '{}' was modified concurrently; retry the operation",
            period.id
        )));
    }
    period.version += 1;
    events::record(
        conn,
        &period.id,
        PeriodEventKind::PeriodSwept,
        now,
        json!({ "end_at": format_rfc3339(period.end_at) }),
    )?;
    Ok(true)
}

fn validate_window(start_at: OffsetDateTime, end_at: OffsetDateTime) -> Result<(), AppError> {
    if window_is_valid(start_at, end_at) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "end '{}' must be after start '{}'",
            format_rfc3339(end_at),
            format_rfc3339(start_at)
        )))
    }
}

impl App {
    pub fn create_period(&self, input: NewPeriod) -> Result<Period, AppError> {
        let name = non_empty(&input.name)
            .ok_or_else(|| AppError::Validation("period name is required".to_string()))?;
        let coordinator_id = non_empty(&input.coordinator_id)
            .ok_or_else(|| AppError::Validation("coordinator is required".to_string()))?;
        validate_window(input.start_at, input.end_at)?;

        let period = self.with_transaction(|tx| {
            self.collaborators().require_coordinator(tx, &coordinator_id)?;

            let now = now_utc();
            let mut period = Period {
                id: new_period_id(),
                name,
                coordinator_id,
                start_at: input.start_at,
                end_at: input.end_at,
                active: derive_active(input.end_at, now),
                description: input.description.as_deref().and_then(non_empty),
                assignments: Default::default(),
                progress: Progress::default(),
                version: 0,
                created_at: now,
                updated_at: now,
            };
            let keys = ledger::apply_specs(tx, self.collaborators(), &mut period, &input.seed, now)?;
            period.refresh_progress();
            db::insert_period(tx, &period)?;
            events::record(
                tx,
                &period.id,
                PeriodEventKind::PeriodCreated,
                now,
                json!({
                    "name": period.name,
                    "coordinator_id": period.coordinator_id,
                    "start_at": format_rfc3339(period.start_at),
                    "end_at": format_rfc3339(period.end_at),
                    "seeded": keys.len(),
                }),
            )?;
            Ok(period)
        })?;

        tracing::info!(
            period_id = %period.id,
            seeded = period.progress.total_devices,
            active = period.active,
            "period created"
        );
        Ok(period)
    }

    /// Re-derives `active` from the new end date in the same write, so a
    /// past end closes the period and a future one reopens it.
    pub fn update_dates(
        &self,
        period_id: &str,
        start_at: OffsetDateTime,
        end_at: OffsetDateTime,
    ) -> Result<Period, AppError> {
        validate_window(start_at, end_at)?;
        let (period, _) = self.mutate_period(period_id, |tx, period, now| {
            period.start_at = start_at;
            period.end_at = end_at;
            period.active = derive_active(end_at, now);
            events::record(
                tx,
                &period.id,
                PeriodEventKind::PeriodDatesSet,
                now,
                json!({
                    "start_at": format_rfc3339(start_at),
                    "end_at": format_rfc3339(end_at),
                    "active": period.active,
                }),
            )?;
            Ok(())
        })?;
        tracing::info!(period_id, active = period.active, "period dates updated");
        Ok(period)
    }

    pub fn finalize_period(&self, period_id: &str) -> Result<Period, AppError> {
        let (period, _) = self.mutate_period(period_id, |tx, period, now| {
            if period.active {
                period.active = false;
                events::record(tx, &period.id, PeriodEventKind::PeriodFinalized, now, json!({}))?;
            }
            Ok(())
        })?;
        tracing::info!(period_id, "period finalized");
        Ok(period)
    }

    pub fn sweep_expired(&self) -> Result<SweepSummary, AppError> {
        self.sweep_expired_at(now_utc())
    }

    /// Deactivates every active period whose end is before `now`. Inactive
    /// periods are never loaded for writing, so repeated runs are no-ops.
    pub fn sweep_expired_at(&self, now: OffsetDateTime) -> Result<SweepSummary, AppError> {
        let conn = self.connect()?;
        let mut candidates = Vec::new();
        for period_id in db::list_period_ids(&conn, true)? {
            if let Some(period) = db::get_period(&conn, &period_id)? {
                if period.active && period.is_expired(now) {
                    candidates.push(period_id);
                }
            }
        }
        drop(conn);

        let mut summary = SweepSummary::default();
        for period_id in candidates {
            let outcome = self
                .with_locked_period(&period_id, |tx, mut period| expire_if_ended(tx, &mut period, now));
            match outcome {
                Ok(true) => {
                    summary.deactivated += 1;
                    summary.period_ids.push(period_id);
                }
                Ok(false) | Err(AppError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        if summary.deactivated > 0 {
            tracing::info!(deactivated = summary.deactivated, "expired periods swept");
        }
        Ok(summary)
    }

    /// Runs the sweep first when configured to, so reads never show a
    /// period as active past its end.
    pub(crate) fn sweep_before_read(&self) -> Result<(), AppError> {
        if self.config().sweep.on_list {
            self.sweep_expired()?;
        }
        Ok(())
    }

    pub fn list_periods(&self, filter: &PeriodFilter) -> Result<PeriodPage, AppError> {
        let (page, per_page) = filter.paging()?;
        self.sweep_before_read()?;
        let conn = self.connect()?;
        let matching: Vec<Period> = db::list_periods(&conn)?
            .into_iter()
            .filter(|period| filter.matches(period))
            .collect();
        let total = matching.len();
        let skip = ((page - 1) as usize).saturating_mul(per_page as usize);
        let items = matching
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .collect();
        Ok(PeriodPage {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Refuses while completion records still point at the period, unless
    /// `force` is set, in which case those records go first.
    pub fn delete_period(&self, period_id: &str, force: bool) -> Result<DeletedPeriod, AppError> {
        let deleted = self.with_locked_period(period_id, |tx, period| {
            let mut report_ids: Vec<String> = db::list_reports_for_period(tx, &period.id)?
                .into_iter()
                .map(|report| report.id)
                .collect();
            for linked in period.linked_report_ids() {
                if !report_ids.contains(&linked) && db::report_exists(tx, &linked)? {
                    report_ids.push(linked);
                }
            }

            if !report_ids.is_empty() && !force {
                return Err(AppError::PeriodHasReports {
                    period_id: period.id.clone(),
                    count: report_ids.len(),
                });
            }
            for report_id in &report_ids {
                db::delete_report(tx, report_id)?;
            }
            let events_deleted = db::delete_period_events(tx, &period.id)?;
            db::delete_period(tx, &period.id)?;
            Ok(DeletedPeriod {
                period_id: period.id,
                reports_deleted: report_ids.len(),
                events_deleted,
            })
        })?;
        tracing::info!(
            period_id,
            reports_deleted = deleted.reports_deleted,
            events_deleted = deleted.events_deleted,
            force,
            "period deleted"
        );
        Ok(deleted)
    }
}
