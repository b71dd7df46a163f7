use std::path::PathBuf;

use time::macros::datetime;
use time::Duration;
use uuid::Uuid;

use super::{App, AppError};
use crate::completion::ReportPatch;
use crate::config::Config;
use crate::db::{self, CatalogItemRecord, CollaboratorRecord};
use crate::domain::assignment::{AssignmentKey, AssignmentSpec};
use crate::domain::period::Period;
use crate::domain::report::{CompletionPayload, Contributor, ContributorRole, EvidenceKind, EvidenceRef};
use crate::domain::state::{AssignmentState, ReportState};
use crate::domain::timestamp::now_utc;
use crate::ledger::AssignmentView;
use crate::lifecycle::{NewPeriod, PeriodFilter};

struct Fixture {
    root: PathBuf,
    app: App,
}

impl Fixture {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("mperiod-app-test-{}", Uuid::now_v7()));
        let db_path = root.join("state.sqlite");
        let app = App::open(db_path.to_str().expect("utf8 path"), Config::default())
            .expect("app should open");
        let fixture = Self { root, app };
        fixture.collaborator("boss", "coordinator");
        fixture.collaborator("boss2", "coordinator");
        for id in ["c1", "c2", "c3", "c4"] {
            fixture.collaborator(id, "collaborator");
        }
        for id in ["dev-x", "dev-y", "dev-z"] {
            fixture.item(id, true);
        }
        fixture
    }

    fn collaborator(&self, id: &str, role: &str) {
        self.app
            .register_collaborator(&CollaboratorRecord {
                id: id.to_string(),
                name: id.to_uppercase(),
                policy_id: Some("policy-1".to_string()),
                role: role.to_string(),
                active: true,
            })
            .expect("collaborator should register");
    }

    fn item(&self, id: &str, active: bool) {
        self.app
            .register_catalog_item(&CatalogItemRecord {
                id: id.to_string(),
                kind: "extinguisher".to_string(),
                location: Some("north wing".to_string()),
                building: Some("B1".to_string()),
                level: Some("2".to_string()),
                active,
            })
            .expect("catalog item should register");
    }

    fn active_period(&self, seed: Vec<AssignmentSpec>) -> Period {
        let now = now_utc();
        self.app
            .create_period(NewPeriod {
                name: "Q1-2025".to_string(),
                coordinator_id: "boss".to_string(),
                start_at: now - Duration::days(10),
                end_at: now + Duration::days(80),
                description: None,
                seed,
            })
            .expect("period should be created")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn view_of<'a>(views: &'a [AssignmentView], catalog_item_id: &str) -> &'a AssignmentView {
    views
        .iter()
        .find(|view| view.record.catalog_item_id == catalog_item_id)
        .unwrap_or_else(|| panic!("expected a view of {catalog_item_id}"))
}

fn collaborative_payload(principal: &str, others: &[&str]) -> CompletionPayload {
    let mut contributors = vec![Contributor {
        collaborator_id: principal.to_string(),
        role: ContributorRole::Principal,
        description: None,
    }];
    for id in others {
        contributors.push(Contributor {
            collaborator_id: id.to_string(),
            role: ContributorRole::Contributor,
            description: Some("assisted".to_string()),
        });
    }
    CompletionPayload {
        specialty_id: Some("fire-safety".to_string()),
        evidence: vec![EvidenceRef {
            kind: EvidenceKind::Work,
            reference: "photos/work-1.jpg".to_string(),
        }],
        note: Some("replaced seal".to_string()),
        contributors,
    }
}

#[test]
fn scenario_a_create_period_with_one_individual_seed() {
    let fixture = Fixture::new();
    let period = fixture
        .app
        .create_period(NewPeriod {
            name: "Q1-2025".to_string(),
            coordinator_id: "boss".to_string(),
            start_at: datetime!(2025-01-01 00:00 UTC),
            end_at: datetime!(2025-03-31 23:59:59 UTC),
            description: Some("first quarter".to_string()),
            seed: vec![AssignmentSpec::individual("dev-x", "c1")],
        })
        .expect("create should succeed");

    assert!(period.id.starts_with("P-"));
    assert_eq!(period.active, now_utc() <= period.end_at);
    assert_eq!(period.progress.total_devices, 1);
    assert_eq!(period.progress.completed_devices, 0);
    assert_eq!(period.progress.completion_percent, 0);

    let record = &period.assignments[&AssignmentKey::individual("dev-x", "c1")];
    assert_eq!(record.state, AssignmentState::Pending);

    let stored = fixture.app.show_period(&period.id).expect("show should succeed");
    assert_eq!(stored, period);
    let events = fixture.app.period_events(&period.id).expect("events");
    assert_eq!(events[0].event_type, "period.created");
}

#[test]
fn create_period_rejects_bad_input_without_persisting() {
    let fixture = Fixture::new();
    let now = now_utc();
    let base = NewPeriod {
        name: "Q2".to_string(),
        coordinator_id: "boss".to_string(),
        start_at: now,
        end_at: now + Duration::days(30),
        description: None,
        seed: Vec::new(),
    };

    let reversed = NewPeriod {
        end_at: now - Duration::days(1),
        ..base.clone()
    };
    assert!(matches!(
        fixture.app.create_period(reversed),
        Err(AppError::Validation(_))
    ));

    let same_instant = NewPeriod {
        end_at: now,
        ..base.clone()
    };
    assert!(matches!(
        fixture.app.create_period(same_instant),
        Err(AppError::Validation(_))
    ));

    let missing_coordinator = NewPeriod {
        coordinator_id: "  ".to_string(),
        ..base.clone()
    };
    assert!(matches!(
        fixture.app.create_period(missing_coordinator),
        Err(AppError::Validation(_))
    ));

    let unknown_coordinator = NewPeriod {
        coordinator_id: "ghost".to_string(),
        ..base.clone()
    };
    assert!(matches!(
        fixture.app.create_period(unknown_coordinator),
        Err(AppError::NotFound(_))
    ));

    let not_a_coordinator = NewPeriod {
        coordinator_id: "c1".to_string(),
        ..base.clone()
    };
    let err = fixture
        .app
        .create_period(not_a_coordinator)
        .expect_err("collaborators cannot own periods");
    assert_eq!(err.status_code(), 403);

    let bad_seed = NewPeriod {
        seed: vec![
            AssignmentSpec::individual("dev-x", "c1"),
            AssignmentSpec::individual("dev-missing", "c1"),
        ],
        ..base
    };
    assert!(matches!(
        fixture.app.create_period(bad_seed),
        Err(AppError::NotFound(_))
    ));

    let page = fixture
        .app
        .list_periods(&PeriodFilter::default())
        .expect("list should succeed");
    assert_eq!(page.total, 0);
}

#[test]
fn scenario_b_individual_completion_reaches_full_progress() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![AssignmentSpec::individual("dev-x", "c1")]);

    let summary = fixture
        .app
        .complete(
            &period.id,
            "dev-x",
            "c1",
            CompletionPayload {
                note: Some("pressure ok".to_string()),
                ..CompletionPayload::default()
            },
        )
        .expect("complete should succeed");
    assert_eq!(summary.shape, "individual");
    assert_eq!(summary.progress.completion_percent, 100);

    let period = fixture.app.show_period(&period.id).expect("show");
    let record = &period.assignments[&AssignmentKey::individual("dev-x", "c1")];
    assert_eq!(record.state, AssignmentState::Completed);
    assert!(record.completed_at.is_some());
    assert_eq!(record.completed_by.as_deref(), Some("c1"));
    assert_eq!(
        record.completion_record_id.as_deref(),
        Some(summary.completion_record_id.as_str())
    );
    assert_eq!(period.progress.completion_percent, 100);

    let report = fixture
        .app
        .show_report(&summary.completion_record_id)
        .expect("report should exist");
    assert!(!report.is_collaborative);
    assert_eq!(report.period_id.as_deref(), Some(period.id.as_str()));
    assert_eq!(report.state, ReportState::Submitted);
}

#[test]
fn scenario_c_pooled_completion_is_visible_to_every_eligible_collaborator() {
    let fixture = Fixture::new();
    let period = fixture.active_period(Vec::new());
    fixture
        .app
        .assign_pooled(&period.id, "dev-y", &["c2", "c3"], Some("shared"))
        .expect("pooled assign should succeed");

    let summary = fixture
        .app
        .complete(&period.id, "dev-y", "c2", CompletionPayload::default())
        .expect("c2 completes");
    assert_eq!(summary.shape, "pooled");
    assert_eq!(summary.covered_collaborators, vec!["c2", "c3"]);

    let c2 = fixture.app.list_all_for_collaborator("c2").expect("c2 history");
    let c3 = fixture.app.list_all_for_collaborator("c3").expect("c3 history");
    let c2_view = view_of(&c2, "dev-y");
    let c3_view = view_of(&c3, "dev-y");
    assert_eq!(c3_view.record.state, AssignmentState::Completed);
    assert_eq!(c3_view.record.completed_by.as_deref(), Some("c2"));
    assert_eq!(c2_view.record.completed_at, c3_view.record.completed_at);
    assert_eq!(
        c2_view.record.completion_record_id,
        c3_view.record.completion_record_id
    );

    let c3_pending = fixture
        .app
        .list_pending_for_collaborator("c3")
        .expect("c3 pending");
    assert!(c3_pending.is_empty());
    assert!(fixture
        .app
        .list_all_for_collaborator("c4")
        .expect("c4 history")
        .is_empty());

    let reports = db::list_reports_for_period(&fixture.app.connect().expect("conn"), &period.id)
        .expect("list reports");
    assert_eq!(reports.len(), 1);
    let completions = fixture
        .app
        .period_events(&period.id)
        .expect("events")
        .into_iter()
        .filter(|event| event.event_type == "assignment.completed")
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn scenario_d_deleting_completed_pool_removes_its_report() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![AssignmentSpec::pooled("dev-y", &["c2", "c3"])]);
    let summary = fixture
        .app
        .complete(&period.id, "dev-y", "c2", CompletionPayload::default())
        .expect("complete");

    let removed = fixture
        .app
        .delete_pooled_assignment(&period.id, "dev-y")
        .expect("delete pooled");
    assert!(removed.was_completed);
    assert_eq!(removed.reports_deleted, vec![summary.completion_record_id.clone()]);

    assert!(matches!(
        fixture.app.show_report(&summary.completion_record_id),
        Err(AppError::NotFound(_))
    ));
    let period = fixture.app.show_period(&period.id).expect("show");
    assert_eq!(period.records_for_item("dev-y").count(), 0);
    assert_eq!(period.progress.total_devices, 0);
}

#[test]
fn scenario_e_past_end_date_deactivates_without_a_sweep() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![AssignmentSpec::individual("dev-x", "c1")]);
    assert!(period.active);

    let updated = fixture
        .app
        .update_dates(
            &period.id,
            datetime!(2024-10-01 00:00 UTC),
            datetime!(2024-12-31 23:59:59 UTC),
        )
        .expect("update dates");
    assert!(!updated.active);
    assert!(!fixture.app.show_period(&period.id).expect("show").active);

    let now = now_utc();
    let reopened = fixture
        .app
        .update_dates(&period.id, now, now + Duration::days(5))
        .expect("reopen");
    assert!(reopened.active);
}

#[test]
fn writes_past_the_end_date_are_refused_before_any_sweep() {
    let fixture = Fixture::new();
    let now = now_utc();
    let period = fixture
        .app
        .create_period(NewPeriod {
            name: "closing".to_string(),
            coordinator_id: "boss".to_string(),
            start_at: now - Duration::days(1),
            end_at: now + Duration::milliseconds(300),
            description: None,
            seed: vec![
                AssignmentSpec::individual("dev-x", "c1"),
                AssignmentSpec::individual("dev-z", "c1"),
            ],
        })
        .expect("period should be created");
    assert!(period.active);
    std::thread::sleep(std::time::Duration::from_millis(600));

    let err = fixture
        .app
        .complete(&period.id, "dev-x", "c1", CompletionPayload::default())
        .expect_err("period has ended");
    assert!(matches!(err, AppError::State(_)));
    assert!(matches!(
        fixture.app.assign_individual(&period.id, "dev-y", "c2", None),
        Err(AppError::State(_))
    ));

    let stored = fixture.app.show_period(&period.id).expect("show");
    assert!(!stored.active);
    assert!(!stored.assignments[&AssignmentKey::individual("dev-x", "c1")].is_completed());
    assert!(db::list_reports_for_period(&fixture.app.connect().expect("conn"), &period.id)
        .expect("list reports")
        .is_empty());
    let swept = fixture
        .app
        .period_events(&period.id)
        .expect("events")
        .into_iter()
        .filter(|event| event.event_type == "period.swept")
        .count();
    assert_eq!(swept, 1);
    assert_eq!(fixture.app.sweep_expired().expect("sweep").deactivated, 0);

    fixture
        .app
        .delete_assignment(&period.id, "dev-z", "c1")
        .expect("cleanup still allowed");
}

#[test]
fn update_dates_rejects_reversed_window_and_keeps_prior_state() {
    let fixture = Fixture::new();
    let period = fixture.active_period(Vec::new());
    let err = fixture
        .app
        .update_dates(&period.id, period.end_at, period.start_at)
        .expect_err("reversed window");
    assert!(matches!(err, AppError::Validation(_)));
    let stored = fixture.app.show_period(&period.id).expect("show");
    assert_eq!(stored.start_at, period.start_at);
    assert_eq!(stored.end_at, period.end_at);
    assert_eq!(stored.version, period.version);

    assert!(matches!(
        fixture.app.update_dates("P-missing", period.start_at, period.end_at),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn double_completion_fails_and_keeps_the_original_stamp() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-x", "c1"),
        AssignmentSpec::pooled("dev-y", &["c2", "c3"]),
    ]);
    fixture
        .app
        .complete(&period.id, "dev-x", "c1", CompletionPayload::default())
        .expect("first completion");
    fixture
        .app
        .complete(&period.id, "dev-y", "c2", CompletionPayload::default())
        .expect("first pooled completion");
    let before = fixture.app.show_period(&period.id).expect("show");

    let err = fixture
        .app
        .complete(&period.id, "dev-x", "c1", CompletionPayload::default())
        .expect_err("second completion");
    assert!(matches!(err, AppError::State(_)));
    assert_eq!(err.status_code(), 409);

    let err = fixture
        .app
        .complete(&period.id, "dev-y", "c3", CompletionPayload::default())
        .expect_err("pool member completing shared work twice");
    assert!(matches!(err, AppError::State(_)));

    let after = fixture.app.show_period(&period.id).expect("show");
    assert_eq!(before, after);
    let reports = db::list_reports_for_period(&fixture.app.connect().expect("conn"), &period.id)
        .expect("list reports");
    assert_eq!(reports.len(), 2);
}

#[test]
fn completion_requires_an_owned_or_eligible_assignment() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-x", "c1"),
        AssignmentSpec::pooled("dev-y", &["c2", "c3"]),
    ]);

    for (item, collaborator) in [("dev-x", "c2"), ("dev-y", "c4"), ("dev-z", "c1")] {
        let err = fixture
            .app
            .complete(&period.id, item, collaborator, CompletionPayload::default())
            .expect_err("not assigned");
        assert!(matches!(err, AppError::NotFound(_)), "{item}/{collaborator}");
    }
    assert!(matches!(
        fixture
            .app
            .complete("P-missing", "dev-x", "c1", CompletionPayload::default()),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn individual_ownership_wins_over_pool_membership() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-y", "c2"),
        AssignmentSpec::pooled("dev-y", &["c2", "c3"]),
    ]);
    fixture
        .app
        .complete(&period.id, "dev-y", "c2", CompletionPayload::default())
        .expect("complete");
    let period = fixture.app.show_period(&period.id).expect("show");
    assert!(period.assignments[&AssignmentKey::individual("dev-y", "c2")].is_completed());
    assert!(!period.assignments[&AssignmentKey::pooled("dev-y")].is_completed());
}

#[test]
fn collaborative_completion_validates_contributors() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![AssignmentSpec::pooled("dev-y", &["c2", "c3"])]);

    let wrong_principal = collaborative_payload("c3", &["c2"]);
    assert!(matches!(
        fixture.app.complete(&period.id, "dev-y", "c2", wrong_principal),
        Err(AppError::Validation(_))
    ));

    let mut duplicated = collaborative_payload("c2", &["c3"]);
    duplicated.contributors.push(duplicated.contributors[1].clone());
    assert!(matches!(
        fixture.app.complete(&period.id, "dev-y", "c2", duplicated),
        Err(AppError::Validation(_))
    ));

    let unknown = collaborative_payload("c2", &["ghost"]);
    assert!(matches!(
        fixture.app.complete(&period.id, "dev-y", "c2", unknown),
        Err(AppError::NotFound(_))
    ));

    let unchanged = fixture.app.show_period(&period.id).expect("show");
    assert!(!unchanged.assignments[&AssignmentKey::pooled("dev-y")].is_completed());

    let summary = fixture
        .app
        .complete(&period.id, "dev-y", "c2", collaborative_payload("c2", &["c3"]))
        .expect("valid collaborative completion");
    assert!(summary.is_collaborative);
    let report = fixture
        .app
        .show_report(&summary.completion_record_id)
        .expect("report");
    assert!(report.is_collaborative);
    assert_eq!(report.contributor_ids(), vec!["c2", "c3"]);

    let period = fixture.app.show_period(&period.id).expect("show");
    let record = &period.assignments[&AssignmentKey::pooled("dev-y")];
    assert_eq!(record.contributors, vec!["c2", "c3"]);
}

#[test]
fn deleting_collaborative_pool_removes_its_report_only() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::pooled("dev-y", &["c2", "c3"]),
        AssignmentSpec::individual("dev-x", "c3"),
    ]);
    let summary = fixture
        .app
        .complete(&period.id, "dev-y", "c2", collaborative_payload("c2", &["c3"]))
        .expect("complete");
    let other = fixture
        .app
        .complete(&period.id, "dev-x", "c3", CompletionPayload::default())
        .expect("unrelated completion");

    let removed = fixture
        .app
        .delete_pooled_assignment(&period.id, "dev-y")
        .expect("delete pooled");
    assert!(removed.was_completed);
    assert_eq!(removed.reports_deleted, vec![summary.completion_record_id.clone()]);
    assert_eq!(removed.reverted, 0);

    let conn = fixture.app.connect().expect("conn");
    assert!(!db::report_exists(&conn, &summary.completion_record_id).expect("exists"));
    assert!(db::report_exists(&conn, &other.completion_record_id).expect("exists"));
    let stored = fixture.app.show_period(&period.id).expect("show");
    assert!(stored.assignments[&AssignmentKey::individual("dev-x", "c3")].is_completed());
}

#[test]
fn deleting_pool_keeps_a_participants_individual_completion() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::pooled("dev-y", &["c2", "c4"]),
        AssignmentSpec::individual("dev-y", "c3"),
    ]);
    let individual = fixture
        .app
        .complete(&period.id, "dev-y", "c3", CompletionPayload::default())
        .expect("individual completion");
    let pooled = fixture
        .app
        .complete(&period.id, "dev-y", "c2", collaborative_payload("c2", &["c3"]))
        .expect("pooled completion");

    let removed = fixture
        .app
        .delete_pooled_assignment(&period.id, "dev-y")
        .expect("delete pooled");
    assert_eq!(removed.reports_deleted, vec![pooled.completion_record_id.clone()]);
    assert_eq!(removed.reverted, 0);

    let stored = fixture.app.show_period(&period.id).expect("show");
    let record = &stored.assignments[&AssignmentKey::individual("dev-y", "c3")];
    assert_eq!(record.state, AssignmentState::Completed);
    assert_eq!(
        record.completion_record_id.as_deref(),
        Some(individual.completion_record_id.as_str())
    );
    let conn = fixture.app.connect().expect("conn");
    assert!(db::report_exists(&conn, &individual.completion_record_id).expect("exists"));
}

#[test]
fn cascading_individual_delete_removes_record_and_report() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-x", "c1"),
        AssignmentSpec::individual("dev-z", "c1"),
    ]);
    let summary = fixture
        .app
        .complete(&period.id, "dev-x", "c1", CompletionPayload::default())
        .expect("complete");

    let removed = fixture
        .app
        .delete_assignment(&period.id, "dev-x", "c1")
        .expect("delete");
    assert_eq!(removed.shape, "individual");
    assert_eq!(removed.reports_deleted, vec![summary.completion_record_id.clone()]);

    let history = fixture.app.list_all_for_collaborator("c1").expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].record.catalog_item_id, "dev-z");
    assert!(matches!(
        fixture.app.show_report(&summary.completion_record_id),
        Err(AppError::NotFound(_))
    ));

    let pending = fixture
        .app
        .delete_assignment(&period.id, "dev-z", "c1")
        .expect("delete pending");
    assert!(!pending.was_completed);
    assert!(pending.reports_deleted.is_empty());

    assert!(matches!(
        fixture.app.delete_assignment(&period.id, "dev-z", "c1"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        fixture.app.delete_pooled_assignment(&period.id, "dev-z"),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn assignment_preconditions_map_to_error_kinds() {
    let fixture = Fixture::new();
    fixture.item("dev-retired", false);
    let period = fixture.active_period(vec![AssignmentSpec::individual("dev-x", "c1")]);

    let err = fixture
        .app
        .assign_individual(&period.id, "dev-x", "c1", None)
        .expect_err("duplicate");
    assert!(matches!(err, AppError::Conflict(_)));

    assert!(matches!(
        fixture.app.assign_pooled(&period.id, "dev-y", &[], None),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        fixture.app.assign_individual(&period.id, "dev-gone", "c1", None),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        fixture.app.assign_individual(&period.id, "dev-retired", "c1", None),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        fixture.app.assign_individual(&period.id, "dev-y", "ghost", None),
        Err(AppError::NotFound(_))
    ));

    fixture
        .app
        .assign_pooled(&period.id, "dev-y", &["c2", "c3"], None)
        .expect("pooled");
    assert!(matches!(
        fixture.app.assign_pooled(&period.id, "dev-y", &["c4"], None),
        Err(AppError::Conflict(_))
    ));

    let batch = vec![
        AssignmentSpec::individual("dev-z", "c4"),
        AssignmentSpec::individual("dev-x", "c1"),
    ];
    assert!(matches!(
        fixture.app.assign_devices(&period.id, &batch),
        Err(AppError::Conflict(_))
    ));
    let stored = fixture.app.show_period(&period.id).expect("show");
    assert!(!stored
        .assignments
        .contains_key(&AssignmentKey::individual("dev-z", "c4")));
    assert_eq!(stored.progress.total_devices, 2);
}

#[test]
fn inactive_periods_refuse_assignment_work_but_allow_cleanup() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-x", "c1"),
        AssignmentSpec::individual("dev-z", "c1"),
    ]);
    fixture
        .app
        .complete(&period.id, "dev-z", "c1", CompletionPayload::default())
        .expect("complete before close");
    let closed = fixture.app.finalize_period(&period.id).expect("finalize");
    assert!(!closed.active);

    assert!(matches!(
        fixture.app.assign_individual(&period.id, "dev-y", "c2", None),
        Err(AppError::State(_))
    ));
    assert!(matches!(
        fixture
            .app
            .complete(&period.id, "dev-x", "c1", CompletionPayload::default()),
        Err(AppError::State(_))
    ));
    assert!(matches!(
        fixture.app.record_progress(&period.id, "dev-x", "c1"),
        Err(AppError::State(_))
    ));
    assert!(matches!(
        fixture.app.reassign_owner(&period.id, "dev-x", "c1", "c2"),
        Err(AppError::State(_))
    ));
    assert!(fixture.app.list_pending_for_collaborator("c1").expect("pending").is_empty());
    assert_eq!(fixture.app.list_all_for_collaborator("c1").expect("history").len(), 2);

    fixture
        .app
        .delete_assignment(&period.id, "dev-x", "c1")
        .expect("cleanup is allowed");

    let again = fixture.app.finalize_period(&period.id).expect("finalize twice");
    assert_eq!(again.version, fixture.app.show_period(&period.id).expect("show").version);
}

#[test]
fn reassign_owner_moves_open_individual_work_only() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-x", "c1"),
        AssignmentSpec::individual("dev-z", "c1"),
        AssignmentSpec::individual("dev-z", "c3"),
    ]);

    assert!(matches!(
        fixture.app.reassign_owner(&period.id, "dev-x", "c4", "c2"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        fixture.app.reassign_owner(&period.id, "dev-x", "c1", "ghost"),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        fixture.app.reassign_owner(&period.id, "dev-z", "c1", "c3"),
        Err(AppError::Conflict(_))
    ));

    let moved = fixture
        .app
        .reassign_owner(&period.id, "dev-x", "c1", "c2")
        .expect("reassign");
    assert!(moved
        .assignments
        .contains_key(&AssignmentKey::individual("dev-x", "c2")));
    assert!(!moved
        .assignments
        .contains_key(&AssignmentKey::individual("dev-x", "c1")));

    fixture
        .app
        .complete(&period.id, "dev-x", "c2", CompletionPayload::default())
        .expect("complete");
    assert!(matches!(
        fixture.app.reassign_owner(&period.id, "dev-x", "c2", "c4"),
        Err(AppError::State(_))
    ));
}

#[test]
fn record_progress_is_informational() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![AssignmentSpec::pooled("dev-y", &["c2", "c3"])]);
    let updated = fixture
        .app
        .record_progress(&period.id, "dev-y", "c3")
        .expect("progress");
    let record = &updated.assignments[&AssignmentKey::pooled("dev-y")];
    assert_eq!(record.state, AssignmentState::InProgress);
    assert!(record.completed_by.is_none());
    assert_eq!(updated.progress.completed_devices, 0);

    let pending = fixture.app.list_pending_for_collaborator("c2").expect("pending");
    assert_eq!(view_of(&pending, "dev-y").record.state, AssignmentState::InProgress);

    assert!(matches!(
        fixture.app.record_progress(&period.id, "dev-y", "c4"),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn delete_period_warns_with_count_until_forced() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-x", "c1"),
        AssignmentSpec::pooled("dev-y", &["c2", "c3"]),
    ]);
    fixture
        .app
        .complete(&period.id, "dev-x", "c1", CompletionPayload::default())
        .expect("complete x");
    fixture
        .app
        .complete(&period.id, "dev-y", "c3", CompletionPayload::default())
        .expect("complete y");

    let err = fixture
        .app
        .delete_period(&period.id, false)
        .expect_err("reports still attached");
    match &err {
        AppError::PeriodHasReports { count, .. } => assert_eq!(*count, 2),
        other => panic!("expected PeriodHasReports, got {other:?}"),
    }
    assert_eq!(err.status_code(), 409);
    assert!(fixture.app.show_period(&period.id).is_ok());

    let deleted = fixture.app.delete_period(&period.id, true).expect("force delete");
    assert_eq!(deleted.reports_deleted, 2);
    assert!(deleted.events_deleted >= 3);
    assert!(
        db::list_period_events(&fixture.app.connect().expect("conn"), &period.id)
            .expect("list events")
            .is_empty()
    );
    assert!(matches!(
        fixture.app.show_period(&period.id),
        Err(AppError::NotFound(_))
    ));
    assert!(
        db::list_reports_for_period(&fixture.app.connect().expect("conn"), &period.id)
            .expect("list")
            .is_empty()
    );

    let empty = fixture.active_period(vec![AssignmentSpec::individual("dev-x", "c1")]);
    let deleted = fixture.app.delete_period(&empty.id, false).expect("plain delete");
    assert_eq!(deleted.reports_deleted, 0);
    assert!(matches!(
        fixture.app.delete_period(&empty.id, true),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn sweep_deactivates_expired_periods_once() {
    let fixture = Fixture::new();
    let short = fixture
        .app
        .create_period(NewPeriod {
            name: "short".to_string(),
            coordinator_id: "boss".to_string(),
            start_at: now_utc() - Duration::days(1),
            end_at: now_utc() + Duration::days(1),
            description: None,
            seed: Vec::new(),
        })
        .expect("short period");
    let long = fixture.active_period(Vec::new());
    let already_closed = fixture.active_period(Vec::new());
    fixture
        .app
        .finalize_period(&already_closed.id)
        .expect("finalize");
    let closed_version = fixture
        .app
        .show_period(&already_closed.id)
        .expect("show")
        .version;

    let later = now_utc() + Duration::days(2);
    let first = fixture.app.sweep_expired_at(later).expect("first sweep");
    assert_eq!(first.deactivated, 1);
    assert_eq!(first.period_ids, vec![short.id.clone()]);

    let second = fixture.app.sweep_expired_at(later).expect("second sweep");
    assert_eq!(second.deactivated, 0);

    for period in [&short, &long, &already_closed] {
        let stored = fixture.app.show_period(&period.id).expect("show");
        let expected = later <= stored.end_at && period.id != already_closed.id;
        assert_eq!(stored.active, expected, "{}", stored.name);
    }
    assert_eq!(
        fixture
            .app
            .show_period(&already_closed.id)
            .expect("show")
            .version,
        closed_version
    );
}

#[test]
fn list_periods_filters_and_paginates() {
    let fixture = Fixture::new();
    let a = fixture.active_period(Vec::new());
    let b = fixture.active_period(Vec::new());
    let other = fixture
        .app
        .create_period(NewPeriod {
            name: "old".to_string(),
            coordinator_id: "boss2".to_string(),
            start_at: datetime!(2024-01-01 00:00 UTC),
            end_at: datetime!(2024-03-31 00:00 UTC),
            description: None,
            seed: Vec::new(),
        })
        .expect("old period");
    assert!(!other.active);

    let by_boss = fixture
        .app
        .list_periods(&PeriodFilter {
            coordinator_id: Some("boss".to_string()),
            ..PeriodFilter::default()
        })
        .expect("list");
    assert_eq!(by_boss.total, 2);
    let ids: Vec<&str> = by_boss.items.iter().map(|p| p.id.as_str()).collect();
    assert!(ids.contains(&a.id.as_str()) && ids.contains(&b.id.as_str()));

    let inactive = fixture
        .app
        .list_periods(&PeriodFilter {
            active: Some(false),
            ..PeriodFilter::default()
        })
        .expect("list");
    assert_eq!(inactive.total, 1);
    assert_eq!(inactive.items[0].id, other.id);

    let in_2024 = fixture
        .app
        .list_periods(&PeriodFilter {
            from: Some(datetime!(2024-02-01 00:00 UTC)),
            to: Some(datetime!(2024-12-31 00:00 UTC)),
            ..PeriodFilter::default()
        })
        .expect("list");
    assert_eq!(in_2024.total, 1);

    let second_page = fixture
        .app
        .list_periods(&PeriodFilter {
            page: Some(2),
            per_page: Some(2),
            ..PeriodFilter::default()
        })
        .expect("list");
    assert_eq!(second_page.total, 3);
    assert_eq!(second_page.items.len(), 1);
}

#[test]
fn repair_removes_dangling_items_and_reverts_lost_reports() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::individual("dev-x", "c1"),
        AssignmentSpec::individual("dev-z", "c1"),
        AssignmentSpec::pooled("dev-y", &["c2", "c3"]),
    ]);

    let clean = fixture.app.repair_broken_references().expect("repair");
    assert_eq!(clean.periods_touched, 0);
    assert_eq!(clean.records_removed, 0);
    assert_eq!(clean.records_reverted, 0);

    let summary = fixture
        .app
        .complete(&period.id, "dev-x", "c1", CompletionPayload::default())
        .expect("complete");
    let conn = fixture.app.connect().expect("conn");
    db::delete_report(&conn, &summary.completion_record_id).expect("external report delete");
    fixture.app.remove_catalog_item("dev-y").expect("catalog prune");

    let repaired = fixture.app.repair_broken_references().expect("repair");
    assert_eq!(repaired.periods_touched, 1);
    assert_eq!(repaired.records_removed, 1);
    assert_eq!(repaired.records_reverted, 1);

    let stored = fixture.app.show_period(&period.id).expect("show");
    assert_eq!(stored.progress.total_devices, 2);
    let record = &stored.assignments[&AssignmentKey::individual("dev-x", "c1")];
    assert_eq!(record.state, AssignmentState::Pending);
    assert!(record.completion_record_id.is_none());

    let again = fixture.app.repair_broken_references().expect("repair again");
    assert_eq!(again.periods_touched, 0);
    assert_eq!(
        fixture.app.show_period(&period.id).expect("show").version,
        stored.version
    );
}

#[test]
fn standalone_report_deletion_reverts_linked_assignments() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![
        AssignmentSpec::pooled("dev-y", &["c2", "c3"]),
        AssignmentSpec::individual("dev-x", "c1"),
    ]);
    let pooled = fixture
        .app
        .complete(&period.id, "dev-y", "c3", CompletionPayload::default())
        .expect("complete pooled");
    let individual = fixture
        .app
        .complete(&period.id, "dev-x", "c1", CompletionPayload::default())
        .expect("complete individual");

    let deleted = fixture
        .app
        .delete_report(&pooled.completion_record_id)
        .expect("delete report");
    assert_eq!(deleted.reverted, 1);
    assert_eq!(deleted.period_ids, vec![period.id.clone()]);

    let stored = fixture.app.show_period(&period.id).expect("show");
    let record = &stored.assignments[&AssignmentKey::pooled("dev-y")];
    assert_eq!(record.state, AssignmentState::Pending);
    assert!(record.completed_at.is_none());
    assert!(record.completed_by.is_none());
    assert_eq!(stored.progress.completed_devices, 1);

    assert!(matches!(
        fixture.app.delete_report(&pooled.completion_record_id),
        Err(AppError::NotFound(_))
    ));

    let conn = fixture.app.connect().expect("conn");
    db::delete_report(&conn, &individual.completion_record_id).expect("external delete");
    let reverted = fixture
        .app
        .revert_to_pending(&individual.completion_record_id)
        .expect("revert");
    assert_eq!(reverted.reverted, 1);
    let again = fixture
        .app
        .revert_to_pending(&individual.completion_record_id)
        .expect("revert again");
    assert_eq!(again.reverted, 0);

    fixture
        .app
        .complete(&period.id, "dev-y", "c2", CompletionPayload::default())
        .expect("pooled work can be completed again");
}

#[test]
fn report_corrections_require_a_participant() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![AssignmentSpec::pooled("dev-y", &["c2", "c3"])]);
    let summary = fixture
        .app
        .complete(&period.id, "dev-y", "c2", collaborative_payload("c2", &["c3"]))
        .expect("complete");

    let err = fixture
        .app
        .update_report(
            &summary.completion_record_id,
            "c4",
            ReportPatch {
                note: Some("not mine".to_string()),
                specialty_id: None,
            },
        )
        .expect_err("outsider");
    assert!(matches!(err, AppError::Authorization(_)));
    assert_eq!(err.status_code(), 403);

    assert!(matches!(
        fixture
            .app
            .update_report(&summary.completion_record_id, "c3", ReportPatch::default()),
        Err(AppError::Validation(_))
    ));

    let updated = fixture
        .app
        .update_report(
            &summary.completion_record_id,
            "c3",
            ReportPatch {
                note: Some("added torque values".to_string()),
                specialty_id: Some("hvac".to_string()),
            },
        )
        .expect("contributor may correct");
    assert_eq!(updated.note.as_deref(), Some("added torque values"));
    assert_eq!(updated.specialty_id.as_deref(), Some("hvac"));

    let reviewed = fixture
        .app
        .review_report(&summary.completion_record_id, ReportState::Rejected)
        .expect("review");
    assert_eq!(reviewed.state, ReportState::Rejected);
    let stored = fixture.app.show_period(&period.id).expect("show");
    assert!(stored.assignments[&AssignmentKey::pooled("dev-y")].is_completed());

    let kinds: Vec<String> = fixture
        .app
        .period_events(&period.id)
        .expect("events")
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert!(kinds.contains(&"assignment.completed".to_string()));
    assert!(kinds.contains(&"report.updated".to_string()));
}

#[test]
fn racing_pooled_completions_have_exactly_one_winner() {
    let fixture = Fixture::new();
    let period = fixture.active_period(vec![AssignmentSpec::pooled(
        "dev-y",
        &["c1", "c2", "c3", "c4"],
    )]);

    let outcomes: Vec<Result<String, AppError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["c1", "c2", "c3", "c4"]
            .into_iter()
            .map(|collaborator| {
                let app = &fixture.app;
                let period_id = period.id.as_str();
                scope.spawn(move || {
                    app.complete(period_id, "dev-y", collaborator, CompletionPayload::default())
                        .map(|summary| summary.completed_by)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should not panic"))
            .collect()
    });

    let winners: Vec<&String> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(matches!(err, AppError::State(_)), "unexpected error: {err}");
        }
    }

    let stored = fixture.app.show_period(&period.id).expect("show");
    let record = &stored.assignments[&AssignmentKey::pooled("dev-y")];
    assert_eq!(record.completed_by.as_ref(), Some(winners[0]));
    let reports = db::list_reports_for_period(&fixture.app.connect().expect("conn"), &period.id)
        .expect("list");
    assert_eq!(reports.len(), 1);
}

#[test]
fn error_kinds_are_stable() {
    let cases = [
        (AppError::Validation("x".to_string()), "validation", 400),
        (AppError::NotFound("x".to_string()), "not_found", 404),
        (AppError::Authorization("x".to_string()), "authorization", 403),
        (AppError::State("x".to_string()), "state", 409),
        (AppError::Conflict("x".to_string()), "conflict", 409),
    ];
    for (err, kind, status) in cases {
        assert_eq!(err.kind().as_str(), kind);
        assert_eq!(err.status_code(), status);
    }
    let blocked = AppError::PeriodHasReports {
        period_id: "P-1".to_string(),
        count: 3,
    };
    assert!(blocked.to_string().contains("3 completion record(s)"));
}
