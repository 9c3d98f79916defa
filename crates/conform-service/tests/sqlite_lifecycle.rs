use std::path::Path;
use std::sync::Barrier;

use chrono::{Duration, TimeZone, Utc};
use conform_core::{
    Actor, CoreError, CriteriaId, Evaluation, FollowupFilter, FollowupStatus, InstitutionId, NewFollowup, Role,
    TransitionKind, UserId,
};
use conform_service::{Config, Service};
use tempfile::tempdir;

fn portal_salud() -> Evaluation {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/evaluations/portal-salud.json");
    Evaluation::from_json(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn full_cycle_survives_reopen() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join(".conform");
    Service::init_dir(&data_dir).unwrap();

    let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let secretary = Actor::staff(UserId::from_str("u-sec"), Role::Secretary);
    let evaluator = Actor::staff(UserId::from_str("u-eval"), Role::Evaluator);
    let owner = Actor::entity_user(UserId::from_str("u-salud"), InstitutionId::from_str("inst-salud"));

    let evaluation = portal_salud();
    let id = {
        let svc = Service::open(data_dir.clone()).unwrap();
        svc.import_evaluation(&evaluation).unwrap();
        let req = NewFollowup {
            criteria_id: CriteriaId::from_str("SOB-02"),
            due_date: t0.date_naive() + Duration::days(7),
            notes: Some("self-host fonts".into()),
        };
        let f = svc.create_followup(&secretary, &evaluation.id, req, t0).unwrap();
        svc.mark_corrected(&owner, &f.id, FollowupStatus::Pending, Some("fonts vendored".into()), t0).unwrap();
        f.id
    };

    let svc = Service::open(data_dir).unwrap();
    let f = svc.followup(&id).unwrap();
    assert_eq!(f.status, FollowupStatus::Corrected);
    assert_eq!(f.notes.as_deref(), Some("self-host fonts\nfonts vendored"));
    assert_eq!(f.corrected_at, Some(t0));

    let t1 = t0 + Duration::days(2);
    let f = svc.validate(&evaluator, &id, FollowupStatus::Corrected, true, Some("verified".into()), t1).unwrap();
    assert_eq!(f.status, FollowupStatus::Validated);

    let err = svc.cancel(&secretary, &id, FollowupStatus::Validated, t1).unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::InvalidTransition { .. })));

    let kinds: Vec<TransitionKind> = svc.history(&id).unwrap().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![TransitionKind::Create, TransitionKind::MarkCorrected, TransitionKind::Approve]);
}

#[test]
fn stale_commit_on_sqlite_is_reported_as_stale_state() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_path_buf();
    Config::default_for_dir().save_to(&Config::config_path(&data_dir)).unwrap();
    let svc = Service::open(data_dir).unwrap();

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let evaluation = portal_salud();
    svc.import_evaluation(&evaluation).unwrap();
    let admin = Actor::staff(UserId::from_str("u-admin"), Role::Superadmin);
    let req = NewFollowup { criteria_id: CriteriaId::from_str("ACC-03"), due_date: now.date_naive(), notes: None };
    let f = svc.create_followup(&admin, &evaluation.id, req, now).unwrap();

    svc.cancel(&admin, &f.id, FollowupStatus::Pending, now).unwrap();
    let err = svc.cancel(&admin, &f.id, FollowupStatus::Pending, now).unwrap_err();
    assert_eq!(err.core().map(CoreError::kind), Some("stale_state"));

    let pending = FollowupFilter { status: Some(FollowupStatus::Pending), ..Default::default() };
    assert!(svc.followups(&pending).unwrap().is_empty());
}

#[test]
fn two_services_on_one_data_dir_race_to_stale_state() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join(".conform");
    Service::init_dir(&data_dir).unwrap();
    let first = Service::open(data_dir.clone()).unwrap();
    let second = Service::open(data_dir).unwrap();

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let evaluation = portal_salud();
    first.import_evaluation(&evaluation).unwrap();
    let secretary = Actor::staff(UserId::from_str("u-sec"), Role::Secretary);
    let barrier = Barrier::new(2);

    for round in 0..40 {
        let req = NewFollowup { criteria_id: CriteriaId::from_str("ACC-01"), due_date: now.date_naive(), notes: None };
        let f = first.create_followup(&secretary, &evaluation.id, req, now).unwrap();

        let outcomes: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = [&first, &second]
                .into_iter()
                .map(|svc| {
                    let (barrier, secretary, id) = (&barrier, &secretary, &f.id);
                    s.spawn(move || {
                        barrier.wait();
                        match svc.cancel(secretary, id, FollowupStatus::Pending, now) {
                            Ok(f) => f.status.to_string(),
                            Err(e) => e.core().map(|c| c.kind().to_string()).unwrap_or_else(|| format!("backend: {e}")),
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut sorted = outcomes.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["cancelled", "stale_state"], "round {round}: {outcomes:?}");
    }
}

#[test]
fn two_services_creating_the_same_target_yield_invalid_target() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join(".conform");
    Service::init_dir(&data_dir).unwrap();
    let first = Service::open(data_dir.clone()).unwrap();
    let second = Service::open(data_dir).unwrap();

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let evaluation = portal_salud();
    first.import_evaluation(&evaluation).unwrap();
    let secretary = Actor::staff(UserId::from_str("u-sec"), Role::Secretary);
    let barrier = Barrier::new(2);

    let outcomes: Vec<String> = std::thread::scope(|s| {
        let handles: Vec<_> = [&first, &second]
            .into_iter()
            .map(|svc| {
                let (barrier, secretary, evaluation) = (&barrier, &secretary, &evaluation);
                s.spawn(move || {
                    let req =
                        NewFollowup { criteria_id: CriteriaId::from_str("SOB-02"), due_date: now.date_naive(), notes: None };
                    barrier.wait();
                    match svc.create_followup(secretary, &evaluation.id, req, now) {
                        Ok(f) => f.status.to_string(),
                        Err(e) => e.core().map(|c| c.kind().to_string()).unwrap_or_else(|| format!("backend: {e}")),
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut sorted = outcomes.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["invalid_target", "pending"], "{outcomes:?}");
}
