use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    authorize::authorize, extract::check_target, overdue::validate_due_date, Actor, CoreError,
    CriteriaId, Evaluation, Followup, FollowupId, FollowupStatus, TargetRejection, TransitionKind,
};

/// The lifecycle table. `None` means the event is illegal from `current`.
pub fn next_status(current: FollowupStatus, event: TransitionKind) -> Option<FollowupStatus> {
    use FollowupStatus::*;
    use TransitionKind::*;
    if current.is_terminal() {
        return None;
    }
    match (current, event) {
        (Pending, MarkCorrected) | (Rejected, MarkCorrected) => Some(Corrected),
        (Corrected, Approve) => Some(Validated),
        (Corrected, Reject) => Some(Rejected),
        (Pending, Cancel) | (Rejected, Cancel) => Some(Cancelled),
        _ => None,
    }
}

/// A lifecycle event on an existing followup, with its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    MarkCorrected { notes: Option<String> },
    Validate { approved: bool, notes: Option<String> },
    Cancel,
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::MarkCorrected { .. } => TransitionKind::MarkCorrected,
            Transition::Validate { approved, .. } => TransitionKind::validate(*approved),
            Transition::Cancel => TransitionKind::Cancel,
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            Transition::MarkCorrected { notes } | Transition::Validate { notes, .. } => notes.as_deref(),
            Transition::Cancel => None,
        }
    }
}

/// Request to open a followup against one criterion of an evaluation.
#[derive(Clone, Debug)]
pub struct NewFollowup {
    pub criteria_id: CriteriaId,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
}

/// Validate and build a new `pending` followup.
///
/// `existing` are the followups already recorded for the evaluation; any live one for the
/// same criterion blocks creation.
pub fn create(
    actor: &Actor,
    evaluation: &Evaluation,
    request: NewFollowup,
    existing: &[Followup],
    now: DateTime<Utc>,
) -> Result<Followup, CoreError> {
    let is_member = actor.is_member_of(&evaluation.institution_id);
    if !authorize(actor.role, TransitionKind::Create, None, is_member) {
        return Err(CoreError::Unauthorized { role: actor.role, event: TransitionKind::Create });
    }

    let result = evaluation
        .criterion(&request.criteria_id)
        .ok_or_else(|| CoreError::not_found("criterion result", &request.criteria_id))?;
    check_target(result)?;
    validate_due_date(request.due_date, now.date_naive())?;

    if let Some(live) = existing.iter().find(|f| {
        f.status.is_live() && f.evaluation_id == evaluation.id && f.criteria_result_id == request.criteria_id
    }) {
        return Err(CoreError::InvalidTarget {
            criteria_id: request.criteria_id,
            reason: TargetRejection::AlreadyTracked(live.id.clone()),
        });
    }

    Ok(Followup {
        id: FollowupId::new(),
        evaluation_id: evaluation.id.clone(),
        criteria_result_id: request.criteria_id,
        institution_id: evaluation.institution_id.clone(),
        status: FollowupStatus::Pending,
        due_date: request.due_date,
        notes: request.notes,
        corrected_at: None,
        validation_notes: None,
        created_by: actor.user_id.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Apply `transition` to `followup`, returning the updated copy.
///
/// State legality is checked before authorization so a wrong-state call is never reported
/// as a wrong-role call. On error the input is untouched.
pub fn apply(
    followup: &Followup,
    actor: &Actor,
    transition: &Transition,
    now: DateTime<Utc>,
) -> Result<Followup, CoreError> {
    let event = transition.kind();
    let Some(to) = next_status(followup.status, event) else {
        return Err(CoreError::InvalidTransition { state: followup.status, event });
    };
    let is_member = actor.is_member_of(&followup.institution_id);
    if !authorize(actor.role, event, Some(followup.status), is_member) {
        return Err(CoreError::Unauthorized { role: actor.role, event });
    }

    let mut next = followup.clone();
    next.status = to;
    next.updated_at = now;
    match transition {
        Transition::MarkCorrected { notes } => {
            // correctedAt only moves forward
            next.corrected_at = Some(match followup.corrected_at {
                Some(prev) if prev > now => prev,
                _ => now,
            });
            if let Some(extra) = notes.as_deref().filter(|n| !n.trim().is_empty()) {
                next.notes = Some(match followup.notes.as_deref() {
                    Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, extra),
                    _ => extra.to_string(),
                });
            }
        }
        Transition::Validate { notes, .. } => {
            if notes.is_some() {
                next.validation_notes = notes.clone();
            }
        }
        Transition::Cancel => {}
    }
    Ok(next)
}

pub fn mark_corrected(
    followup: &Followup,
    actor: &Actor,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<Followup, CoreError> {
    apply(followup, actor, &Transition::MarkCorrected { notes }, now)
}

pub fn validate(
    followup: &Followup,
    actor: &Actor,
    approved: bool,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<Followup, CoreError> {
    apply(followup, actor, &Transition::Validate { approved, notes }, now)
}

pub fn cancel(followup: &Followup, actor: &Actor, now: DateTime<Utc>) -> Result<Followup, CoreError> {
    apply(followup, actor, &Transition::Cancel, now)
}

/// Optimistic concurrency guard: the caller must have observed the current state.
pub fn ensure_observed(followup: &Followup, observed: FollowupStatus) -> Result<(), CoreError> {
    if followup.status == observed {
        Ok(())
    } else {
        Err(CoreError::StaleState {
            followup_id: followup.id.clone(),
            expected: observed,
            actual: followup.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CriterionResult, CriterionStatus, EvaluationId, InstitutionId, Role, ScoreMap, UserId};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn evaluation() -> Evaluation {
        let crit = |id: &str, status| CriterionResult {
            criteria_id: CriteriaId::from_str(id),
            dimension: "accesibilidad".into(),
            status,
            score: 0.0,
            max_score: 1.0,
            details: serde_json::Value::Null,
            evidence: serde_json::Value::Null,
        };
        Evaluation {
            id: EvaluationId::from_str("ev-1"),
            institution_id: InstitutionId::from_str("inst-x"),
            url: "https://example.gob".into(),
            timestamp: now(),
            scores: ScoreMap::new(),
            criteria_results: vec![
                crit("ACC-01", CriterionStatus::Fail),
                crit("ACC-02", CriterionStatus::Pass),
                crit("ACC-03", CriterionStatus::Partial),
            ],
            summary: serde_json::Value::Null,
            nlp_analysis: None,
        }
    }

    fn secretary() -> Actor {
        Actor::staff(UserId::from_str("sec"), Role::Secretary)
    }

    fn entity(inst: &str) -> Actor {
        Actor::entity_user(UserId::from_str("ent"), InstitutionId::from_str(inst))
    }

    fn request(id: &str, due: NaiveDate) -> NewFollowup {
        NewFollowup { criteria_id: CriteriaId::from_str(id), due_date: due, notes: Some("fix alt text".into()) }
    }

    fn pending() -> Followup {
        let due = now().date_naive() + Duration::days(30);
        create(&secretary(), &evaluation(), request("ACC-01", due), &[], now()).unwrap()
    }

    #[test]
    fn create_sets_pending_and_copies_ownership() {
        let f = pending();
        assert_eq!(f.status, FollowupStatus::Pending);
        assert_eq!(f.institution_id, InstitutionId::from_str("inst-x"));
        assert_eq!(f.created_by, UserId::from_str("sec"));
        assert!(f.corrected_at.is_none());
    }

    #[test]
    fn create_due_today_is_allowed_yesterday_is_not() {
        let ev = evaluation();
        let today = now().date_naive();
        assert!(create(&secretary(), &ev, request("ACC-01", today), &[], now()).is_ok());
        let err = create(&secretary(), &ev, request("ACC-01", today - Duration::days(1)), &[], now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDueDate { .. }));
    }

    #[test]
    fn create_rejects_compliant_unknown_and_duplicate_targets() {
        let ev = evaluation();
        let due = now().date_naive();
        let err = create(&secretary(), &ev, request("ACC-02", due), &[], now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTarget { reason: TargetRejection::NotNonCompliant(_), .. }));

        let err = create(&secretary(), &ev, request("NOPE", due), &[], now()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));

        let existing = vec![pending()];
        let err = create(&secretary(), &ev, request("ACC-01", due), &existing, now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTarget { reason: TargetRejection::AlreadyTracked(_), .. }));

        // a cancelled followup does not block a new one
        let cancelled = cancel(&existing[0], &secretary(), now()).unwrap();
        assert!(create(&secretary(), &ev, request("ACC-01", due), &[cancelled], now()).is_ok());
    }

    #[test]
    fn create_requires_admin_role() {
        let due = now().date_naive();
        let evaluator = Actor::staff(UserId::from_str("ev"), Role::Evaluator);
        let err = create(&evaluator, &evaluation(), request("ACC-01", due), &[], now()).unwrap_err();
        assert_eq!(err, CoreError::Unauthorized { role: Role::Evaluator, event: TransitionKind::Create });
        let err = create(&entity("inst-x"), &evaluation(), request("ACC-01", due), &[], now()).unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized { .. }));
    }

    #[test]
    fn cross_institution_correction_is_unauthorized() {
        let err = mark_corrected(&pending(), &entity("inst-y"), None, now()).unwrap_err();
        assert_eq!(err, CoreError::Unauthorized { role: Role::EntityUser, event: TransitionKind::MarkCorrected });
    }

    #[test]
    fn reject_resubmit_approve_path() {
        let evaluator = Actor::staff(UserId::from_str("ev"), Role::Evaluator);
        let t1 = now() + Duration::hours(1);
        let t2 = now() + Duration::hours(5);

        let f = mark_corrected(&pending(), &entity("inst-x"), Some("alt text added".into()), t1).unwrap();
        assert_eq!(f.status, FollowupStatus::Corrected);
        assert_eq!(f.corrected_at, Some(t1));
        assert_eq!(f.notes.as_deref(), Some("fix alt text\nalt text added"));

        let f = validate(&f, &evaluator, false, Some("still missing on home".into()), t1).unwrap();
        assert_eq!(f.status, FollowupStatus::Rejected);
        assert_eq!(f.validation_notes.as_deref(), Some("still missing on home"));

        let f = mark_corrected(&f, &entity("inst-x"), None, t2).unwrap();
        assert_eq!(f.corrected_at, Some(t2));

        let f = validate(&f, &secretary(), true, Some("ok".into()), t2).unwrap();
        assert_eq!(f.status, FollowupStatus::Validated);
        assert!(f.corrected_at.is_some());

        let err = cancel(&f, &secretary(), t2).unwrap_err();
        assert_eq!(err, CoreError::InvalidTransition { state: FollowupStatus::Validated, event: TransitionKind::Cancel });
    }

    #[test]
    fn corrected_at_never_moves_backwards() {
        let later = now() + Duration::days(2);
        let f = mark_corrected(&pending(), &entity("inst-x"), None, later).unwrap();
        let f = validate(&f, &secretary(), false, None, later).unwrap();
        let f = mark_corrected(&f, &entity("inst-x"), None, now()).unwrap();
        assert_eq!(f.corrected_at, Some(later));
    }

    #[test]
    fn terminal_states_accept_no_event() {
        let events = [TransitionKind::MarkCorrected, TransitionKind::Approve, TransitionKind::Reject, TransitionKind::Cancel];
        for state in FollowupStatus::ALL {
            let reachable = events.iter().any(|e| next_status(state, *e).is_some());
            assert_eq!(reachable, !state.is_terminal(), "{state}");
        }
        assert!(FollowupStatus::Validated.is_terminal());
        assert!(FollowupStatus::Cancelled.is_terminal());
    }

    #[test]
    fn illegal_pairs_fail_without_touching_input() {
        let mut states = vec![pending()];
        let corrected = mark_corrected(&states[0], &entity("inst-x"), None, now()).unwrap();
        let rejected = validate(&corrected, &secretary(), false, None, now()).unwrap();
        let validated = validate(&corrected, &secretary(), true, None, now()).unwrap();
        let cancelled = cancel(&states[0], &secretary(), now()).unwrap();
        states.extend([corrected, rejected, validated, cancelled]);

        let transitions = [
            Transition::MarkCorrected { notes: Some("n".into()) },
            Transition::Validate { approved: true, notes: Some("n".into()) },
            Transition::Validate { approved: false, notes: None },
            Transition::Cancel,
        ];
        // actors that would be allowed if the state permitted it
        let actor_for = |t: &Transition| match t {
            Transition::MarkCorrected { .. } => entity("inst-x"),
            _ => Actor::staff(UserId::from_str("adm"), Role::Superadmin),
        };

        for f in &states {
            for t in &transitions {
                let before = f.clone();
                let res = apply(f, &actor_for(t), t, now());
                match next_status(f.status, t.kind()) {
                    Some(to) => assert_eq!(res.unwrap().status, to),
                    None => assert_eq!(
                        res.unwrap_err(),
                        CoreError::InvalidTransition { state: f.status, event: t.kind() }
                    ),
                }
                assert_eq!(*f, before);
            }
        }
    }

    #[test]
    fn stale_observation_is_detected() {
        let f = pending();
        assert!(ensure_observed(&f, FollowupStatus::Pending).is_ok());
        assert!(matches!(
            ensure_observed(&f, FollowupStatus::Rejected),
            Err(CoreError::StaleState { expected: FollowupStatus::Rejected, actual: FollowupStatus::Pending, .. })
        ));
    }
}
