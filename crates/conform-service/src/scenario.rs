use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use conform_core::{
    Actor, CriteriaId, Evaluation, Followup, FollowupStatus, InstitutionId, NewFollowup, Notification, Role, Transition,
    UserId,
};
use conform_notify::{Notifier, RecordingNotifier};
use serde::Deserialize;

use crate::{Service, ServiceError};

#[derive(Debug, Deserialize)]
pub struct ScenarioExpected {
    pub scenario_id: String,
    /// Final status per followup label.
    #[serde(default)]
    pub final_status: BTreeMap<String, String>,
    #[serde(default)]
    pub notifications: Option<usize>,
    /// Audit entries per followup label.
    #[serde(default)]
    pub history: BTreeMap<String, usize>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioSteps {
    /// Path to the evaluation JSON, relative to the scenario directory.
    pub evaluation: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    pub actors: BTreeMap<String, ScenarioActor>,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioActor {
    pub role: String,
    pub user: String,
    #[serde(default)]
    pub institution: Option<String>,
}

/// One step of a scenario. `expect` is either the resulting status name or the error kind
/// (`invalid_transition`, `stale_state`, ...). `observed` defaults to the stored status.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    Create {
        actor: String,
        label: String,
        criteria: String,
        due_in_days: i64,
        #[serde(default)]
        notes: Option<String>,
        expect: String,
    },
    MarkCorrected {
        actor: String,
        followup: String,
        #[serde(default)]
        observed: Option<String>,
        #[serde(default)]
        notes: Option<String>,
        expect: String,
    },
    Validate {
        actor: String,
        followup: String,
        approved: bool,
        #[serde(default)]
        observed: Option<String>,
        #[serde(default)]
        notes: Option<String>,
        expect: String,
    },
    Cancel {
        actor: String,
        followup: String,
        #[serde(default)]
        observed: Option<String>,
        expect: String,
    },
    Advance {
        days: i64,
    },
}

#[derive(Debug)]
pub struct ScenarioResult {
    /// Outcome per step, in order: a status name or an error kind.
    pub outcomes: Vec<String>,
    pub final_status: BTreeMap<String, FollowupStatus>,
    pub history: BTreeMap<String, usize>,
    pub notifications: Vec<Notification>,
    /// Steps whose outcome differed from their `expect`.
    pub mismatches: Vec<String>,
}

pub fn load_expected(dir: &Path) -> Result<ScenarioExpected> {
    let p = dir.join("expected.yaml");
    let s = std::fs::read_to_string(&p).with_context(|| format!("read expected.yaml: {}", p.display()))?;
    let exp: ScenarioExpected = serde_yaml::from_str(&s).with_context(|| "parse expected.yaml")?;
    Ok(exp)
}

pub fn load_steps(dir: &Path) -> Result<ScenarioSteps> {
    let p = dir.join("steps.yaml");
    let s = std::fs::read_to_string(&p).with_context(|| format!("read steps.yaml: {}", p.display()))?;
    let steps: ScenarioSteps = serde_yaml::from_str(&s).with_context(|| "parse steps.yaml")?;
    Ok(steps)
}

struct Recorder(Arc<RecordingNotifier>);

impl Notifier for Recorder {
    fn dispatch(&self, n: &Notification, body_md: &str) -> Result<()> {
        self.0.dispatch(n, body_md)
    }
}

/// Replay a scenario directory against an in-memory service.
///
/// Domain errors are outcomes, not failures: they are compared against each step's
/// `expect`. Only fixture problems (unknown actor or label, unreadable files) return `Err`.
pub fn simulate(dir: &Path) -> Result<ScenarioResult> {
    let script = load_steps(dir)?;
    let eval_path = dir.join(&script.evaluation);
    let raw = std::fs::read_to_string(&eval_path).with_context(|| format!("read {}", eval_path.display()))?;
    let evaluation = Evaluation::from_json(&raw).map_err(|e| anyhow!("{}: {}", eval_path.display(), e))?;

    let recorder = Arc::new(RecordingNotifier::new());
    let svc = Service::in_memory(Box::new(Recorder(recorder.clone())));
    svc.import_evaluation(&evaluation)?;

    let actors = script
        .actors
        .iter()
        .map(|(name, a)| Ok((name.clone(), to_actor(a)?)))
        .collect::<Result<BTreeMap<String, Actor>>>()?;
    let actor = |name: &str| actors.get(name).ok_or_else(|| anyhow!("unknown actor: {name}"));

    let mut now = script.start.unwrap_or_else(default_start);
    let mut labels: BTreeMap<String, Followup> = BTreeMap::new();
    let mut outcomes = Vec::new();
    let mut mismatches = Vec::new();

    for (idx, step) in script.steps.iter().enumerate() {
        let (outcome, expect) = match step {
            ScenarioStep::Advance { days } => {
                now += Duration::days(*days);
                continue;
            }
            ScenarioStep::Create { actor: who, label, criteria, due_in_days, notes, expect } => {
                let req = NewFollowup {
                    criteria_id: CriteriaId::from_str(criteria),
                    due_date: now.date_naive() + Duration::days(*due_in_days),
                    notes: notes.clone(),
                };
                let res = svc.create_followup(actor(who)?, &evaluation.id, req, now);
                if let Ok(f) = &res {
                    labels.insert(label.clone(), f.clone());
                }
                (outcome_of(res)?, expect)
            }
            ScenarioStep::MarkCorrected { actor: who, followup, observed, notes, expect } => {
                let t = Transition::MarkCorrected { notes: notes.clone() };
                (run_transition(&svc, &labels, actor(who)?, followup, observed, t, now)?, expect)
            }
            ScenarioStep::Validate { actor: who, followup, approved, observed, notes, expect } => {
                let t = Transition::Validate { approved: *approved, notes: notes.clone() };
                (run_transition(&svc, &labels, actor(who)?, followup, observed, t, now)?, expect)
            }
            ScenarioStep::Cancel { actor: who, followup, observed, expect } => {
                (run_transition(&svc, &labels, actor(who)?, followup, observed, Transition::Cancel, now)?, expect)
            }
        };
        if &outcome != expect {
            mismatches.push(format!("step {}: expected {}, got {}", idx + 1, expect, outcome));
        }
        outcomes.push(outcome);
    }

    let mut final_status = BTreeMap::new();
    let mut history = BTreeMap::new();
    for (label, f) in &labels {
        final_status.insert(label.clone(), svc.followup(&f.id)?.status);
        history.insert(label.clone(), svc.history(&f.id)?.len());
    }

    Ok(ScenarioResult { outcomes, final_status, history, notifications: recorder.sent(), mismatches })
}

fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).single().unwrap_or_else(Utc::now)
}

fn to_actor(a: &ScenarioActor) -> Result<Actor> {
    let role = Role::parse(&a.role).ok_or_else(|| anyhow!("unknown role: {}", a.role))?;
    Ok(Actor {
        user_id: UserId::from_str(&a.user),
        role,
        institution_id: a.institution.as_deref().map(InstitutionId::from_str),
    })
}

fn run_transition(
    svc: &Service,
    labels: &BTreeMap<String, Followup>,
    actor: &Actor,
    label: &str,
    observed: &Option<String>,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<String> {
    let f = labels.get(label).ok_or_else(|| anyhow!("unknown followup label: {label}"))?;
    let observed = match observed {
        Some(s) => FollowupStatus::parse(s).ok_or_else(|| anyhow!("unknown status: {s}"))?,
        None => svc.followup(&f.id)?.status,
    };
    outcome_of(svc.transition(actor, &f.id, observed, transition, now))
}

fn outcome_of(res: Result<Followup, ServiceError>) -> Result<String> {
    match res {
        Ok(f) => Ok(f.status.to_string()),
        Err(ServiceError::Core(e)) => Ok(e.kind().to_string()),
        Err(ServiceError::Backend(e)) => Err(e),
    }
}
