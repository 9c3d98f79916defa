use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{error::CoreError, ids::*, model::*};

/// One audit criterion outcome as reported by the audit engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CriterionResult {
    #[serde(alias = "criteria_id")]
    pub criteria_id: CriteriaId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dimension: String,
    pub status: CriterionStatus,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: f64,
    #[serde(default, alias = "max_score", deserialize_with = "lenient_f64")]
    pub max_score: f64,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub evidence: Value,
}

/// Numbers (or numeric strings) pass through; null and anything else read as 0.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(v.filter(|v| v.is_finite()).unwrap_or(0.0))
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

fn lenient_nlp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NlpAnalysis>, D::Error> {
    Ok(serde_json::from_value(Value::deserialize(d)?).ok())
}

/// A score as found in the engine output: a bare percentage, a `{percentage}` record,
/// or something unusable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScoreValue {
    Bare(f64),
    Record { percentage: Option<f64> },
    Other(Value),
}

impl ScoreValue {
    /// Missing or non-numeric scores resolve to 0.
    pub fn percentage(&self) -> f64 {
        let v = match self {
            ScoreValue::Bare(v) => Some(*v),
            ScoreValue::Record { percentage } => *percentage,
            ScoreValue::Other(_) => None,
        };
        v.filter(|v| v.is_finite()).unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ScoreMap(pub BTreeMap<String, ScoreValue>);

impl ScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.0.insert(key.to_string(), ScoreValue::Bare(value));
        self
    }

    pub fn percentage(&self, key: &str) -> f64 {
        self.0.get(key).map(ScoreValue::percentage).unwrap_or(0.0)
    }

    /// `semantica` reads `semantica_tecnica` and falls back to `semantica` only when the
    /// former is absent.
    pub fn dimension_percentage(&self, key: &str) -> f64 {
        if key == Dimension::Semantica.key() {
            if let Some(v) = self.0.get("semantica_tecnica") {
                return v.percentage();
            }
        }
        self.percentage(key)
    }

    pub fn total(&self) -> f64 {
        self.percentage("total")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct NlpAnalysis {
    #[serde(default, alias = "globalScore")]
    pub global_score: Option<ScoreValue>,
}

impl NlpAnalysis {
    pub fn global_percentage(&self) -> f64 {
        self.global_score.as_ref().map(ScoreValue::percentage).unwrap_or(0.0)
    }
}

/// Aggregate root produced once per audit run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: EvaluationId,
    #[serde(alias = "institution_id")]
    pub institution_id: InstitutionId,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub scores: ScoreMap,
    #[serde(alias = "criteria_results")]
    pub criteria_results: Vec<CriterionResult>,
    #[serde(default)]
    pub summary: Value,
    #[serde(default, rename = "nlp_analysis", alias = "nlpAnalysis", deserialize_with = "lenient_nlp")]
    pub nlp_analysis: Option<NlpAnalysis>,
}

/// Audit engine output as produced, before the importer assigns identity and ownership.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EngineOutput {
    #[serde(default)]
    id: Option<EvaluationId>,
    #[serde(default, alias = "institution_id")]
    institution_id: Option<InstitutionId>,
    #[serde(default, deserialize_with = "lenient_string")]
    url: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    scores: ScoreMap,
    #[serde(alias = "criteria_results")]
    criteria_results: Vec<CriterionResult>,
    #[serde(default)]
    summary: Value,
    #[serde(default, rename = "nlp_analysis", alias = "nlpAnalysis", deserialize_with = "lenient_nlp")]
    nlp_analysis: Option<NlpAnalysis>,
}

/// Identity supplied by the importer for engine output that does not carry its own.
#[derive(Clone, Debug, Default)]
pub struct ImportDefaults {
    pub id: Option<EvaluationId>,
    pub institution_id: Option<InstitutionId>,
}

impl Evaluation {
    /// Parse engine output that names its institution. A missing id is generated.
    pub fn from_json(s: &str) -> Result<Self, CoreError> {
        Self::from_engine_json(s, &ImportDefaults::default())
    }

    /// Parse engine output, filling `id` and `institutionId` from `defaults` when the payload
    /// lacks them. Values present in the payload win.
    ///
    /// Only a structurally absent criterion id or status (or timestamp) is malformed; present
    /// but unusable scores read as 0.
    pub fn from_engine_json(s: &str, defaults: &ImportDefaults) -> Result<Self, CoreError> {
        let raw: EngineOutput = serde_json::from_str(s).map_err(|e| CoreError::MalformedInput(e.to_string()))?;
        let institution_id = raw.institution_id.or_else(|| defaults.institution_id.clone()).ok_or_else(|| {
            CoreError::MalformedInput("evaluation has no institutionId and none was supplied".to_string())
        })?;
        Ok(Evaluation {
            id: raw.id.or_else(|| defaults.id.clone()).unwrap_or_default(),
            institution_id,
            url: raw.url,
            timestamp: raw.timestamp,
            scores: raw.scores,
            criteria_results: raw.criteria_results,
            summary: raw.summary,
            nlp_analysis: raw.nlp_analysis,
        })
    }

    pub fn criterion(&self, criteria_id: &CriteriaId) -> Option<&CriterionResult> {
        self.criteria_results.iter().find(|r| &r.criteria_id == criteria_id)
    }

    pub fn nlp_global_percentage(&self) -> f64 {
        self.nlp_analysis.as_ref().map(NlpAnalysis::global_percentage).unwrap_or(0.0)
    }
}

/// The acting user, as supplied by the identity layer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
    pub institution_id: Option<InstitutionId>,
}

impl Actor {
    pub fn staff(user_id: UserId, role: Role) -> Self {
        Self { user_id, role, institution_id: None }
    }

    pub fn entity_user(user_id: UserId, institution_id: InstitutionId) -> Self {
        Self { user_id, role: Role::EntityUser, institution_id: Some(institution_id) }
    }

    pub fn is_member_of(&self, institution_id: &InstitutionId) -> bool {
        self.institution_id.as_ref() == Some(institution_id)
    }
}

/// A tracked remediation action for one non-compliant criterion result.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Followup {
    pub id: FollowupId,
    pub evaluation_id: EvaluationId,
    pub criteria_result_id: CriteriaId,
    pub institution_id: InstitutionId,
    pub status: FollowupStatus,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub corrected_at: Option<DateTime<Utc>>,
    pub validation_notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit entry for one committed lifecycle event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionRecord {
    pub followup_id: FollowupId,
    pub kind: TransitionKind,
    pub from: Option<FollowupStatus>,
    pub to: FollowupStatus,
    pub actor_id: UserId,
    pub actor_role: Role,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl TransitionRecord {
    pub fn new(
        before: Option<&Followup>,
        after: &Followup,
        kind: TransitionKind,
        actor: &Actor,
        notes: Option<String>,
    ) -> Self {
        Self {
            followup_id: after.id.clone(),
            kind,
            from: before.map(|f| f.status),
            to: after.status,
            actor_id: actor.user_id.clone(),
            actor_role: actor.role,
            at: after.updated_at,
            notes,
        }
    }
}

/// Persistence-side filter for listing followups.
#[derive(Clone, Debug, Default)]
pub struct FollowupFilter {
    pub evaluation_id: Option<EvaluationId>,
    pub status: Option<FollowupStatus>,
    pub institution_id: Option<InstitutionId>,
}

impl FollowupFilter {
    pub fn matches(&self, f: &Followup) -> bool {
        self.evaluation_id.as_ref().map_or(true, |id| &f.evaluation_id == id)
            && self.status.map_or(true, |s| f.status == s)
            && self.institution_id.as_ref().map_or(true, |id| &f.institution_id == id)
    }
}
