use std::collections::BTreeMap;

use serde::Serialize;

use crate::{CriterionResult, CriterionStatus, Dimension, Evaluation, NlpAnalysis, ScoreMap};

/// Criteria ids ending with this suffix come from the NLP analysis.
pub const NLP_SUFFIX: &str = "-NLP";

/// Dimension a criterion is displayed under.
///
/// The audit engine reports NLP-derived criteria under `accesibilidad`; they always belong
/// to `nlp` regardless of the reported dimension.
pub fn effective_dimension(result: &CriterionResult) -> &str {
    if result.criteria_id.as_str().ends_with(NLP_SUFFIX) {
        Dimension::Nlp.key()
    } else {
        &result.dimension
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct DimensionView {
    pub criteria: Vec<CriterionResult>,
    pub percentage: f64,
    pub passed_count: usize,
    pub failed_count: usize,
    pub partial_count: usize,
    pub na_count: usize,
    pub total_count: usize,
}

impl DimensionView {
    fn push(&mut self, result: &CriterionResult) {
        match result.status {
            CriterionStatus::Pass => self.passed_count += 1,
            CriterionStatus::Fail => self.failed_count += 1,
            CriterionStatus::Partial => self.partial_count += 1,
            CriterionStatus::Na => self.na_count += 1,
        }
        self.total_count += 1;
        self.criteria.push(result.clone());
    }
}

/// Group criteria by effective dimension and attach each dimension's percentage.
///
/// The five known dimensions are always present, even with no criteria. Criteria under an
/// unknown dimension keep their own bucket so that every input lands somewhere.
pub fn aggregate(
    criteria: &[CriterionResult],
    scores: &ScoreMap,
    nlp: Option<&NlpAnalysis>,
) -> BTreeMap<String, DimensionView> {
    let mut out: BTreeMap<String, DimensionView> = Dimension::KNOWN
        .iter()
        .map(|d| (d.key().to_string(), DimensionView::default()))
        .collect();

    for result in criteria {
        out.entry(effective_dimension(result).to_string()).or_default().push(result);
    }

    for (key, view) in out.iter_mut() {
        view.percentage = match Dimension::from_key(key) {
            Some(Dimension::Nlp) => nlp.map(NlpAnalysis::global_percentage).unwrap_or(0.0),
            _ => scores.dimension_percentage(key),
        };
    }

    out
}

impl Evaluation {
    pub fn dimensions(&self) -> BTreeMap<String, DimensionView> {
        aggregate(&self.criteria_results, &self.scores, self.nlp_analysis.as_ref())
    }
}
