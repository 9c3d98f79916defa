use crate::{CoreError, CriterionResult, CriterionStatus, TargetRejection};

pub fn is_non_compliant(status: CriterionStatus) -> bool {
    matches!(status, CriterionStatus::Fail | CriterionStatus::Partial)
}

/// Criteria eligible for a followup, in input order.
pub fn extract(criteria: &[CriterionResult]) -> Vec<&CriterionResult> {
    criteria.iter().filter(|r| is_non_compliant(r.status)).collect()
}

pub fn check_target(result: &CriterionResult) -> Result<(), CoreError> {
    if is_non_compliant(result.status) {
        Ok(())
    } else {
        Err(CoreError::InvalidTarget {
            criteria_id: result.criteria_id.clone(),
            reason: TargetRejection::NotNonCompliant(result.status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CriteriaId;

    fn crit(id: &str, status: CriterionStatus) -> CriterionResult {
        CriterionResult {
            criteria_id: CriteriaId::from_str(id),
            dimension: "accesibilidad".into(),
            status,
            score: 0.0,
            max_score: 0.0,
            details: serde_json::Value::Null,
            evidence: serde_json::Value::Null,
        }
    }

    #[test]
    fn keeps_fail_and_partial_in_order() {
        let input = vec![
            crit("a", CriterionStatus::Partial),
            crit("b", CriterionStatus::Pass),
            crit("c", CriterionStatus::Fail),
            crit("d", CriterionStatus::Na),
            crit("e", CriterionStatus::Fail),
        ];
        let ids: Vec<&str> = extract(&input).iter().map(|r| r.criteria_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "e"]);
    }

    #[test]
    fn pass_and_na_are_not_targets() {
        assert!(check_target(&crit("a", CriterionStatus::Fail)).is_ok());
        assert!(check_target(&crit("a", CriterionStatus::Partial)).is_ok());
        assert!(matches!(
            check_target(&crit("a", CriterionStatus::Pass)),
            Err(CoreError::InvalidTarget { reason: TargetRejection::NotNonCompliant(CriterionStatus::Pass), .. })
        ));
        assert!(check_target(&crit("a", CriterionStatus::Na)).is_err());
    }
}
