use conform_core::{CoreError, CriteriaId, EvaluationId, FollowupId, FollowupStatus, TargetRejection};
use thiserror::Error;

/// Conditions a backend reports when a write cannot be applied as requested.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("followup not found: {0}")]
    FollowupNotFound(FollowupId),

    #[error("followup {id} is {actual}, expected {expected}")]
    Stale { id: FollowupId, expected: FollowupStatus, actual: FollowupStatus },

    #[error("criterion {criteria_id} of evaluation {evaluation_id} is already tracked by followup {existing}")]
    AlreadyTracked { evaluation_id: EvaluationId, criteria_id: CriteriaId, existing: FollowupId },
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::FollowupNotFound(id) => CoreError::not_found("followup", id),
            StorageError::Stale { id, expected, actual } => CoreError::StaleState { followup_id: id, expected, actual },
            StorageError::AlreadyTracked { criteria_id, existing, .. } => CoreError::InvalidTarget {
                criteria_id,
                reason: TargetRejection::AlreadyTracked(existing),
            },
        }
    }
}
