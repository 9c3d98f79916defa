use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::{ids::*, model::*};

/// Why a criterion result cannot receive a new followup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetRejection {
    /// Only `fail` and `partial` results are tracked.
    NotNonCompliant(CriterionStatus),
    /// A non-cancelled followup already covers this (evaluation, criterion) pair.
    AlreadyTracked(FollowupId),
}

impl fmt::Display for TargetRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRejection::NotNonCompliant(status) => write!(f, "criterion status is {}", status),
            TargetRejection::AlreadyTracked(id) => write!(f, "already tracked by followup {}", id),
        }
    }
}

/// Recoverable errors returned by the aggregation and lifecycle operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid followup target {criteria_id}: {reason}")]
    InvalidTarget { criteria_id: CriteriaId, reason: TargetRejection },

    #[error("due date {due_date} is in the past (today is {today})")]
    InvalidDueDate { due_date: NaiveDate, today: NaiveDate },

    #[error("cannot {event} a followup in state {state}")]
    InvalidTransition { state: FollowupStatus, event: TransitionKind },

    #[error("role {role} is not allowed to {event} this followup")]
    Unauthorized { role: Role, event: TransitionKind },

    #[error("followup {followup_id} is {actual}, caller observed {expected}; re-read and retry")]
    StaleState { followup_id: FollowupId, expected: FollowupStatus, actual: FollowupStatus },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        CoreError::NotFound { kind, id: id.to_string() }
    }

    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidTarget { .. } => "invalid_target",
            CoreError::InvalidDueDate { .. } => "invalid_due_date",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::Unauthorized { .. } => "unauthorized",
            CoreError::StaleState { .. } => "stale_state",
            CoreError::NotFound { .. } => "not_found",
            CoreError::MalformedInput(_) => "malformed_input",
        }
    }
}
