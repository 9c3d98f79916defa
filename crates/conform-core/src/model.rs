use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    Pass,
    Fail,
    Partial,
    Na,
}

impl CriterionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriterionStatus::Pass => "pass",
            CriterionStatus::Fail => "fail",
            CriterionStatus::Partial => "partial",
            CriterionStatus::Na => "na",
        }
    }
}

impl fmt::Display for CriterionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Pending,
    Corrected,
    Validated,
    Rejected,
    Cancelled,
}

impl FollowupStatus {
    pub const ALL: [FollowupStatus; 5] = [
        FollowupStatus::Pending,
        FollowupStatus::Corrected,
        FollowupStatus::Validated,
        FollowupStatus::Rejected,
        FollowupStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FollowupStatus::Pending => "pending",
            FollowupStatus::Corrected => "corrected",
            FollowupStatus::Validated => "validated",
            FollowupStatus::Rejected => "rejected",
            FollowupStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FollowupStatus::Pending),
            "corrected" => Some(FollowupStatus::Corrected),
            "validated" => Some(FollowupStatus::Validated),
            "rejected" => Some(FollowupStatus::Rejected),
            "cancelled" => Some(FollowupStatus::Cancelled),
            _ => None,
        }
    }

    /// No event is legal from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FollowupStatus::Validated | FollowupStatus::Cancelled)
    }

    /// A live followup blocks creation of another one for the same criterion.
    pub fn is_live(&self) -> bool {
        !matches!(self, FollowupStatus::Cancelled)
    }
}

impl fmt::Display for FollowupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of roles known to the platform.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superadmin,
    Secretary,
    Evaluator,
    EntityUser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::Secretary => "secretary",
            Role::Evaluator => "evaluator",
            Role::EntityUser => "entity_user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "superadmin" => Some(Role::Superadmin),
            "secretary" => Some(Role::Secretary),
            "evaluator" => Some(Role::Evaluator),
            "entity_user" => Some(Role::EntityUser),
            _ => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        match self {
            Role::Superadmin | Role::Secretary | Role::Evaluator => true,
            Role::EntityUser => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events. `validate` is split by outcome because the two outcomes lead to
/// different states.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Create,
    MarkCorrected,
    Approve,
    Reject,
    Cancel,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Create => "create",
            TransitionKind::MarkCorrected => "mark_corrected",
            TransitionKind::Approve => "approve",
            TransitionKind::Reject => "reject",
            TransitionKind::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(TransitionKind::Create),
            "mark_corrected" => Some(TransitionKind::MarkCorrected),
            "approve" => Some(TransitionKind::Approve),
            "reject" => Some(TransitionKind::Reject),
            "cancel" => Some(TransitionKind::Cancel),
            _ => None,
        }
    }

    pub fn validate(approved: bool) -> Self {
        if approved {
            TransitionKind::Approve
        } else {
            TransitionKind::Reject
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five compliance dimensions rendered by the platform.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Accesibilidad,
    Usabilidad,
    Semantica,
    Soberania,
    Nlp,
}

impl Dimension {
    pub const KNOWN: [Dimension; 5] = [
        Dimension::Accesibilidad,
        Dimension::Usabilidad,
        Dimension::Semantica,
        Dimension::Soberania,
        Dimension::Nlp,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Accesibilidad => "accesibilidad",
            Dimension::Usabilidad => "usabilidad",
            Dimension::Semantica => "semantica",
            Dimension::Soberania => "soberania",
            Dimension::Nlp => "nlp",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::KNOWN.into_iter().find(|d| d.key() == key)
    }
}
