use serde::{Deserialize, Serialize};

use crate::{Followup, FollowupId, FollowupStatus, InstitutionId, Role};

/// Message the shell hands to the notification dispatcher after a commit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub followup_id: FollowupId,
    pub target_role: Role,
    pub institution_id: InstitutionId,
    pub status: FollowupStatus,
}

/// Who hears about the state a followup just entered.
///
/// A correction goes to the staff that review it; a validation outcome goes back to the
/// institution.
pub fn plan_notifications(after: &Followup) -> Vec<Notification> {
    let targets: &[Role] = match after.status {
        FollowupStatus::Corrected => &[Role::Secretary, Role::Superadmin],
        FollowupStatus::Validated | FollowupStatus::Rejected => &[Role::EntityUser],
        FollowupStatus::Pending | FollowupStatus::Cancelled => &[],
    };
    targets
        .iter()
        .map(|role| Notification {
            followup_id: after.id.clone(),
            target_role: *role,
            institution_id: after.institution_id.clone(),
            status: after.status,
        })
        .collect()
}
