use crate::{lifecycle::next_status, FollowupStatus, Role, TransitionKind};

/// Roles permitted to fire `event`, ignoring the current state.
///
/// `MarkCorrected` also requires membership in the owning institution; no other event
/// looks at membership.
pub fn role_may(role: Role, event: TransitionKind, is_owning_member: bool) -> bool {
    use TransitionKind::*;
    match role {
        Role::Superadmin | Role::Secretary => matches!(event, Create | Approve | Reject | Cancel),
        Role::Evaluator => matches!(event, Approve | Reject),
        Role::EntityUser => event == MarkCorrected && is_owning_member,
    }
}

/// Lookup against the lifecycle table: `current` is `None` for creation.
pub fn authorize(
    role: Role,
    event: TransitionKind,
    current: Option<FollowupStatus>,
    is_owning_member: bool,
) -> bool {
    let legal = match current {
        None => event == TransitionKind::Create,
        Some(state) => next_status(state, event).is_some(),
    };
    legal && role_may(role, event, is_owning_member)
}
