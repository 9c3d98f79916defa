use std::sync::Mutex;

use anyhow::anyhow;
use conform_core::{Followup, FollowupStatus, Notification};
use tracing::info;

/// Fire-and-forget delivery of lifecycle notifications.
///
/// Callers dispatch after the state change is committed and only log failures.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, notification: &Notification, body_md: &str) -> anyhow::Result<()>;
}

/// Writes notifications to the tracing log.
#[derive(Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn dispatch(&self, n: &Notification, body_md: &str) -> anyhow::Result<()> {
        info!(
            followup_id = %n.followup_id,
            target_role = %n.target_role,
            institution_id = %n.institution_id,
            status = %n.status,
            "notification: {}",
            body_md.lines().next().unwrap_or_default()
        );
        Ok(())
    }
}

/// Keeps every dispatched notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Notification, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.iter().map(|(n, _)| n.clone()).collect()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, n: &Notification, body_md: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("recording notifier lock poisoned"))?
            .push((n.clone(), body_md.to_string()));
        Ok(())
    }
}

/// Markdown body for a notification about `followup`.
pub fn format_notification(n: &Notification, followup: &Followup) -> String {
    let headline = match n.status {
        FollowupStatus::Corrected => "Correction reported, review needed",
        FollowupStatus::Validated => "Correction approved",
        FollowupStatus::Rejected => "Correction rejected, please re-submit",
        FollowupStatus::Pending => "Followup opened",
        FollowupStatus::Cancelled => "Followup cancelled",
    };
    let mut s = String::new();
    s.push_str(&format!("# {}: {}\n\n", headline, followup.criteria_result_id));
    s.push_str(&format!("**Followup:** {}\n", followup.id));
    s.push_str(&format!("**Evaluation:** {}\n", followup.evaluation_id));
    s.push_str(&format!("**Institution:** {}\n", n.institution_id));
    s.push_str(&format!("**Due:** {}\n", followup.due_date));
    let audience = if n.target_role.is_staff() { "reviewers" } else { "institution staff" };
    s.push_str(&format!("**For:** {} ({})\n", audience, n.target_role));

    let notes = match n.status {
        FollowupStatus::Validated | FollowupStatus::Rejected => followup.validation_notes.as_deref(),
        _ => followup.notes.as_deref(),
    };
    if let Some(notes) = notes {
        s.push_str("\n## Notes\n");
        s.push_str(notes);
        s.push('\n');
    }
    s
}
