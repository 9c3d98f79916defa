use conform_core::{Evaluation, EvaluationId, Followup, FollowupFilter, FollowupId, FollowupStatus, TransitionRecord};

/// Persistence for evaluations, followups and their transition history.
///
/// Write conflicts surface as [`crate::StorageError`] inside the returned `anyhow::Error`.
pub trait Storage: Send + Sync {
    fn insert_evaluation(&self, evaluation: &Evaluation) -> anyhow::Result<()>;
    fn load_evaluation(&self, id: &EvaluationId) -> anyhow::Result<Option<Evaluation>>;
    fn list_evaluations(&self) -> anyhow::Result<Vec<Evaluation>>;

    fn load_followup(&self, id: &FollowupId) -> anyhow::Result<Option<Followup>>;
    fn list_followups(&self, filter: &FollowupFilter) -> anyhow::Result<Vec<Followup>>;

    /// Insert a new followup and its creation record. Fails with `AlreadyTracked` when a
    /// non-cancelled followup covers the same (evaluation, criterion) pair.
    fn insert_followup(&self, followup: &Followup, record: &TransitionRecord) -> anyhow::Result<()>;

    /// Replace a followup only if its persisted status is still `expected`, appending
    /// `record` in the same atomic step. Fails with `Stale` otherwise.
    fn commit_transition(
        &self,
        expected: FollowupStatus,
        followup: &Followup,
        record: &TransitionRecord,
    ) -> anyhow::Result<()>;

    fn history(&self, id: &FollowupId) -> anyhow::Result<Vec<TransitionRecord>>;
}
