use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail};
use conform_core::{Evaluation, EvaluationId, Followup, FollowupFilter, FollowupId, FollowupStatus, TransitionRecord};
use tracing::debug;

use crate::{error::StorageError, traits::Storage};

/// In-memory storage for tests and dry runs. Not durable.
///
/// Every write happens under one mutex, which makes the compare-and-swap atomic.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    evaluations: HashMap<String, Evaluation>,
    followups: HashMap<String, Followup>,
    history: Vec<TransitionRecord>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("in-memory storage lock poisoned"))
    }
}

impl Storage for InMemoryStorage {
    fn insert_evaluation(&self, evaluation: &Evaluation) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        if inner.evaluations.contains_key(evaluation.id.as_str()) {
            bail!("evaluation already stored: {}", evaluation.id);
        }
        inner.evaluations.insert(evaluation.id.0.clone(), evaluation.clone());
        Ok(())
    }

    fn load_evaluation(&self, id: &EvaluationId) -> anyhow::Result<Option<Evaluation>> {
        Ok(self.lock()?.evaluations.get(id.as_str()).cloned())
    }

    fn list_evaluations(&self) -> anyhow::Result<Vec<Evaluation>> {
        let mut out: Vec<Evaluation> = self.lock()?.evaluations.values().cloned().collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn load_followup(&self, id: &FollowupId) -> anyhow::Result<Option<Followup>> {
        Ok(self.lock()?.followups.get(id.as_str()).cloned())
    }

    fn list_followups(&self, filter: &FollowupFilter) -> anyhow::Result<Vec<Followup>> {
        let mut out: Vec<Followup> = self.lock()?.followups.values().filter(|f| filter.matches(f)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn insert_followup(&self, followup: &Followup, record: &TransitionRecord) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        if let Some(live) = inner.followups.values().find(|f| {
            f.status.is_live()
                && f.evaluation_id == followup.evaluation_id
                && f.criteria_result_id == followup.criteria_result_id
        }) {
            return Err(StorageError::AlreadyTracked {
                evaluation_id: followup.evaluation_id.clone(),
                criteria_id: followup.criteria_result_id.clone(),
                existing: live.id.clone(),
            }
            .into());
        }
        inner.followups.insert(followup.id.0.clone(), followup.clone());
        inner.history.push(record.clone());
        Ok(())
    }

    fn commit_transition(
        &self,
        expected: FollowupStatus,
        followup: &Followup,
        record: &TransitionRecord,
    ) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        let current = inner
            .followups
            .get_mut(followup.id.as_str())
            .ok_or_else(|| StorageError::FollowupNotFound(followup.id.clone()))?;
        if current.status != expected {
            debug!(followup_id = %followup.id, %expected, actual = %current.status, "stale commit rejected");
            return Err(StorageError::Stale {
                id: followup.id.clone(),
                expected,
                actual: current.status,
            }
            .into());
        }
        *current = followup.clone();
        inner.history.push(record.clone());
        Ok(())
    }

    fn history(&self, id: &FollowupId) -> anyhow::Result<Vec<TransitionRecord>> {
        Ok(self.lock()?.history.iter().filter(|r| &r.followup_id == id).cloned().collect())
    }
}
