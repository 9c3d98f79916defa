use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use conform_core::{
    extract, is_overdue, lifecycle, plan_notifications, Actor, CoreError, CriterionResult, DimensionView, Evaluation,
    EvaluationId, Followup, FollowupFilter, FollowupId, FollowupStats, FollowupStatus, NewFollowup, Transition,
    TransitionKind, TransitionRecord,
};
use conform_notify::{format_notification, Notifier, TracingNotifier};
use conform_storage::{InMemoryStorage, Storage, StorageError};
use conform_storage_sqlite::SqliteStorage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{Config, StorageBackend};

/// Domain errors stay typed; everything else is a backend failure.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for ServiceError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<StorageError>() {
            Ok(storage) => ServiceError::Core(storage.into()),
            Err(e) => ServiceError::Backend(e),
        }
    }
}

impl ServiceError {
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            ServiceError::Core(e) => Some(e),
            ServiceError::Backend(_) => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct Service {
    pub data_dir: PathBuf,
    pub cfg: Config,
    pub storage: Box<dyn Storage>,
    notifier: Box<dyn Notifier>,
}

impl Service {
    pub fn new(data_dir: PathBuf, cfg: Config, storage: Box<dyn Storage>, notifier: Box<dyn Notifier>) -> Self {
        Self { data_dir, cfg, storage, notifier }
    }

    pub fn in_memory(notifier: Box<dyn Notifier>) -> Self {
        Self::new(PathBuf::from("."), Config::in_memory(), Box::new(InMemoryStorage::new()), notifier)
    }

    pub fn open(data_dir: PathBuf) -> anyhow::Result<Self> {
        let cfg_path = Config::config_path(&data_dir);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_dir();
            cfg.save_to(&cfg_path)?;
            cfg
        };

        let storage: Box<dyn Storage> = match cfg.backend() {
            StorageBackend::Sqlite => Box::new(SqliteStorage::open(&cfg.db_path(&data_dir))?),
            StorageBackend::Memory => Box::new(InMemoryStorage::new()),
        };
        Ok(Self::new(data_dir, cfg, storage, Box::new(TracingNotifier)))
    }

    pub fn init_dir(data_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let cfg_path = Config::config_path(data_dir);
        if !cfg_path.exists() {
            Config::default_for_dir().save_to(&cfg_path)?;
        }
        let cfg = Config::load_from(&cfg_path)?;
        if cfg.backend() == StorageBackend::Sqlite {
            let _ = SqliteStorage::open(&cfg.db_path(data_dir))?;
        }
        Ok(())
    }

    pub fn import_evaluation(&self, evaluation: &Evaluation) -> ServiceResult<()> {
        self.storage.insert_evaluation(evaluation)?;
        info!(
            evaluation_id = %evaluation.id,
            institution_id = %evaluation.institution_id,
            criteria = evaluation.criteria_results.len(),
            "evaluation imported"
        );
        Ok(())
    }

    pub fn evaluation(&self, id: &EvaluationId) -> ServiceResult<Evaluation> {
        Ok(self.storage.load_evaluation(id)?.ok_or_else(|| CoreError::not_found("evaluation", id))?)
    }

    pub fn evaluations(&self) -> ServiceResult<Vec<Evaluation>> {
        Ok(self.storage.list_evaluations()?)
    }

    pub fn aggregate(&self, id: &EvaluationId) -> ServiceResult<BTreeMap<String, DimensionView>> {
        Ok(self.evaluation(id)?.dimensions())
    }

    pub fn non_compliant(&self, id: &EvaluationId) -> ServiceResult<Vec<CriterionResult>> {
        let evaluation = self.evaluation(id)?;
        Ok(extract(&evaluation.criteria_results).into_iter().cloned().collect())
    }

    pub fn create_followup(
        &self,
        actor: &Actor,
        evaluation_id: &EvaluationId,
        request: NewFollowup,
        now: DateTime<Utc>,
    ) -> ServiceResult<Followup> {
        let evaluation = self.evaluation(evaluation_id)?;
        let existing = self.storage.list_followups(&FollowupFilter {
            evaluation_id: Some(evaluation_id.clone()),
            ..Default::default()
        })?;
        let followup = lifecycle::create(actor, &evaluation, request, &existing, now)?;
        let record = TransitionRecord::new(None, &followup, TransitionKind::Create, actor, followup.notes.clone());
        self.storage.insert_followup(&followup, &record)?;
        info!(
            followup_id = %followup.id,
            evaluation_id = %followup.evaluation_id,
            criteria_id = %followup.criteria_result_id,
            due_date = %followup.due_date,
            actor = %actor.user_id,
            "followup created"
        );
        Ok(followup)
    }

    /// Run one lifecycle event against the followup the caller observed in `observed`.
    ///
    /// The write is a compare-and-swap on the status; a concurrent change surfaces as
    /// `StaleState` and nothing is written. Notifications go out only after the commit.
    pub fn transition(
        &self,
        actor: &Actor,
        id: &FollowupId,
        observed: FollowupStatus,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> ServiceResult<Followup> {
        let current = self.followup(id)?;
        lifecycle::ensure_observed(&current, observed)?;
        let next = lifecycle::apply(&current, actor, &transition, now)?;

        let kind = transition.kind();
        let record = TransitionRecord::new(Some(&current), &next, kind, actor, transition.notes().map(str::to_string));
        self.storage.commit_transition(observed, &next, &record)?;
        info!(
            followup_id = %id,
            event = %kind,
            from = %current.status,
            to = %next.status,
            actor = %actor.user_id,
            role = %actor.role,
            "followup transition committed"
        );

        self.notify(&next);
        Ok(next)
    }

    pub fn mark_corrected(
        &self,
        actor: &Actor,
        id: &FollowupId,
        observed: FollowupStatus,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Followup> {
        self.transition(actor, id, observed, Transition::MarkCorrected { notes }, now)
    }

    pub fn validate(
        &self,
        actor: &Actor,
        id: &FollowupId,
        observed: FollowupStatus,
        approved: bool,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Followup> {
        self.transition(actor, id, observed, Transition::Validate { approved, notes }, now)
    }

    pub fn cancel(
        &self,
        actor: &Actor,
        id: &FollowupId,
        observed: FollowupStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<Followup> {
        self.transition(actor, id, observed, Transition::Cancel, now)
    }

    pub fn followup(&self, id: &FollowupId) -> ServiceResult<Followup> {
        Ok(self.storage.load_followup(id)?.ok_or_else(|| CoreError::not_found("followup", id))?)
    }

    pub fn followups(&self, filter: &FollowupFilter) -> ServiceResult<Vec<Followup>> {
        Ok(self.storage.list_followups(filter)?)
    }

    pub fn overdue(&self, filter: &FollowupFilter, now: DateTime<Utc>) -> ServiceResult<Vec<Followup>> {
        let pending = FollowupFilter { status: Some(FollowupStatus::Pending), ..filter.clone() };
        Ok(self.followups(&pending)?.into_iter().filter(|f| is_overdue(f, now)).collect())
    }

    pub fn stats(&self, filter: &FollowupFilter, now: DateTime<Utc>) -> ServiceResult<FollowupStats> {
        Ok(FollowupStats::collect(&self.followups(filter)?, now))
    }

    pub fn history(&self, id: &FollowupId) -> ServiceResult<Vec<TransitionRecord>> {
        Ok(self.storage.history(id)?)
    }

    fn notify(&self, followup: &Followup) {
        if !self.cfg.notifications.enabled {
            return;
        }
        for n in plan_notifications(followup) {
            let body = format_notification(&n, followup);
            if let Err(e) = self.notifier.dispatch(&n, &body) {
                warn!(
                    followup_id = %n.followup_id,
                    target_role = %n.target_role,
                    error = %e,
                    "notification dispatch failed"
                );
            }
        }
    }
}
