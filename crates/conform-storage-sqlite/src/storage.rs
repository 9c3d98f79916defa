use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use conform_core::{
    CriteriaId, Evaluation, EvaluationId, Followup, FollowupFilter, FollowupId, FollowupStatus, InstitutionId, Role,
    TransitionKind, TransitionRecord, UserId,
};
use conform_storage::{Storage, StorageError};
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use tracing::debug;

/// How long a writer waits for another connection's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FOLLOWUP_COLUMNS: &str = "id, evaluation_id, criteria_result_id, institution_id, status, due_date, notes, \
     corrected_at, validation_notes, created_by, created_at, updated_at";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory sqlite db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn row_to_followup(r: &Row) -> rusqlite::Result<Followup> {
        Ok(Followup {
            id: FollowupId::from_str(r.get::<_, String>(0)?),
            evaluation_id: EvaluationId::from_str(r.get::<_, String>(1)?),
            criteria_result_id: CriteriaId::from_str(r.get::<_, String>(2)?),
            institution_id: InstitutionId::from_str(r.get::<_, String>(3)?),
            status: parse_column(r, 4, FollowupStatus::parse)?,
            due_date: r.get(5)?,
            notes: r.get(6)?,
            corrected_at: r.get(7)?,
            validation_notes: r.get(8)?,
            created_by: UserId::from_str(r.get::<_, String>(9)?),
            created_at: r.get(10)?,
            updated_at: r.get(11)?,
        })
    }

    fn row_to_record(r: &Row) -> rusqlite::Result<TransitionRecord> {
        let from: Option<String> = r.get(2)?;
        Ok(TransitionRecord {
            followup_id: FollowupId::from_str(r.get::<_, String>(0)?),
            kind: parse_column(r, 1, TransitionKind::parse)?,
            from: from.as_deref().and_then(FollowupStatus::parse),
            to: parse_column(r, 3, FollowupStatus::parse)?,
            actor_id: UserId::from_str(r.get::<_, String>(4)?),
            actor_role: parse_column(r, 5, Role::parse)?,
            at: r.get(6)?,
            notes: r.get(7)?,
        })
    }

    fn append_record(tx: &Transaction<'_>, record: &TransitionRecord) -> Result<()> {
        tx.execute(
            "INSERT INTO followup_events(followup_id, kind, from_status, to_status, actor_id, actor_role, at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.followup_id.0,
                record.kind.as_str(),
                record.from.map(|s| s.as_str()),
                record.to.as_str(),
                record.actor_id.0,
                record.actor_role.as_str(),
                record.at,
                record.notes,
            ],
        )?;
        Ok(())
    }

    fn live_followup_for(
        tx: &Transaction<'_>,
        evaluation_id: &EvaluationId,
        criteria_id: &CriteriaId,
    ) -> Result<Option<String>> {
        Ok(tx
            .query_row(
                "SELECT id FROM followups WHERE evaluation_id=?1 AND criteria_result_id=?2 AND status <> 'cancelled'",
                params![evaluation_id.0, criteria_id.0],
                |r| r.get(0),
            )
            .optional()?)
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn parse_column<T>(r: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let s: String = r.get(idx)?;
    parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value {:?}", s).into(),
        )
    })
}

impl Storage for SqliteStorage {
    fn insert_evaluation(&self, evaluation: &Evaluation) -> Result<()> {
        let conn = self.lock()?;
        let payload = serde_json::to_string(evaluation)?;
        conn.execute(
            "INSERT INTO evaluations(id, institution_id, url, evaluated_at, payload_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![evaluation.id.0, evaluation.institution_id.0, evaluation.url, evaluation.timestamp, payload],
        )
        .with_context(|| format!("insert evaluation {}", evaluation.id))?;
        Ok(())
    }

    fn load_evaluation(&self, id: &EvaluationId) -> Result<Option<Evaluation>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row("SELECT payload_json FROM evaluations WHERE id=?1", params![id.0], |r| r.get(0))
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).with_context(|| format!("decode evaluation {}", id)))
            .transpose()
    }

    fn list_evaluations(&self) -> Result<Vec<Evaluation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, payload_json FROM evaluations ORDER BY evaluated_at, id")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        let mut out = vec![];
        for row in rows {
            let (id, payload) = row?;
            out.push(serde_json::from_str(&payload).with_context(|| format!("decode evaluation {}", id))?);
        }
        Ok(out)
    }

    fn load_followup(&self, id: &FollowupId) -> Result<Option<Followup>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM followups WHERE id=?1", FOLLOWUP_COLUMNS);
        Ok(conn.query_row(&sql, params![id.0], Self::row_to_followup).optional()?)
    }

    fn list_followups(&self, filter: &FollowupFilter) -> Result<Vec<Followup>> {
        let conn = self.lock()?;
        let mut clauses: Vec<&str> = vec![];
        let mut args: Vec<String> = vec![];
        if let Some(id) = &filter.evaluation_id {
            clauses.push("evaluation_id = ?");
            args.push(id.0.clone());
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(id) = &filter.institution_id {
            clauses.push("institution_id = ?");
            args.push(id.0.clone());
        }
        let mut sql = format!("SELECT {} FROM followups", FOLLOWUP_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), Self::row_to_followup)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn insert_followup(&self, followup: &Followup, record: &TransitionRecord) -> Result<()> {
        let mut conn = self.lock()?;
        // take the write lock before reading so a concurrent writer queues behind us
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::live_followup_for(&tx, &followup.evaluation_id, &followup.criteria_result_id)? {
            return Err(StorageError::AlreadyTracked {
                evaluation_id: followup.evaluation_id.clone(),
                criteria_id: followup.criteria_result_id.clone(),
                existing: FollowupId::from_str(existing),
            }
            .into());
        }

        let inserted = tx.execute(
            &format!(
                "INSERT INTO followups({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                FOLLOWUP_COLUMNS
            ),
            params![
                followup.id.0,
                followup.evaluation_id.0,
                followup.criteria_result_id.0,
                followup.institution_id.0,
                followup.status.as_str(),
                followup.due_date,
                followup.notes,
                followup.corrected_at,
                followup.validation_notes,
                followup.created_by.0,
                followup.created_at,
                followup.updated_at,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                // followups_live_target caught a live duplicate the read above did not see
                if let Some(existing) =
                    Self::live_followup_for(&tx, &followup.evaluation_id, &followup.criteria_result_id)?
                {
                    return Err(StorageError::AlreadyTracked {
                        evaluation_id: followup.evaluation_id.clone(),
                        criteria_id: followup.criteria_result_id.clone(),
                        existing: FollowupId::from_str(existing),
                    }
                    .into());
                }
                return Err(anyhow::Error::new(e).context(format!("insert followup {}", followup.id)));
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("insert followup {}", followup.id))),
        }
        Self::append_record(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn commit_transition(&self, expected: FollowupStatus, followup: &Followup, record: &TransitionRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let actual: Option<String> = tx
            .query_row("SELECT status FROM followups WHERE id=?1", params![followup.id.0], |r| r.get(0))
            .optional()?;
        let Some(actual) = actual else {
            return Err(StorageError::FollowupNotFound(followup.id.clone()).into());
        };

        // conditional update is the compare-and-swap
        let changed = tx.execute(
            "UPDATE followups SET status=?1, notes=?2, corrected_at=?3, validation_notes=?4, updated_at=?5
             WHERE id=?6 AND status=?7",
            params![
                followup.status.as_str(),
                followup.notes,
                followup.corrected_at,
                followup.validation_notes,
                followup.updated_at,
                followup.id.0,
                expected.as_str(),
            ],
        )?;
        if changed == 0 {
            debug!(followup_id = %followup.id, %expected, %actual, "stale commit rejected");
            return Err(StorageError::Stale {
                id: followup.id.clone(),
                expected,
                actual: FollowupStatus::parse(&actual).ok_or_else(|| anyhow!("unknown status {:?}", actual))?,
            }
            .into());
        }

        Self::append_record(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn history(&self, id: &FollowupId) -> Result<Vec<TransitionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT followup_id, kind, from_status, to_status, actor_id, actor_role, at, notes
             FROM followup_events WHERE followup_id=?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![id.0], Self::row_to_record)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
