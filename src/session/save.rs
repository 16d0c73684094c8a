//! Writing staged changes.
//!
//! Every pending entry becomes one statement, in tracking order. The batch runs inside its
//! own transaction, or inside a savepoint when the caller already opened one, so a failure
//! leaves both the store and the tracker as they were.

use super::tracker::TrackerEntry;
use super::Session;
use crate::backend::Statement;
use crate::entity::EntityState;
use crate::error::UowError;
use crate::value::{is_unset_key, json_to_value, key_condition, Ident, Row};
use sea_query::{Asterisk, Expr, Query};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

const SAVE_SAVEPOINT: &str = "uow_save";

enum WriteKind {
    Insert,
    Update,
    Delete,
    /// Modified entry with nothing but key columns
    Skip,
}

struct WriteOp {
    entry_id: u64,
    kind: WriteKind,
    statement: Statement,
    describe: String,
}

enum Outcome {
    Inserted(u64, Row),
    Updated(u64),
    Deleted(u64),
}

struct Bracket {
    begin: Statement,
    commit: Statement,
    rollback: Vec<Statement>,
}

impl Bracket {
    fn new(in_transaction: bool) -> Self {
        if in_transaction {
            Self {
                begin: Statement::raw(format!("SAVEPOINT {SAVE_SAVEPOINT}")),
                commit: Statement::raw(format!("RELEASE SAVEPOINT {SAVE_SAVEPOINT}")),
                rollback: vec![
                    Statement::raw(format!("ROLLBACK TO SAVEPOINT {SAVE_SAVEPOINT}")),
                    Statement::raw(format!("RELEASE SAVEPOINT {SAVE_SAVEPOINT}")),
                ],
            }
        } else {
            Self {
                begin: Statement::raw("BEGIN"),
                commit: Statement::raw("COMMIT"),
                rollback: vec![Statement::raw("ROLLBACK")],
            }
        }
    }
}

fn check_affected(op: &WriteOp, affected: u64) -> Result<Outcome, UowError> {
    if affected == 0 {
        return Err(UowError::Concurrency(format!(
            "{} affected no rows; the row may have been changed or removed",
            op.describe
        )));
    }
    Ok(match op.kind {
        WriteKind::Delete => Outcome::Deleted(op.entry_id),
        _ => Outcome::Updated(op.entry_id),
    })
}

impl Session {
    fn pending_entries(&self) -> Vec<TrackerEntry> {
        let mut state = self.inner.state.lock();
        if state.auto_detect_changes {
            state.tracker.detect_changes();
        }
        state.tracker.pending()
    }

    fn write_op(&self, entry: &TrackerEntry) -> Result<WriteOp, UowError> {
        let table = self.table_for(&entry.meta);
        let columns = entry.meta.primary_key.columns;
        let value_of = |column: &str| json_to_value(entry.current.get(column).unwrap_or(&JsonValue::Null));

        let (kind, statement, verb) = match entry.state {
            EntityState::Added => {
                let skip_key = entry.meta.primary_key.auto_increment
                    && is_unset_key(&entry.meta.primary_key, &entry.key);
                let insert_columns: Vec<&str> = entry
                    .meta
                    .columns
                    .iter()
                    .copied()
                    .filter(|c| !(skip_key && columns.contains(c)))
                    .collect();

                let mut query = Query::insert();
                query.into_table(Ident::new(table.as_str()));
                if insert_columns.is_empty() {
                    query.or_default_values();
                } else {
                    query.columns(insert_columns.iter().map(|c| Ident::new(*c)));
                    query.values_panic(insert_columns.iter().map(|c| Expr::val(value_of(c))));
                }
                query.returning_col(Asterisk);
                (WriteKind::Insert, self.render(&query), "INSERT")
            }
            EntityState::Modified => {
                let mut query = Query::update();
                query.table(Ident::new(table.as_str()));
                let mut assigned = 0;
                for column in entry.meta.value_columns() {
                    query.value(Ident::new(column), Expr::val(value_of(column)));
                    assigned += 1;
                }
                query.cond_where(key_condition(columns, &entry.key)?);
                let kind = if assigned == 0 {
                    WriteKind::Skip
                } else {
                    WriteKind::Update
                };
                (kind, self.render(&query), "UPDATE")
            }
            EntityState::Deleted => {
                let mut query = Query::delete();
                query
                    .from_table(Ident::new(table.as_str()))
                    .cond_where(key_condition(columns, &entry.key)?);
                (WriteKind::Delete, self.render(&query), "DELETE")
            }
            EntityState::Unchanged | EntityState::Detached => {
                return Err(UowError::InvalidOperation(format!(
                    "entry of {} is not pending",
                    entry.meta.type_name
                )))
            }
        };

        Ok(WriteOp {
            entry_id: entry.id,
            kind,
            statement,
            describe: format!("{verb} on \"{table}\" for key {}", entry.key),
        })
    }

    fn plan(&self) -> Result<Vec<WriteOp>, UowError> {
        self.pending_entries()
            .iter()
            .map(|entry| self.write_op(entry))
            .collect()
    }

    fn run_op(&self, op: &WriteOp) -> Result<Outcome, UowError> {
        match op.kind {
            WriteKind::Insert => {
                let mut rows = self.query(&op.statement)?;
                let returned = if rows.is_empty() { Row::new() } else { rows.swap_remove(0) };
                Ok(Outcome::Inserted(op.entry_id, returned))
            }
            WriteKind::Skip => Ok(Outcome::Updated(op.entry_id)),
            WriteKind::Update | WriteKind::Delete => {
                let affected = self.execute(&op.statement)?;
                check_affected(op, affected)
            }
        }
    }

    async fn run_op_async(&self, op: &WriteOp, cancel: &CancellationToken) -> Result<Outcome, UowError> {
        match op.kind {
            WriteKind::Insert => {
                let mut rows = self.query_async(&op.statement, cancel).await?;
                let returned = if rows.is_empty() { Row::new() } else { rows.swap_remove(0) };
                Ok(Outcome::Inserted(op.entry_id, returned))
            }
            WriteKind::Skip => Ok(Outcome::Updated(op.entry_id)),
            WriteKind::Update | WriteKind::Delete => {
                let affected = self.execute_async(&op.statement, cancel).await?;
                check_affected(op, affected)
            }
        }
    }

    fn rollback_bracket(&self, bracket: &Bracket) {
        for statement in &bracket.rollback {
            if let Err(e) = self.inner.backend.execute(statement) {
                log::warn!("session {}: rollback of failed save failed: {e}", self.inner.id);
                break;
            }
        }
    }

    fn apply(&self, outcomes: Vec<Outcome>) -> usize {
        let written = outcomes.len();
        let mut state = self.inner.state.lock();
        for outcome in outcomes {
            match outcome {
                Outcome::Inserted(id, row) => state.tracker.accept_insert(id, row),
                Outcome::Updated(id) => state.tracker.accept_update(id),
                Outcome::Deleted(id) => state.tracker.remove(id),
            }
        }
        written
    }

    fn record(&self, result: &Result<usize, UowError>) {
        match result {
            Ok(written) => {
                log::debug!("session {}: saved {written} entries", self.inner.id);
                #[cfg(feature = "metrics")]
                METRICS.record_save(*written as u64);
            }
            Err(e) => {
                log::debug!("session {}: save failed: {e}", self.inner.id);
                #[cfg(feature = "metrics")]
                METRICS.record_save_failure();
            }
        }
    }

    /// Write every pending change in one transaction and accept the results.
    ///
    /// Returns the number of entries written. On failure nothing is written and the tracked
    /// states are left as they were, so the save can be retried.
    pub fn save_changes(&self) -> Result<usize, UowError> {
        self.ensure_active()?;
        let ops = self.plan()?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::save_changes_span(ops.len()).entered();

        if ops.is_empty() {
            return Ok(0);
        }

        let bracket = Bracket::new(self.in_transaction());
        let result = (|| {
            self.execute(&bracket.begin)?;
            let mut outcomes = Vec::with_capacity(ops.len());
            for op in &ops {
                match self.run_op(op) {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        self.rollback_bracket(&bracket);
                        return Err(e);
                    }
                }
            }
            if let Err(e) = self.execute(&bracket.commit) {
                self.rollback_bracket(&bracket);
                return Err(e);
            }
            Ok(self.apply(outcomes))
        })();

        self.record(&result);
        result
    }

    /// Async [`Session::save_changes`]; cancellation before commit rolls the batch back
    pub async fn save_changes_async(&self, cancel: &CancellationToken) -> Result<usize, UowError> {
        self.ensure_active()?;
        if cancel.is_cancelled() {
            return Err(UowError::Cancelled);
        }
        let ops = self.plan()?;
        if ops.is_empty() {
            return Ok(0);
        }

        let bracket = Bracket::new(self.in_transaction());
        self.execute_async(&bracket.begin, cancel).await?;

        let mut outcomes = Vec::with_capacity(ops.len());
        let mut failure = None;
        for op in &ops {
            match self.run_op_async(op, cancel).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if failure.is_none() {
            if let Err(e) = self.execute_async(&bracket.commit, cancel).await {
                failure = Some(e);
            }
        }

        let result = match failure {
            Some(e) => {
                self.rollback_bracket(&bracket);
                Err(e)
            }
            None => Ok(self.apply(outcomes)),
        };
        self.record(&result);
        result
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use crate::backend::SqliteBackend;
    use crate::entity::{Entity, EntityState, PrimaryKey};
    use crate::error::UowError;
    use crate::session::Session;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Entity for Tag {
        type Key = i64;
        const TABLE: &'static str = "tags";
        const COLUMNS: &'static [&'static str] = &["id", "label"];
        const PRIMARY_KEY: PrimaryKey = PrimaryKey {
            columns: &["id"],
            auto_increment: true,
        };

        fn key(&self) -> i64 {
            self.id
        }
    }

    fn session() -> Session {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch("CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT NOT NULL UNIQUE)")
            .unwrap();
        Session::new(backend)
    }

    fn tag(id: i64, label: &str) -> Tag {
        Tag {
            id,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_insert_writes_back_generated_keys() {
        let session = session();
        session.track_added(&tag(0, "red")).unwrap();
        session.track_added(&tag(0, "blue")).unwrap();

        assert_eq!(session.save_changes().unwrap(), 2);
        let keys: Vec<_> = session.tracked_entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![json!(1), json!(2)]);
        assert!(!session.has_changes());
    }

    #[test]
    fn test_failed_save_keeps_tracker_and_store_untouched() {
        let session = session();
        session.track_added(&tag(0, "red")).unwrap();
        session.track_added(&tag(0, "red")).unwrap();

        let err = session.save_changes().unwrap_err();
        assert!(matches!(err, UowError::Sqlite(_)));

        let rows = session
            .query(&crate::backend::Statement::raw("SELECT COUNT(*) AS n FROM tags"))
            .unwrap();
        assert_eq!(rows[0]["n"], json!(0));
        let states: Vec<_> = session.tracked_entries().into_iter().map(|e| e.state).collect();
        assert_eq!(states, vec![EntityState::Added, EntityState::Added]);
    }

    #[test]
    fn test_update_of_missing_row_is_a_concurrency_error() {
        let session = session();
        session.track_modified(&tag(42, "ghost")).unwrap();
        let err = session.save_changes().unwrap_err();
        assert!(matches!(err, UowError::Concurrency(_)));
    }

    #[test]
    fn test_save_inside_transaction_uses_savepoint() {
        let session = session();
        let tx = session.begin_transaction(false).unwrap();
        session.track_added(&tag(0, "green")).unwrap();
        assert_eq!(session.save_changes().unwrap(), 1);
        tx.rollback().unwrap();

        let rows = session
            .query(&crate::backend::Statement::raw("SELECT COUNT(*) AS n FROM tags"))
            .unwrap();
        assert_eq!(rows[0]["n"], json!(0));
    }

    #[test]
    fn test_detect_changes_picks_up_edits() {
        let session = session();
        session.track_added(&tag(0, "red")).unwrap();
        session.save_changes().unwrap();

        let id = session.entry_id::<Tag>(&1).unwrap().unwrap();
        let entry = super::super::EntityEntry::<Tag>::new(session.clone(), id);
        entry.set_current(&tag(1, "crimson")).unwrap();

        session.set_auto_detect_changes(false);
        assert_eq!(session.save_changes().unwrap(), 0);
        session.set_auto_detect_changes(true);
        assert_eq!(session.save_changes().unwrap(), 1);
        assert_eq!(entry.original().unwrap(), Some(tag(1, "crimson")));
    }

    #[tokio::test]
    async fn test_cancelled_async_save_writes_nothing() {
        let session = session();
        session.track_added(&tag(0, "red")).unwrap();
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let err = session.save_changes_async(&token).await.unwrap_err();
        assert!(matches!(err, UowError::Cancelled));
        assert!(session.has_changes());
    }
}
