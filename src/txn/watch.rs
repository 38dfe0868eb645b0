//! Watch sessions
//!
//! A session observes a set of keys, then submits a batch only if none of
//! them changed. Two checks guard the submission:
//!
//! 1. the session re-reads every watched key and compares it with what it
//!    observed at `begin`, which catches writes that already landed and names
//!    the keys involved;
//! 2. the store's own conditional submit, which is the only thing that can
//!    catch a write landing between that comparison and the submission.
//!
//! There is no retry loop. A conflict is returned to the caller.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::batch::CommandBatch;
use super::batch::BatchOutcome;
use super::errors::{TxnError, TxnResult};
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::store::{ExecReply, KeyValueStore, ValidationFault, WatchHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Observing,
    Validating,
    Committed,
    Aborted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Observing => "observing",
            SessionState::Validating => "validating",
            SessionState::Committed => "committed",
            SessionState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Watched keys that changed before the batch could commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchConflict {
    pub keys: Vec<String>,
    /// True when the store's conditional submit caught the change rather than
    /// the session's own comparison
    pub detected_by_store: bool,
}

impl fmt::Display for WatchConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transaction failed: watched key(s) changed: {}",
            self.keys.join(", ")
        )
    }
}

/// What `submit_if_unchanged` did with the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The batch ran; per-command faults are on the batch
    Committed(BatchOutcome),
    /// A watched key changed; the batch was discarded unexecuted
    Conflict(WatchConflict),
    /// The batch failed validation and was aborted before anything ran
    Rejected(ValidationFault),
}

impl SubmitOutcome {
    pub fn conflict(&self) -> Option<&WatchConflict> {
        match self {
            SubmitOutcome::Conflict(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, SubmitOutcome::Committed(_))
    }
}

/// Optimistic session over a set of watched keys
pub struct WatchSession {
    id: Uuid,
    keys: Vec<String>,
    snapshot: Vec<Option<String>>,
    state: SessionState,
    handle: Option<Box<dyn WatchHandle>>,
}

impl fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSession")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .field("snapshot", &self.snapshot)
            .field("state", &self.state)
            .finish()
    }
}

impl WatchSession {
    /// Watch `keys` and record the current value of each.
    ///
    /// Duplicate keys are collapsed, keeping first-seen order.
    pub async fn begin<I, S>(store: &dyn KeyValueStore, keys: I) -> TxnResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        if unique.is_empty() {
            return Err(TxnError::EmptyWatchSet);
        }

        let mut handle = store.watch(&unique).await?;
        let mut snapshot = Vec::with_capacity(unique.len());
        for key in &unique {
            snapshot.push(handle.get(key).await?);
        }

        let session = Self {
            id: Uuid::new_v4(),
            keys: unique,
            snapshot,
            state: SessionState::Observing,
            handle: Some(handle),
        };
        log_event_with_fields(
            Event::WatchBegin,
            &[
                ("keys", &session.keys.join(",")),
                ("session", &session.id.to_string()),
            ],
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Value of a watched key at `begin`; `None` for absent or unwatched keys
    pub fn observed(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.snapshot[i].as_deref())
    }

    /// Submit `batch` only if no watched key changed since `begin`.
    ///
    /// A batch that was already submitted is refused with
    /// `BatchAlreadySubmitted` and the session stays observing.
    pub async fn submit_if_unchanged(&mut self, batch: &mut CommandBatch) -> TxnResult<SubmitOutcome> {
        if self.state != SessionState::Observing {
            return Err(TxnError::InvalidSessionState {
                session: self.id.to_string(),
                actual: self.state,
                expected: SessionState::Observing,
            });
        }
        batch.ensure_unsubmitted()?;
        self.state = SessionState::Validating;

        match self.validate_and_submit(batch).await {
            Ok(outcome) => {
                self.state = if outcome.is_committed() {
                    SessionState::Committed
                } else {
                    SessionState::Aborted
                };
                self.log_outcome(&outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.state = SessionState::Aborted;
                self.handle = None;
                Err(e)
            }
        }
    }

    async fn validate_and_submit(&mut self, batch: &mut CommandBatch) -> TxnResult<SubmitOutcome> {
        let Some(mut handle) = self.handle.take() else {
            return Err(TxnError::InvalidSessionState {
                session: self.id.to_string(),
                actual: self.state,
                expected: SessionState::Observing,
            });
        };

        let mut changed = Vec::new();
        for (key, observed) in self.keys.iter().zip(&self.snapshot) {
            let current = handle.get(key).await?;
            if &current != observed {
                changed.push(key.clone());
            }
        }
        if !changed.is_empty() {
            batch.discard();
            self.release(handle).await;
            return Ok(SubmitOutcome::Conflict(WatchConflict {
                keys: changed,
                detected_by_store: false,
            }));
        }

        if let Err(fault) = batch.validate() {
            batch.abort_pre_execution(fault.clone());
            self.release(handle).await;
            return Ok(SubmitOutcome::Rejected(fault));
        }

        let reply = handle.execute(&batch.wire_commands()).await?;
        match reply {
            ExecReply::Conflict => {
                batch.discard();
                Ok(SubmitOutcome::Conflict(WatchConflict {
                    keys: self.keys.clone(),
                    detected_by_store: true,
                }))
            }
            ExecReply::Aborted(fault) => {
                batch.abort_pre_execution(fault.clone());
                Ok(SubmitOutcome::Rejected(fault))
            }
            executed @ ExecReply::Executed(_) => {
                let outcome = batch.apply_reply(executed)?;
                Ok(SubmitOutcome::Committed(outcome))
            }
        }
    }

    /// Drop the server-side watch; a failure here cannot change the outcome
    async fn release(&mut self, mut handle: Box<dyn WatchHandle>) {
        if let Err(e) = handle.release().await {
            Logger::warn(
                "TXN_WATCH_RELEASE_FAILED",
                &[("error", &e.to_string()), ("session", &self.id.to_string())],
            );
        }
    }

    fn log_outcome(&self, outcome: &SubmitOutcome) {
        let session = self.id.to_string();
        match outcome {
            SubmitOutcome::Committed(batch) => log_event_with_fields(
                Event::WatchCommit,
                &[("batch", batch.as_str()), ("session", &session)],
            ),
            SubmitOutcome::Conflict(conflict) => log_event_with_fields(
                Event::WatchConflict,
                &[
                    ("detected_by_store", if conflict.detected_by_store { "true" } else { "false" }),
                    ("keys", &conflict.keys.join(",")),
                    ("session", &session),
                ],
            ),
            SubmitOutcome::Rejected(fault) => log_event_with_fields(
                Event::WatchAbort,
                &[("reason", &fault.reason), ("session", &session)],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::txn::batch::CommandResult;
    use crate::store::Operation;

    #[tokio::test]
    async fn test_begin_records_snapshot() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();

        let session = WatchSession::begin(&store, ["a", "missing", "a"]).await.unwrap();
        assert_eq!(session.state(), SessionState::Observing);
        assert_eq!(session.keys(), &["a".to_string(), "missing".to_string()]);
        assert_eq!(session.observed("a"), Some("1"));
        assert_eq!(session.observed("missing"), None);
    }

    #[tokio::test]
    async fn test_begin_rejects_empty_key_set() {
        let store = MemoryStore::new();
        let result = WatchSession::begin(&store, Vec::<String>::new()).await;
        assert!(matches!(result, Err(TxnError::EmptyWatchSet)));
    }

    #[tokio::test]
    async fn test_commit_when_unchanged() {
        let store = MemoryStore::new();
        let mut session = WatchSession::begin(&store, ["a"]).await.unwrap();

        let mut batch = CommandBatch::new();
        batch.set("a", "-new", None);
        batch.set("b", "ghf", None);

        let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Committed(BatchOutcome::FullyExecuted));
        assert_eq!(session.state(), SessionState::Committed);
        assert_eq!(store.get("b").await.unwrap(), Some("ghf".to_string()));
    }

    #[tokio::test]
    async fn test_conflict_names_changed_key_and_discards_batch() {
        let store = MemoryStore::new();
        let mut session = WatchSession::begin(&store, ["a", "c"]).await.unwrap();
        store.set("a", "abc", None).await.unwrap();

        let mut batch = CommandBatch::new();
        batch.set("b", "ghf", None);

        let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();
        let conflict = outcome.conflict().unwrap();
        assert_eq!(conflict.keys, vec!["a".to_string()]);
        assert!(!conflict.detected_by_store);
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(batch.outcome(), BatchOutcome::NotSubmitted);
        assert_eq!(batch.command(0).unwrap().result, CommandResult::NotExecuted);
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rewrite_with_same_value_caught_by_store() {
        let store = MemoryStore::new();
        store.set("a", "same", None).await.unwrap();
        let mut session = WatchSession::begin(&store, ["a"]).await.unwrap();
        // Value comparison cannot see this; the store's revision check can
        store.set("a", "same", None).await.unwrap();

        let mut batch = CommandBatch::new();
        batch.set("b", "ghf", None);
        let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();
        assert!(outcome.conflict().unwrap().detected_by_store);
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_batch_is_rejected_not_conflicted() {
        let store = MemoryStore::new();
        let mut session = WatchSession::begin(&store, ["a"]).await.unwrap();

        let mut batch = CommandBatch::new();
        batch.set("b", "ghf", None);
        batch.enqueue(Operation::Get, vec![]);

        let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected(ref f) if f.index == 1));
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(batch.outcome(), BatchOutcome::AbortedPreExecution);
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_session_submits_once() {
        let store = MemoryStore::new();
        let mut session = WatchSession::begin(&store, ["a"]).await.unwrap();
        let mut batch = CommandBatch::new();
        batch.get("a");
        session.submit_if_unchanged(&mut batch).await.unwrap();

        let mut again = CommandBatch::new();
        again.get("a");
        let result = session.submit_if_unchanged(&mut again).await;
        assert!(matches!(
            result,
            Err(TxnError::InvalidSessionState {
                actual: SessionState::Committed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_executed_batch_is_not_resubmitted() {
        let store = MemoryStore::new();
        let mut batch = CommandBatch::new();
        batch.incr("n");
        batch.execute(&store).await.unwrap();

        let mut session = WatchSession::begin(&store, ["n"]).await.unwrap();
        let result = session.submit_if_unchanged(&mut batch).await;
        assert!(matches!(result, Err(TxnError::BatchAlreadySubmitted)));
        assert_eq!(session.state(), SessionState::Observing);
        assert_eq!(store.get("n").await.unwrap(), Some("1".to_string()));

        // The session is still usable with a fresh batch
        let mut fresh = CommandBatch::new();
        fresh.incr("n");
        let outcome = session.submit_if_unchanged(&mut fresh).await.unwrap();
        assert!(outcome.is_committed());
        assert_eq!(store.get("n").await.unwrap(), Some("2".to_string()));
    }
}
