//! Watch Race Tests
//!
//! A watch session submits only if its watched keys are unchanged:
//! - a write between begin and submit yields a conflict and nothing is applied
//! - a write landing after the session's own comparison is still caught by
//!   the store's conditional submit
//! - without interference the batch commits in order

use std::sync::Arc;
use std::time::Duration;

use kvtxn::store::{
    Command, ExecReply, ExecutionFault, KeyValueStore, MemoryStore, StoreFuture, WatchHandle,
};
use kvtxn::txn::{
    BatchOutcome, CommandBatch, FieldValue, Mutator, MutatorReport, RaceWindow, SessionState,
    SubmitOutcome, TransactionCoordinator, WatchSession,
};

const HOUR: Option<Duration> = Some(Duration::from_secs(3600));

fn update_batch(key: &str, initial: Option<&str>) -> CommandBatch {
    let mut batch = CommandBatch::new();
    batch.lrange(key, 0, -1);
    batch.set(key, &format!("{}-new", initial.unwrap_or("")), HOUR);
    batch.set("b", "ghf", HOUR);
    batch
}

// =============================================================================
// Session Level
// =============================================================================

/// Mutator write strictly between begin and submit conflicts; b is not written.
#[tokio::test]
async fn test_write_between_begin_and_submit_conflicts() {
    let store = MemoryStore::new();
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());

    let mut session = WatchSession::begin(&store, ["a"]).await.unwrap();
    let report = Mutator::after(shared, "a", Duration::ZERO).join().await;
    assert_eq!(report, MutatorReport::Wrote(Some("abc".to_string())));

    let mut batch = update_batch("a", session.observed("a"));
    let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();

    assert_eq!(outcome.conflict().unwrap().keys, vec!["a".to_string()]);
    assert_eq!(session.state(), SessionState::Aborted);
    assert_eq!(batch.outcome(), BatchOutcome::NotSubmitted);
    assert_eq!(store.get("a").await.unwrap(), Some("abc".to_string()));
    assert_eq!(store.get("b").await.unwrap(), None);
}

/// No interference: the batch commits and its writes apply in order.
#[tokio::test]
async fn test_unchanged_keys_commit() {
    let store = MemoryStore::new();
    store.set("a", "start", None).await.unwrap();

    let mut session = WatchSession::begin(&store, ["a"]).await.unwrap();
    let mut batch = update_batch("a", session.observed("a"));
    let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Committed(BatchOutcome::PartiallyExecuted));
    // LRANGE of a string key is a WRONGTYPE fault; the SETs still apply
    assert!(batch.command(0).unwrap().result.is_error());
    assert_eq!(session.state(), SessionState::Committed);
    assert_eq!(store.get("a").await.unwrap(), Some("start-new".to_string()));
    assert_eq!(store.get("b").await.unwrap(), Some("ghf".to_string()));
}

/// Writes to keys outside the watch set do not invalidate the session.
#[tokio::test]
async fn test_unwatched_write_does_not_conflict() {
    let store = MemoryStore::new();
    let mut session = WatchSession::begin(&store, ["a"]).await.unwrap();
    store.set("c", "noise", None).await.unwrap();

    let mut batch = update_batch("a", None);
    let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();
    assert!(outcome.is_committed());
}

/// Writes the intruder value just before the conditional submit, after the
/// session has already compared its snapshot.
struct LateWriterStore {
    inner: MemoryStore,
}

struct LateWriterWatch {
    inner: Box<dyn WatchHandle>,
    store: MemoryStore,
    key: String,
}

impl WatchHandle for LateWriterWatch {
    fn get<'a>(&'a mut self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        self.inner.get(key)
    }

    fn execute<'a>(&'a mut self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply> {
        Box::pin(async move {
            self.store.set(&self.key, "intruder", None).await?;
            self.inner.execute(commands).await
        })
    }

    fn release(&mut self) -> StoreFuture<'_, ()> {
        self.inner.release()
    }
}

impl KeyValueStore for LateWriterStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        self.inner.get(key)
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        self.inner.set(key, value, ttl)
    }

    fn del<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, u64> {
        self.inner.del(keys)
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<i64, ExecutionFault>> {
        self.inner.incr(key)
    }

    fn lrange<'a>(&'a self, key: &'a str, start: i64, stop: i64) -> StoreFuture<'a, Vec<String>> {
        self.inner.lrange(key, start, stop)
    }

    fn execute<'a>(&'a self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply> {
        self.inner.execute(commands)
    }

    fn watch<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Box<dyn WatchHandle>> {
        Box::pin(async move {
            let inner = self.inner.watch(keys).await?;
            let handle: Box<dyn WatchHandle> = Box::new(LateWriterWatch {
                inner,
                store: self.inner.clone(),
                key: keys[0].clone(),
            });
            Ok(handle)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        self.inner.ping()
    }
}

/// The store's conditional submit is the arbiter, not the comparison.
#[tokio::test]
async fn test_store_catches_write_after_comparison() {
    let store = LateWriterStore {
        inner: MemoryStore::new(),
    };
    let mut session = WatchSession::begin(&store, ["a", "z"]).await.unwrap();
    let mut batch = update_batch("a", None);

    let outcome = session.submit_if_unchanged(&mut batch).await.unwrap();
    let conflict = outcome.conflict().unwrap();
    assert!(conflict.detected_by_store);
    assert_eq!(conflict.keys, vec!["a".to_string(), "z".to_string()]);
    assert_eq!(session.state(), SessionState::Aborted);
    assert_eq!(store.get("a").await.unwrap(), Some("intruder".to_string()));
    assert_eq!(store.get("b").await.unwrap(), None);
}

// =============================================================================
// Coordinator Race Windows
// =============================================================================

/// Default timing: mutator at 1s, submit at 5s, so the mutator wins.
#[tokio::test(start_paused = true)]
async fn test_timed_race_mutator_wins() {
    let coordinator = TransactionCoordinator::new(Arc::new(MemoryStore::new()));
    let report = coordinator
        .run_watched_update("a", RaceWindow::default_timed())
        .await
        .unwrap();

    assert!(!report.committed());
    assert!(report.outcome.is_conflict());
    assert_eq!(report.outcome.final_value("a"), Some(&FieldValue::Value("abc".into())));
    assert_eq!(report.outcome.final_value("b"), Some(&FieldValue::Absent));
}

/// Holding for less than the mutator's delay lets the session win.
#[tokio::test(start_paused = true)]
async fn test_timed_race_session_wins() {
    let coordinator = TransactionCoordinator::new(Arc::new(MemoryStore::new()));
    let window = RaceWindow::Timed {
        mutator_delay: Duration::from_secs(5),
        hold: Duration::from_secs(1),
    };
    let report = coordinator.run_watched_update("a", window).await.unwrap();

    assert!(report.committed());
    assert_eq!(report.mutator, Some(MutatorReport::Wrote(Some("abc".into()))));
    // The mutator lands after the commit and overwrites the key
    assert_eq!(report.outcome.final_value("a"), Some(&FieldValue::Value("abc".into())));
    assert_eq!(report.outcome.final_value("b"), Some(&FieldValue::Value("ghf".into())));
}

/// Forced orderings are deterministic across repeated runs.
#[tokio::test]
async fn test_forced_orderings_are_deterministic() {
    let coordinator = TransactionCoordinator::new(Arc::new(MemoryStore::new()));
    for _ in 0..5 {
        let lost = coordinator
            .run_watched_update("a", RaceWindow::MutatorFirst)
            .await
            .unwrap();
        assert!(!lost.committed());

        let won = coordinator
            .run_watched_update("a", RaceWindow::SessionFirst)
            .await
            .unwrap();
        assert!(won.committed());
    }

    let metrics = coordinator.metrics().snapshot();
    assert_eq!(metrics.watch_sessions, 10);
    assert_eq!(metrics.watch_conflicts, 5);
    assert_eq!(metrics.watch_commits, 5);
    assert_eq!(metrics.mutator_writes, 10);
}
