//! In-process key-value store.
//!
//! Mirrors the transactional behavior of the remote store closely enough to
//! exercise the coordinator without a server:
//! - every write bumps a per-key revision, deletes and expiries included
//! - a watch records revisions and `execute` on the handle compares them
//!   under the same lock that applies the batch
//! - queue-time validation wins over a watch conflict, as on the server

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::command::{
    validate_all, Command, CommandReply, ExecReply, ExecutionFault, Operation, Reply,
};
use super::errors::{StoreError, StoreResult};
use super::{KeyValueStore, StoreFuture, WatchHandle};

#[derive(Debug, Clone)]
enum Stored {
    Str(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    /// Last write revision per key; survives deletion so a delete is visible
    /// to watchers
    revisions: HashMap<String, u64>,
    next_revision: u64,
}

impl Keyspace {
    fn touch(&mut self, key: &str) {
        self.next_revision += 1;
        self.revisions.insert(key.to_string(), self.next_revision);
    }

    fn revision(&mut self, key: &str) -> u64 {
        self.purge_if_expired(key);
        self.revisions.get(key).copied().unwrap_or(0)
    }

    fn purge_if_expired(&mut self, key: &str) {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&Stored> {
        self.purge_if_expired(key);
        self.entries.get(key).map(|e| &e.value)
    }

    fn apply(&mut self, command: &Command) -> CommandReply {
        let args = &command.args;
        match command.operation {
            Operation::Get => match self.live(&args[0]) {
                None => Ok(Reply::Nil),
                Some(Stored::Str(s)) => Ok(Reply::Bulk(s.clone())),
                Some(Stored::List(_)) => Err(ExecutionFault::wrong_type()),
            },
            Operation::Set => {
                let expires_at = command.ttl().and_then(|ttl| Instant::now().checked_add(ttl));
                self.entries.insert(
                    args[0].clone(),
                    Entry {
                        value: Stored::Str(args[1].clone()),
                        expires_at,
                    },
                );
                self.touch(&args[0]);
                Ok(Reply::Ok)
            }
            Operation::Del => {
                let mut removed = 0;
                for key in args {
                    self.purge_if_expired(key);
                    if self.entries.remove(key).is_some() {
                        self.touch(key);
                        removed += 1;
                    }
                }
                Ok(Reply::Integer(removed))
            }
            Operation::Incr => {
                let key = &args[0];
                let current = match self.live(key) {
                    None => 0,
                    Some(Stored::Str(s)) => {
                        s.parse::<i64>().map_err(|_| ExecutionFault::not_integer())?
                    }
                    Some(Stored::List(_)) => return Err(ExecutionFault::wrong_type()),
                };
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| ExecutionFault::from_message("ERR increment or decrement would overflow"))?;
                let expires_at = self.entries.get(key).and_then(|e| e.expires_at);
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Stored::Str(next.to_string()),
                        expires_at,
                    },
                );
                self.touch(key);
                Ok(Reply::Integer(next))
            }
            Operation::LRange => {
                let start: i64 = args[1].parse().map_err(|_| ExecutionFault::not_integer())?;
                let stop: i64 = args[2].parse().map_err(|_| ExecutionFault::not_integer())?;
                match self.live(&args[0]) {
                    None => Ok(Reply::List(Vec::new())),
                    Some(Stored::Str(_)) => Err(ExecutionFault::wrong_type()),
                    Some(Stored::List(items)) => Ok(Reply::List(list_slice(items, start, stop))),
                }
            }
        }
    }

    fn execute(&mut self, commands: &[Command], watched: Option<&[(String, u64)]>) -> ExecReply {
        if let Err(fault) = validate_all(commands) {
            return ExecReply::Aborted(fault);
        }
        if let Some(watched) = watched {
            let changed = watched
                .iter()
                .any(|(key, revision)| self.revision(key) != *revision);
            if changed {
                return ExecReply::Conflict;
            }
        }
        ExecReply::Executed(commands.iter().map(|c| self.apply(c)).collect())
    }
}

/// Inclusive slice with negative indices counted from the end
fn list_slice(items: &[String], start: i64, stop: i64) -> Vec<String> {
    let len = items.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return Vec::new();
    }
    items[start as usize..=stop as usize].to_vec()
}

/// In-process store. Clones share the same keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    keyspace: Arc<Mutex<Keyspace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Keyspace>> {
        lock_keyspace(&self.keyspace)
    }

    /// Append values to a list, creating it when absent.
    ///
    /// Not part of the store contract; used to seed list data.
    pub fn rpush(&self, key: &str, values: &[&str]) -> StoreResult<usize> {
        let mut ks = self.lock()?;
        if let Some(Stored::Str(_)) = ks.live(key) {
            return Err(StoreError::Rejected(ExecutionFault::wrong_type().message));
        }
        let entry = ks.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Stored::List(Vec::new()),
            expires_at: None,
        });
        let len = match &mut entry.value {
            Stored::List(items) => {
                items.extend(values.iter().map(|v| v.to_string()));
                items.len()
            }
            Stored::Str(_) => 0,
        };
        ks.touch(key);
        Ok(len)
    }

    /// Current write revision of `key` (0 if never written)
    pub fn revision(&self, key: &str) -> StoreResult<u64> {
        Ok(self.lock()?.revision(key))
    }

    fn run_single(&self, command: Command) -> StoreResult<CommandReply> {
        Ok(self.lock()?.apply(&command))
    }
}

fn lock_keyspace(keyspace: &Mutex<Keyspace>) -> StoreResult<MutexGuard<'_, Keyspace>> {
    keyspace
        .lock()
        .map_err(|_| StoreError::Unavailable("keyspace lock poisoned".to_string()))
}

fn expect_bulk(reply: CommandReply) -> StoreResult<Option<String>> {
    match reply {
        Ok(Reply::Bulk(s)) => Ok(Some(s)),
        Ok(Reply::Nil) => Ok(None),
        Ok(other) => Err(StoreError::Protocol(format!("unexpected reply to GET: {}", other))),
        Err(fault) => Err(StoreError::Rejected(fault.message)),
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { expect_bulk(self.run_single(Command::get(key))?) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.run_single(Command::set(key, value, ttl))?
                .map(|_| ())
                .map_err(|f| StoreError::Rejected(f.message))
        })
    }

    fn del<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            match self.run_single(Command::del(keys.iter().cloned()))? {
                Ok(Reply::Integer(n)) => Ok(n as u64),
                Ok(other) => Err(StoreError::Protocol(format!("unexpected reply to DEL: {}", other))),
                Err(fault) => Err(StoreError::Rejected(fault.message)),
            }
        })
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<i64, ExecutionFault>> {
        Box::pin(async move {
            match self.run_single(Command::incr(key))? {
                Ok(Reply::Integer(n)) => Ok(Ok(n)),
                Ok(other) => Err(StoreError::Protocol(format!("unexpected reply to INCR: {}", other))),
                Err(fault) => Ok(Err(fault)),
            }
        })
    }

    fn lrange<'a>(&'a self, key: &'a str, start: i64, stop: i64) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            match self.run_single(Command::lrange(key, start, stop))? {
                Ok(Reply::List(items)) => Ok(items),
                Ok(other) => Err(StoreError::Protocol(format!("unexpected reply to LRANGE: {}", other))),
                Err(fault) => Err(StoreError::Rejected(fault.message)),
            }
        })
    }

    fn execute<'a>(&'a self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply> {
        Box::pin(async move { Ok(self.lock()?.execute(commands, None)) })
    }

    fn watch<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Box<dyn WatchHandle>> {
        Box::pin(async move {
            let mut ks = self.lock()?;
            let watched = keys
                .iter()
                .map(|k| (k.clone(), ks.revision(k)))
                .collect();
            let handle: Box<dyn WatchHandle> = Box::new(MemoryWatch {
                keyspace: Arc::clone(&self.keyspace),
                watched: Some(watched),
            });
            Ok(handle)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.lock().map(|_| ()) })
    }
}

/// Watch on a `MemoryStore`
struct MemoryWatch {
    keyspace: Arc<Mutex<Keyspace>>,
    /// `None` once consumed by `execute` or `release`
    watched: Option<Vec<(String, u64)>>,
}

impl WatchHandle for MemoryWatch {
    fn get<'a>(&'a mut self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let reply = lock_keyspace(&self.keyspace)?.apply(&Command::get(key));
            expect_bulk(reply)
        })
    }

    fn execute<'a>(&'a mut self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply> {
        Box::pin(async move {
            let watched = self.watched.take().unwrap_or_default();
            Ok(lock_keyspace(&self.keyspace)?.execute(commands, Some(&watched)))
        })
    }

    fn release(&mut self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.watched = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_get_set_del() {
        let store = MemoryStore::new();
        store.set("foo", "bar", None).await.unwrap();
        assert_eq!(store.get("foo").await.unwrap(), Some("bar".to_string()));

        let removed = store.del(&keys(&["foo", "missing"])).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get("foo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_semantics() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n").await.unwrap(), Ok(1));
        assert_eq!(store.incr("n").await.unwrap(), Ok(2));

        store.set("s", "hello", None).await.unwrap();
        let fault = store.incr("s").await.unwrap().unwrap_err();
        assert_eq!(fault.kind, crate::store::FaultKind::NotInteger);
        assert_eq!(store.get("s").await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_lrange() {
        let store = MemoryStore::new();
        assert!(store.lrange("l", 0, -1).await.unwrap().is_empty());

        store.rpush("l", &["a", "b", "c", "d"]).unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), keys(&["a", "b", "c", "d"]));
        assert_eq!(store.lrange("l", 1, 2).await.unwrap(), keys(&["b", "c"]));
        assert_eq!(store.lrange("l", -2, 100).await.unwrap(), keys(&["c", "d"]));
        assert!(store.lrange("l", 3, 1).await.unwrap().is_empty());

        store.set("s", "x", None).await.unwrap();
        assert!(matches!(
            store.lrange("s", 0, -1).await,
            Err(StoreError::Rejected(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store.set("t", "v", Some(Duration::from_secs(10))).await.unwrap();
        let before = store.revision("t").unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("t").await.unwrap(), None);
        assert!(store.revision("t").unwrap() > before);
    }

    #[tokio::test]
    async fn test_execute_runs_in_order() {
        let store = MemoryStore::new();
        let commands = vec![
            Command::set("n", "41", None),
            Command::incr("n"),
            Command::get("n"),
        ];
        let reply = store.execute(&commands).await.unwrap();
        assert_eq!(
            reply,
            ExecReply::Executed(vec![
                Ok(Reply::Ok),
                Ok(Reply::Integer(42)),
                Ok(Reply::Bulk("42".to_string())),
            ])
        );
    }

    #[tokio::test]
    async fn test_execute_aborts_on_invalid_command() {
        let store = MemoryStore::new();
        let commands = vec![
            Command::set("a", "1", None),
            Command::new(Operation::Incr, keys(&["b", "junk"])),
        ];
        let reply = store.execute(&commands).await.unwrap();
        assert!(matches!(reply, ExecReply::Aborted(ref f) if f.index == 1));
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overflowing_expiry_is_refused_and_store_stays_usable() {
        let store = MemoryStore::new();
        let commands = vec![Command::new(
            Operation::Set,
            keys(&["k", "v", "EX", &i64::MAX.to_string()]),
        )];
        let reply = store.execute(&commands).await.unwrap();
        assert!(matches!(
            reply,
            ExecReply::Aborted(ref f) if f.reason.contains("invalid expire time")
        ));

        // Largest accepted expiry still applies without panicking
        let commands = vec![Command::new(
            Operation::Set,
            keys(&["k", "v", "PX", &i64::MAX.to_string()]),
        )];
        store.execute(&commands).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.set("foo", "bar", None).await.unwrap();
        assert_eq!(store.get("foo").await.unwrap(), Some("bar".to_string()));
    }

    #[tokio::test]
    async fn test_watch_detects_write() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();

        let mut handle = store.watch(&keys(&["a"])).await.unwrap();
        assert_eq!(handle.get("a").await.unwrap(), Some("1".to_string()));

        // Same value rewritten still counts as a write
        store.set("a", "1", None).await.unwrap();

        let reply = handle.execute(&[Command::set("b", "x", None)]).await.unwrap();
        assert_eq!(reply, ExecReply::Conflict);
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_detects_delete_of_absent_then_created_key() {
        let store = MemoryStore::new();
        let mut handle = store.watch(&keys(&["a"])).await.unwrap();
        store.set("a", "new", None).await.unwrap();
        store.del(&keys(&["a"])).await.unwrap();

        let reply = handle.execute(&[Command::set("b", "x", None)]).await.unwrap();
        assert_eq!(reply, ExecReply::Conflict);
    }

    #[tokio::test]
    async fn test_watch_commits_when_untouched() {
        let store = MemoryStore::new();
        let mut handle = store.watch(&keys(&["a"])).await.unwrap();
        store.set("unrelated", "x", None).await.unwrap();

        let reply = handle.execute(&[Command::set("b", "x", None)]).await.unwrap();
        assert!(matches!(reply, ExecReply::Executed(_)));
        assert_eq!(store.get("b").await.unwrap(), Some("x".to_string()));
    }

    #[test]
    fn test_list_slice_bounds() {
        let items = keys(&["a", "b", "c"]);
        assert_eq!(list_slice(&items, 0, -1), items);
        assert_eq!(list_slice(&items, -100, 0), keys(&["a"]));
        assert!(list_slice(&items, 5, 10).is_empty());
        assert!(list_slice(&[], 0, -1).is_empty());
    }
}
