//! # Key-Value Store
//!
//! The store is an external collaborator. This module defines the contract the
//! coordinator consumes and two implementations of it:
//!
//! - `RedisStore` - RESP2 over TCP to a real server, with a connection pool
//! - `MemoryStore` - in-process store with the same transactional semantics
//!
//! Every call is atomic on its own. Batches go through `execute`, and the
//! optimistic check goes through a `WatchHandle` obtained from `watch`. The
//! store, not the caller, is the arbiter of whether a watched key changed
//! before a conditional submit landed.

pub mod client;
pub mod command;
pub mod config;
pub mod errors;
pub mod memory;
pub mod resp;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use client::RedisStore;
pub use command::{
    validate_all, Command, CommandReply, ExecReply, ExecutionFault, FaultKind, Operation, Reply,
    ValidationFault,
};
pub use config::StoreConfig;
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;

/// Boxed future returned by store calls
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Contract of the remote key-value store
pub trait KeyValueStore: Send + Sync {
    /// Value of `key`, `None` when absent
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Store `value` under `key`, optionally expiring after `ttl`
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()>;

    /// Remove keys, returning how many existed
    fn del<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, u64>;

    /// Increment an integer value. A non-numeric value is a per-call fault,
    /// not a store failure.
    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<i64, ExecutionFault>>;

    /// List slice with inclusive, possibly negative bounds
    fn lrange<'a>(&'a self, key: &'a str, start: i64, stop: i64) -> StoreFuture<'a, Vec<String>>;

    /// Submit `commands` as one atomic unit
    ///
    /// Never returns `ExecReply::Conflict`.
    fn execute<'a>(&'a self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply>;

    /// Start watching `keys` on a dedicated session
    fn watch<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Box<dyn WatchHandle>>;

    /// Round-trip check
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// The store's native conditional-submit primitive.
///
/// Reads made through the handle do not disturb the watch. `execute` runs the
/// batch only if no watched key was written since `watch` was called.
pub trait WatchHandle: Send {
    /// Read a key on the watched session
    fn get<'a>(&'a mut self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Conditionally submit. Consumes the watch whatever the outcome.
    fn execute<'a>(&'a mut self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply>;

    /// Drop the watch without submitting
    fn release(&mut self) -> StoreFuture<'_, ()>;
}
