//! kvtxn - optimistic-concurrency transactions over a remote key-value store
//!
//! Watch sessions race a background writer, and command batches show the two
//! failure classes of batched execution: a malformed command aborts the whole
//! batch, a command failing at run time fails alone.

pub mod cli;
pub mod config;
pub mod http_server;
pub mod observability;
pub mod store;
pub mod txn;
