//! # Optimistic Transactions
//!
//! Coordinates watch sessions and command batches over a `KeyValueStore`.
//!
//! - `CommandBatch` queues commands and records per-command results
//! - `WatchSession` submits a batch only if its watched keys did not change
//! - `Mutator` is the background writer used to race a session
//! - `TransactionCoordinator` runs the demonstration scenarios
//!
//! Conflicts are detected, never prevented, and never retried here.

pub mod batch;
pub mod coordinator;
pub mod errors;
pub mod mutator;
pub mod outcome;
pub mod watch;

pub use batch::{BatchOutcome, CommandBatch, CommandResult, QueuedCommand};
pub use coordinator::TransactionCoordinator;
pub use errors::{TxnError, TxnResult};
pub use mutator::{Mutator, MutatorReport, RaceWindow};
pub use outcome::{
    FieldValue, LogicFaultReport, SyntaxFaultReport, TransactionOutcome, WatchedUpdateReport,
};
pub use watch::{SessionState, SubmitOutcome, WatchConflict, WatchSession};
