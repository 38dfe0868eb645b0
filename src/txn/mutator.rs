//! Background writer racing a watch session
//!
//! The mutator is a spawned task that overwrites one key with `"abc"` (one
//! hour TTL) and reads it back. When it runs relative to the session is set by
//! a `RaceWindow`, so either ordering can be forced.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::observability::{log_event_with_fields, Event};
use crate::store::KeyValueStore;

/// Value the mutator writes
pub const MUTATOR_VALUE: &str = "abc";

/// Expiry of the mutator's write
pub const MUTATOR_TTL: Duration = Duration::from_secs(3600);

/// Ordering between the mutator's write and the session's submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceWindow {
    /// Mutator writes after `mutator_delay`; the session holds for `hold`
    /// before submitting. Whichever is shorter wins.
    Timed {
        mutator_delay: Duration,
        hold: Duration,
    },
    /// Session waits for the mutator's write before submitting
    MutatorFirst,
    /// Mutator is held back until the session has submitted
    SessionFirst,
    /// No mutator
    Unopposed,
}

impl RaceWindow {
    /// One second mutator delay against a five second hold
    pub fn default_timed() -> Self {
        RaceWindow::Timed {
            mutator_delay: Duration::from_secs(1),
            hold: Duration::from_secs(5),
        }
    }

    /// Build from a mode name. `timed` uses the given durations.
    pub fn from_mode(mode: &str, mutator_delay: Duration, hold: Duration) -> Result<Self, String> {
        match mode {
            "timed" => Ok(RaceWindow::Timed { mutator_delay, hold }),
            "mutator-first" => Ok(RaceWindow::MutatorFirst),
            "session-first" => Ok(RaceWindow::SessionFirst),
            "unopposed" => Ok(RaceWindow::Unopposed),
            other => Err(format!(
                "unknown race mode '{}', expected timed, mutator-first, session-first or unopposed",
                other
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaceWindow::Timed { .. } => "timed",
            RaceWindow::MutatorFirst => "mutator-first",
            RaceWindow::SessionFirst => "session-first",
            RaceWindow::Unopposed => "unopposed",
        }
    }
}

impl Default for RaceWindow {
    fn default() -> Self {
        Self::default_timed()
    }
}

impl fmt::Display for RaceWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the mutator saw after its write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MutatorReport {
    /// The write landed; the value read back (absent if it already expired)
    Wrote(Option<String>),
    Failed(String),
}

/// Handle to a spawned mutator task
///
/// Dropping the handle before `join` aborts the task.
pub struct Mutator {
    task: Option<JoinHandle<MutatorReport>>,
    report: Option<MutatorReport>,
    gate: Option<oneshot::Sender<()>>,
}

impl Mutator {
    /// Spawn a mutator that writes after `delay`
    pub fn after(store: Arc<dyn KeyValueStore>, key: &str, delay: Duration) -> Self {
        let task = tokio::spawn(run(store, key.to_string(), delay, None));
        Self {
            task: Some(task),
            report: None,
            gate: None,
        }
    }

    /// Spawn a mutator that writes only once `release_gate` is called
    pub fn gated(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(run(store, key.to_string(), Duration::ZERO, Some(rx)));
        Self {
            task: Some(task),
            report: None,
            gate: Some(tx),
        }
    }

    /// Let a gated mutator proceed. No-op for ungated or already released.
    pub fn release_gate(&mut self) {
        if let Some(gate) = self.gate.take() {
            // Receiver only goes away if the task already finished
            let _ = gate.send(());
        }
    }

    /// Wait for the task to finish without consuming the handle
    pub async fn wait(&mut self) -> &MutatorReport {
        if let Some(task) = self.task.take() {
            let report = match task.await {
                Ok(report) => report,
                Err(e) => MutatorReport::Failed(format!("mutator task failed: {}", e)),
            };
            self.report = Some(report);
        }
        self.report
            .get_or_insert_with(|| MutatorReport::Failed("mutator never ran".to_string()))
    }

    /// Wait for the task and take its report
    pub async fn join(mut self) -> MutatorReport {
        self.wait().await;
        self.report
            .take()
            .unwrap_or_else(|| MutatorReport::Failed("mutator never ran".to_string()))
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    store: Arc<dyn KeyValueStore>,
    key: String,
    delay: Duration,
    gate: Option<oneshot::Receiver<()>>,
) -> MutatorReport {
    if let Some(gate) = gate {
        if gate.await.is_err() {
            return MutatorReport::Failed("race gate dropped before release".to_string());
        }
    }
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let written = match store.set(&key, MUTATOR_VALUE, Some(MUTATOR_TTL)).await {
        Ok(()) => store.get(&key).await,
        Err(e) => Err(e),
    };
    match written {
        Ok(value) => {
            log_event_with_fields(
                Event::MutatorWrite,
                &[("key", &key), ("value", value.as_deref().unwrap_or(""))],
            );
            MutatorReport::Wrote(value)
        }
        Err(e) => {
            let message = e.to_string();
            log_event_with_fields(Event::MutatorFailed, &[("error", &message), ("key", &key)]);
            MutatorReport::Failed(message)
        }
    }
}
