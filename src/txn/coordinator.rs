//! Transaction coordinator
//!
//! Runs the three scenarios against a shared store:
//!
//! - a watched read-modify-write racing a background mutator
//! - a batch with a malformed command, which aborts as a whole
//! - a batch with a command that fails while executing, which fails alone
//!
//! Every scenario resets the keys it touches first, so re-running one gives
//! the same result. Store failures end the scenario with
//! `TxnError::StoreUnavailable`; watch conflicts and command faults are
//! reported in the result instead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::batch::{BatchOutcome, CommandBatch, CommandResult};
use super::errors::{TxnError, TxnResult};
use super::mutator::{Mutator, MutatorReport, RaceWindow};
use super::outcome::{
    FieldValue, LogicFaultReport, SyntaxFaultReport, TransactionOutcome, WatchedUpdateReport,
};
use super::watch::{SubmitOutcome, WatchSession};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};
use crate::store::{KeyValueStore, Operation};

/// Expiry applied to every scenario write
pub const SCENARIO_TTL: Duration = Duration::from_secs(3600);

/// Key the watched update writes alongside the watched key
pub const SIDE_KEY: &str = "b";
pub const SIDE_VALUE: &str = "ghf";

/// Round trip run before the watched update
pub const PROBE_KEY: &str = "foo";
pub const PROBE_VALUE: &str = "bar";

const SYNTAX_KEYS: [&str; 4] = ["key1", "key2", "key3", "key4"];
const LOGIC_KEYS: [&str; 2] = ["key1", "key2"];
const COUNTER_KEY: &str = "counter";
const COUNTER_VALUE: &str = "hello";

pub struct TransactionCoordinator {
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<MetricsRegistry>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_metrics(store, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_metrics(store: Arc<dyn KeyValueStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Watch `key`, let a mutator race the session, then try to replace the
    /// key with `"<initial>-new"` and write `b`.
    pub async fn run_watched_update(
        &self,
        key: &str,
        window: RaceWindow,
    ) -> TxnResult<WatchedUpdateReport> {
        let mut scope = ObservationScope::with_fields(
            "TXN_WATCHED_UPDATE",
            vec![("key", key.to_string()), ("window", window.as_str().to_string())],
        );
        match self.watched_update(key, window).await {
            Ok(report) => {
                scope.complete_with_fields(&[(
                    "outcome",
                    report.outcome.batch_outcome.as_str(),
                )]);
                Ok(report)
            }
            Err(e) => {
                self.record_failure(&e);
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn watched_update(&self, key: &str, window: RaceWindow) -> TxnResult<WatchedUpdateReport> {
        self.store
            .del(&[key.to_string(), SIDE_KEY.to_string()])
            .await?;
        self.store.set(PROBE_KEY, PROBE_VALUE, None).await?;
        let foo_initial_value = FieldValue::from_read(Ok(self.store.get(PROBE_KEY).await?));

        let mut session = WatchSession::begin(self.store.as_ref(), [key]).await?;
        self.metrics.increment_watch_sessions();
        let initial_value = session.observed(key).map(str::to_string);

        let mut mutator = match window {
            RaceWindow::Timed { mutator_delay, .. } => {
                Some(Mutator::after(self.store.clone(), key, mutator_delay))
            }
            RaceWindow::MutatorFirst => Some(Mutator::after(self.store.clone(), key, Duration::ZERO)),
            RaceWindow::SessionFirst => Some(Mutator::gated(self.store.clone(), key)),
            RaceWindow::Unopposed => None,
        };
        match (window, mutator.as_mut()) {
            (RaceWindow::Timed { hold, .. }, _) => tokio::time::sleep(hold).await,
            (RaceWindow::MutatorFirst, Some(m)) => {
                m.wait().await;
            }
            _ => {}
        }

        let mut batch = CommandBatch::new();
        batch.lrange(key, 0, -1);
        let updated = format!("{}-new", initial_value.as_deref().unwrap_or(""));
        batch.set(key, &updated, Some(SCENARIO_TTL));
        batch.set(SIDE_KEY, SIDE_VALUE, Some(SCENARIO_TTL));

        let submitted = session.submit_if_unchanged(&mut batch).await;

        let mutator_report = match mutator {
            Some(mut m) => {
                m.release_gate();
                Some(m.join().await)
            }
            None => None,
        };
        if let Some(MutatorReport::Wrote(_)) = mutator_report {
            self.metrics.increment_mutator_writes();
        }

        let (conflicts, transaction_error) = match submitted? {
            SubmitOutcome::Committed(_) => {
                self.metrics.increment_watch_commits();
                self.record_batch(&batch);
                (Vec::new(), None)
            }
            SubmitOutcome::Conflict(conflict) => {
                self.metrics.increment_watch_conflicts();
                let message = conflict.to_string();
                (conflict.keys, Some(message))
            }
            SubmitOutcome::Rejected(fault) => {
                self.metrics.increment_batches_aborted();
                (Vec::new(), Some(fault.to_string()))
            }
        };

        let mut outcome = TransactionOutcome::new(batch.outcome());
        outcome.conflicts = conflicts;
        outcome.final_values = self.read_back(&[key, SIDE_KEY]).await;

        Ok(WatchedUpdateReport {
            foo_initial_value,
            key: key.to_string(),
            initial_value,
            mutator: mutator_report,
            transaction_error,
            outcome,
        })
    }

    /// Batch whose third command has the wrong arity; nothing is applied.
    pub async fn run_batch_with_syntax_fault(&self) -> TxnResult<SyntaxFaultReport> {
        let mut scope = ObservationScope::new("TXN_SYNTAX_FAULT");
        match self.syntax_fault().await {
            Ok(report) => {
                scope.complete_with_fields(&[("outcome", report.outcome.batch_outcome.as_str())]);
                Ok(report)
            }
            Err(e) => {
                self.record_failure(&e);
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn syntax_fault(&self) -> TxnResult<SyntaxFaultReport> {
        let keys: Vec<String> = SYNTAX_KEYS.iter().map(|k| k.to_string()).collect();
        self.store.del(&keys).await?;

        let mut batch = CommandBatch::new();
        batch.set("key1", "value1", Some(SCENARIO_TTL));
        batch.set("key2", "value2", Some(SCENARIO_TTL));
        let incr = batch.enqueue(
            Operation::Incr,
            vec!["key3".to_string(), "not-a-number".to_string()],
        );
        batch.set("key4", "value4", Some(SCENARIO_TTL));

        let batch_outcome = batch.execute(self.store.as_ref()).await?;
        self.record_batch(&batch);

        let mut outcome = TransactionOutcome::new(batch_outcome);
        outcome.final_values = self.read_back(&SYNTAX_KEYS).await;

        Ok(SyntaxFaultReport {
            transaction_error: batch_outcome == BatchOutcome::AbortedPreExecution,
            error_message: batch.validation_fault().map(|f| f.to_string()),
            results: batch.describe_results(),
            incr_result_error: !produced_value(&batch, incr),
            outcome,
        })
    }

    /// Batch whose INCR hits a non-numeric value; the SETs around it apply.
    pub async fn run_batch_with_logic_fault(&self) -> TxnResult<LogicFaultReport> {
        let mut scope = ObservationScope::new("TXN_LOGIC_FAULT");
        match self.logic_fault().await {
            Ok(report) => {
                scope.complete_with_fields(&[("outcome", report.outcome.batch_outcome.as_str())]);
                Ok(report)
            }
            Err(e) => {
                self.record_failure(&e);
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn logic_fault(&self) -> TxnResult<LogicFaultReport> {
        self.store.set(COUNTER_KEY, COUNTER_VALUE, None).await?;
        let keys: Vec<String> = LOGIC_KEYS.iter().map(|k| k.to_string()).collect();
        self.store.del(&keys).await?;

        let mut batch = CommandBatch::new();
        batch.set("key1", "value1", Some(SCENARIO_TTL));
        let incr = batch.incr(COUNTER_KEY);
        batch.set("key2", "value2", Some(SCENARIO_TTL));

        let batch_outcome = batch.execute(self.store.as_ref()).await?;
        self.record_batch(&batch);

        let mut outcome = TransactionOutcome::new(batch_outcome);
        outcome.final_values = self.read_back(&[COUNTER_KEY, "key1", "key2"]).await;

        let overall_error = match batch.validation_fault() {
            Some(fault) => Some(fault.to_string()),
            None => batch.first_error().map(|f| f.to_string()),
        };
        Ok(LogicFaultReport {
            transaction_error: batch_outcome == BatchOutcome::AbortedPreExecution,
            overall_error,
            results: batch.describe_results(),
            incr_result_error: !produced_value(&batch, incr),
            outcome,
        })
    }

    /// Read keys back individually; a failed read is recorded, not raised
    async fn read_back(&self, keys: &[&str]) -> BTreeMap<String, FieldValue> {
        let mut values = BTreeMap::new();
        for key in keys {
            let value = FieldValue::from_read(self.store.get(key).await);
            values.insert(key.to_string(), value);
        }
        values
    }

    fn record_batch(&self, batch: &CommandBatch) {
        if batch.outcome().executed() {
            self.metrics.increment_batches_executed();
            self.metrics.add_command_faults(batch.fault_count() as u64);
        } else if batch.outcome() == BatchOutcome::AbortedPreExecution {
            self.metrics.increment_batches_aborted();
        }
    }

    fn record_failure(&self, error: &TxnError) {
        if let TxnError::StoreUnavailable(e) = error {
            self.metrics.increment_store_failures();
            log_event_with_fields(
                Event::StoreUnavailable,
                &[("code", e.code()), ("error", &e.to_string())],
            );
        }
    }
}

fn produced_value(batch: &CommandBatch, index: usize) -> bool {
    matches!(
        batch.command(index).map(|c| &c.result),
        Some(CommandResult::Value(_))
    )
}
