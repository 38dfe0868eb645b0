//! Scenario reports
//!
//! Each coordinator operation returns a typed report. `to_response` flattens
//! it into the JSON shape callers consume, where an absent key is `null`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::batch::BatchOutcome;
use super::mutator::MutatorReport;
use crate::store::StoreResult;

/// Result of reading one key after a scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Value(String),
    Absent,
    /// The read itself failed
    Error(String),
}

impl FieldValue {
    pub fn from_read(read: StoreResult<Option<String>>) -> Self {
        match read {
            Ok(Some(value)) => FieldValue::Value(value),
            Ok(None) => FieldValue::Absent,
            Err(e) => FieldValue::Error(e.to_string()),
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FieldValue::Error(_))
    }

    fn to_json(&self) -> Value {
        match self.value() {
            Some(v) => Value::String(v.to_string()),
            None => Value::Null,
        }
    }

    /// `{prefix}_value`, or `{prefix}_error` when the read failed
    fn insert_into(&self, map: &mut Map<String, Value>, prefix: &str) {
        match self {
            FieldValue::Error(e) => {
                map.insert(format!("{}_error", prefix), Value::String(e.clone()));
            }
            other => {
                map.insert(format!("{}_value", prefix), other.to_json());
            }
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Value(v) => serializer.serialize_str(v),
            FieldValue::Absent => serializer.serialize_none(),
            FieldValue::Error(e) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", e)?;
                map.end()
            }
        }
    }
}

/// Final key states and what happened to the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionOutcome {
    pub final_values: BTreeMap<String, FieldValue>,
    /// Watched keys that changed; empty unless a watch conflict occurred
    pub conflicts: Vec<String>,
    pub batch_outcome: BatchOutcome,
}

impl TransactionOutcome {
    pub fn new(batch_outcome: BatchOutcome) -> Self {
        Self {
            final_values: BTreeMap::new(),
            conflicts: Vec::new(),
            batch_outcome,
        }
    }

    pub fn final_value(&self, key: &str) -> Option<&FieldValue> {
        self.final_values.get(key)
    }

    pub fn is_conflict(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Watched read-modify-write racing a mutator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedUpdateReport {
    pub foo_initial_value: FieldValue,
    pub key: String,
    /// Watched key's value when the session began
    pub initial_value: Option<String>,
    /// `None` when the race ran unopposed
    pub mutator: Option<MutatorReport>,
    /// Why the submission did not commit
    pub transaction_error: Option<String>,
    pub outcome: TransactionOutcome,
}

impl WatchedUpdateReport {
    pub fn committed(&self) -> bool {
        self.transaction_error.is_none()
    }

    pub fn to_response(&self) -> Value {
        let mut watch = Map::new();
        watch.insert(
            "initial_value".to_string(),
            self.initial_value.clone().map(Value::String).unwrap_or(Value::Null),
        );
        match &self.mutator {
            Some(MutatorReport::Wrote(value)) => {
                watch.insert(
                    "goroutine_set_value".to_string(),
                    value.clone().map(Value::String).unwrap_or(Value::Null),
                );
            }
            Some(MutatorReport::Failed(e)) => {
                watch.insert("goroutine_error".to_string(), Value::String(e.clone()));
            }
            None => {}
        }
        if let Some(e) = &self.transaction_error {
            watch.insert("transaction_error".to_string(), Value::String(e.clone()));
            watch.insert("watch_error".to_string(), Value::String(e.clone()));
        }
        for (key, value) in &self.outcome.final_values {
            value.insert_into(&mut watch, &format!("final_{}", key));
        }
        watch.insert("conflicts".to_string(), json!(self.outcome.conflicts));
        watch.insert(
            "batch_outcome".to_string(),
            Value::String(self.outcome.batch_outcome.as_str().to_string()),
        );

        json!({
            "foo_initial_value": self.foo_initial_value.to_json(),
            "watch_transaction": Value::Object(watch),
        })
    }
}

pub const SYNTAX_FAULT_SUMMARY: &str = "This demonstrates Case 1: If any command has a syntax error, \
     the entire transaction is aborted and no commands are executed.";

pub const LOGIC_FAULT_SUMMARY: &str = "This demonstrates Case 2: If a command has a logical error during execution, \
     other commands in the transaction still execute successfully.";

/// Batch with a malformed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxFaultReport {
    pub transaction_error: bool,
    pub error_message: Option<String>,
    pub results: Vec<String>,
    pub incr_result_error: bool,
    pub outcome: TransactionOutcome,
}

impl SyntaxFaultReport {
    pub fn to_response(&self) -> Value {
        let mut map = Map::new();
        map.insert("transaction_error".to_string(), Value::Bool(self.transaction_error));
        map.insert("error_message".to_string(), json!(self.error_message));
        map.insert("results".to_string(), json!(self.results));
        for (key, value) in &self.outcome.final_values {
            map.insert(format!("{}_value", key), value.to_json());
            map.insert(format!("{}_error", key), Value::Bool(value.is_error()));
        }
        map.insert("incr_result_error".to_string(), Value::Bool(self.incr_result_error));
        map.insert(
            "batch_outcome".to_string(),
            Value::String(self.outcome.batch_outcome.as_str().to_string()),
        );
        map.insert("summary".to_string(), Value::String(SYNTAX_FAULT_SUMMARY.to_string()));
        Value::Object(map)
    }
}

/// Batch with a command that fails while executing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicFaultReport {
    pub transaction_error: bool,
    /// First per-command error, if any
    pub overall_error: Option<String>,
    pub results: Vec<String>,
    pub incr_result_error: bool,
    pub outcome: TransactionOutcome,
}

impl LogicFaultReport {
    pub fn to_response(&self) -> Value {
        let mut map = Map::new();
        map.insert("transaction_error".to_string(), Value::Bool(self.transaction_error));
        map.insert("overall_error".to_string(), json!(self.overall_error));
        map.insert("results".to_string(), json!(self.results));
        for (key, value) in &self.outcome.final_values {
            map.insert(format!("{}_value", key), value.to_json());
        }
        map.insert("incr_result_error".to_string(), Value::Bool(self.incr_result_error));
        map.insert(
            "batch_outcome".to_string(),
            Value::String(self.outcome.batch_outcome.as_str().to_string()),
        );
        map.insert("summary".to_string(), Value::String(LOGIC_FAULT_SUMMARY.to_string()));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_field_value_from_read() {
        assert_eq!(
            FieldValue::from_read(Ok(Some("x".into()))),
            FieldValue::Value("x".into())
        );
        assert_eq!(FieldValue::from_read(Ok(None)), FieldValue::Absent);
        let err = FieldValue::from_read(Err(StoreError::Unavailable("down".into())));
        assert!(err.is_error());
        assert_eq!(err.value(), None);
    }

    #[test]
    fn test_field_value_serializes() {
        assert_eq!(serde_json::to_value(FieldValue::Value("v".into())).unwrap(), json!("v"));
        assert_eq!(serde_json::to_value(FieldValue::Absent).unwrap(), Value::Null);
        assert_eq!(
            serde_json::to_value(FieldValue::Error("boom".into())).unwrap(),
            json!({"error": "boom"})
        );
    }

    #[test]
    fn test_watched_update_response_on_conflict() {
        let mut outcome = TransactionOutcome::new(BatchOutcome::NotSubmitted);
        outcome.final_values.insert("a".into(), FieldValue::Value("abc".into()));
        outcome.final_values.insert("b".into(), FieldValue::Absent);
        outcome.conflicts.push("a".into());

        let report = WatchedUpdateReport {
            foo_initial_value: FieldValue::Value("bar".into()),
            key: "a".into(),
            initial_value: None,
            mutator: Some(MutatorReport::Wrote(Some("abc".into()))),
            transaction_error: Some("transaction failed: watched key(s) changed: a".into()),
            outcome,
        };
        assert!(!report.committed());

        let body = report.to_response();
        assert_eq!(body["foo_initial_value"], "bar");
        let watch = &body["watch_transaction"];
        assert_eq!(watch["initial_value"], Value::Null);
        assert_eq!(watch["goroutine_set_value"], "abc");
        assert_eq!(watch["final_a_value"], "abc");
        assert_eq!(watch["final_b_value"], Value::Null);
        assert!(watch["transaction_error"].as_str().unwrap().contains("watched key"));
        assert_eq!(watch["watch_error"], watch["transaction_error"]);
        assert_eq!(watch["conflicts"], json!(["a"]));
    }

    #[test]
    fn test_failed_read_reported_as_error_field() {
        let mut outcome = TransactionOutcome::new(BatchOutcome::FullyExecuted);
        outcome.final_values.insert("a".into(), FieldValue::Error("timeout".into()));
        let report = WatchedUpdateReport {
            foo_initial_value: FieldValue::Value("bar".into()),
            key: "a".into(),
            initial_value: None,
            mutator: None,
            transaction_error: None,
            outcome,
        };
        let watch = &report.to_response()["watch_transaction"];
        assert_eq!(watch["final_a_error"], "timeout");
        assert!(watch.get("final_a_value").is_none());
        assert!(watch.get("goroutine_set_value").is_none());
        assert!(watch.get("transaction_error").is_none());
    }

    #[test]
    fn test_logic_fault_response() {
        let mut outcome = TransactionOutcome::new(BatchOutcome::PartiallyExecuted);
        outcome.final_values.insert("counter".into(), FieldValue::Value("hello".into()));
        outcome.final_values.insert("key1".into(), FieldValue::Value("value1".into()));
        let report = LogicFaultReport {
            transaction_error: false,
            overall_error: Some("ERR value is not an integer or out of range".into()),
            results: vec!["incr counter: ERR value is not an integer or out of range".into()],
            incr_result_error: true,
            outcome,
        };
        let body = report.to_response();
        assert_eq!(body["counter_value"], "hello");
        assert_eq!(body["key1_value"], "value1");
        assert_eq!(body["incr_result_error"], true);
        assert_eq!(body["batch_outcome"], "partially_executed");
        assert_eq!(body["summary"], LOGIC_FAULT_SUMMARY);
    }
}
