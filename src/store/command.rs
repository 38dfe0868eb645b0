//! Store commands, replies and the two fault classes of batched execution.
//!
//! A `ValidationFault` is found before anything runs and discards the whole
//! batch. An `ExecutionFault` belongs to a single command that ran and failed;
//! its siblings are unaffected.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operations the coordinator may queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Get,
    Set,
    Del,
    Incr,
    LRange,
}

impl Operation {
    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Set => "SET",
            Operation::Del => "DEL",
            Operation::Incr => "INCR",
            Operation::LRange => "LRANGE",
        }
    }

    /// Lowercase name, as it appears in store error messages
    pub fn command_name(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Del => "del",
            Operation::Incr => "incr",
            Operation::LRange => "lrange",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single store command: an operation and its ordered arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub operation: Operation,
    pub args: Vec<String>,
}

impl Command {
    /// Create a command from raw arguments. No validation happens here.
    pub fn new(operation: Operation, args: Vec<String>) -> Self {
        Self { operation, args }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::new(Operation::Get, vec![key.into()])
    }

    /// SET with an optional expiry, encoded as `EX <secs>` for whole seconds
    /// and `PX <millis>` otherwise.
    pub fn set(key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) -> Self {
        let mut args = vec![key.into(), value.into()];
        // Under a millisecond means no expiry
        if let Some(ttl) = ttl.filter(|ttl| ttl.as_millis() > 0) {
            if ttl.subsec_millis() == 0 {
                args.push("EX".to_string());
                args.push(ttl.as_secs().to_string());
            } else {
                args.push("PX".to_string());
                args.push(ttl.as_millis().to_string());
            }
        }
        Self::new(Operation::Set, args)
    }

    pub fn del<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Operation::Del, keys.into_iter().map(Into::into).collect())
    }

    pub fn incr(key: impl Into<String>) -> Self {
        Self::new(Operation::Incr, vec![key.into()])
    }

    pub fn lrange(key: impl Into<String>, start: i64, stop: i64) -> Self {
        Self::new(
            Operation::LRange,
            vec![key.into(), start.to_string(), stop.to_string()],
        )
    }

    /// Expiry requested by a well-formed SET
    pub fn ttl(&self) -> Option<Duration> {
        if self.operation != Operation::Set || self.args.len() != 4 {
            return None;
        }
        let amount: u64 = self.args[3].parse().ok()?;
        match self.args[2].to_ascii_uppercase().as_str() {
            "EX" => Some(Duration::from_secs(amount)),
            "PX" => Some(Duration::from_millis(amount)),
            _ => None,
        }
    }

    /// Check arity and argument shape.
    ///
    /// Returns the store-style error string on failure.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.args.len();
        let arity_ok = match self.operation {
            Operation::Get | Operation::Incr => n == 1,
            Operation::Del => n >= 1,
            Operation::Set => n == 2 || n == 4,
            Operation::LRange => n == 3,
        };
        if !arity_ok {
            return Err(format!(
                "ERR wrong number of arguments for '{}' command",
                self.operation.command_name()
            ));
        }

        match self.operation {
            Operation::Set if n == 4 => {
                let option = self.args[2].to_ascii_uppercase();
                if option != "EX" && option != "PX" {
                    return Err("ERR syntax error".to_string());
                }
                let amount = self.args[3]
                    .parse::<i64>()
                    .map_err(|_| "ERR value is not an integer or out of range".to_string())?;
                // Expiry must be positive and fit in i64 milliseconds
                let millis = if option == "EX" {
                    amount.checked_mul(1000)
                } else {
                    Some(amount)
                };
                match millis {
                    Some(ms) if ms > 0 => Ok(()),
                    _ => Err("ERR invalid expire time in 'set' command".to_string()),
                }
            }
            Operation::LRange => {
                if self.args[1].parse::<i64>().is_err() || self.args[2].parse::<i64>().is_err() {
                    return Err("ERR value is not an integer or out of range".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Wire form: operation name followed by arguments
    pub fn to_wire(&self) -> Vec<&str> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.operation.as_str());
        parts.extend(self.args.iter().map(String::as_str));
        parts
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation.command_name())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A successful store reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    /// Key absent
    Nil,
    /// Status reply (`OK`)
    Ok,
    Integer(i64),
    Bulk(String),
    List(Vec<String>),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "(nil)"),
            Reply::Ok => write!(f, "OK"),
            Reply::Integer(n) => write!(f, "{}", n),
            Reply::Bulk(s) => write!(f, "{}", s),
            Reply::List(items) => write!(f, "[{}]", items.join(" ")),
        }
    }
}

/// Classification of a per-command failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Numeric operation on a value that is not an integer
    NotInteger,
    /// Operation against a key holding the wrong kind of value
    WrongType,
    Other,
}

/// A command that executed and failed. Siblings in the same batch still run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutionFault {
    pub kind: FaultKind,
    pub message: String,
}

impl ExecutionFault {
    pub fn not_integer() -> Self {
        Self {
            kind: FaultKind::NotInteger,
            message: "ERR value is not an integer or out of range".to_string(),
        }
    }

    pub fn wrong_type() -> Self {
        Self {
            kind: FaultKind::WrongType,
            message: "WRONGTYPE Operation against a key holding the wrong kind of value"
                .to_string(),
        }
    }

    /// Classify a raw store error line
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.starts_with("WRONGTYPE") {
            FaultKind::WrongType
        } else if message.contains("not an integer") {
            FaultKind::NotInteger
        } else {
            FaultKind::Other
        };
        Self { kind, message }
    }
}

/// A batch rejected before any command ran
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("EXECABORT Transaction discarded because of previous errors: command {index} ({operation}): {reason}")]
pub struct ValidationFault {
    /// Position of the first offending command in the batch
    pub index: usize,
    pub operation: Operation,
    pub reason: String,
}

/// Validate every command, returning the first fault
pub fn validate_all(commands: &[Command]) -> Result<(), ValidationFault> {
    for (index, command) in commands.iter().enumerate() {
        command.validate().map_err(|reason| ValidationFault {
            index,
            operation: command.operation,
            reason,
        })?;
    }
    Ok(())
}

/// Per-command result inside an executed batch
pub type CommandReply = Result<Reply, ExecutionFault>;

/// What the store did with a submitted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecReply {
    /// Every command ran; one result per command, in order
    Executed(Vec<CommandReply>),
    /// The store refused the batch before running anything
    Aborted(ValidationFault),
    /// A watched key changed; nothing ran
    Conflict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_encodes_ttl() {
        let cmd = Command::set("k", "v", Some(Duration::from_secs(3600)));
        assert_eq!(cmd.args, vec!["k", "v", "EX", "3600"]);
        assert_eq!(cmd.ttl(), Some(Duration::from_secs(3600)));

        let cmd = Command::set("k", "v", Some(Duration::from_millis(1500)));
        assert_eq!(cmd.args, vec!["k", "v", "PX", "1500"]);

        let cmd = Command::set("k", "v", None);
        assert_eq!(cmd.args.len(), 2);
        assert_eq!(cmd.ttl(), None);
    }

    #[test]
    fn test_sub_millisecond_ttl_means_no_expiry() {
        let cmd = Command::set("k", "v", Some(Duration::ZERO));
        assert_eq!(cmd.args, vec!["k", "v"]);
        assert!(cmd.validate().is_ok());

        let cmd = Command::set("k", "v", Some(Duration::from_micros(300)));
        assert_eq!(cmd.args, vec!["k", "v"]);
    }

    #[test]
    fn test_expiry_overflow_is_invalid() {
        let set = |unit: &str, amount: &str| {
            Command::new(
                Operation::Set,
                vec!["k".into(), "v".into(), unit.into(), amount.into()],
            )
        };
        let max = i64::MAX.to_string();
        assert_eq!(
            set("EX", &max).validate().unwrap_err(),
            "ERR invalid expire time in 'set' command"
        );
        assert!(set("EX", &(i64::MAX / 1000).to_string()).validate().is_ok());
        assert!(set("PX", &max).validate().is_ok());
        assert!(set("px", "-5").validate().unwrap_err().contains("invalid expire"));
    }

    #[test]
    fn test_incr_with_extra_argument_is_invalid() {
        let cmd = Command::new(
            Operation::Incr,
            vec!["key3".to_string(), "not-a-number".to_string()],
        );
        let err = cmd.validate().unwrap_err();
        assert_eq!(err, "ERR wrong number of arguments for 'incr' command");
    }

    #[test]
    fn test_well_formed_commands_validate() {
        assert!(Command::get("a").validate().is_ok());
        assert!(Command::incr("a").validate().is_ok());
        assert!(Command::del(["a", "b"]).validate().is_ok());
        assert!(Command::lrange("a", 0, -1).validate().is_ok());
        assert!(Command::set("a", "1", Some(Duration::from_secs(1))).validate().is_ok());
    }

    #[test]
    fn test_shape_errors() {
        assert!(Command::new(Operation::Del, vec![]).validate().is_err());
        let bad_option = Command::new(
            Operation::Set,
            vec!["k".into(), "v".into(), "XX".into(), "10".into()],
        );
        assert_eq!(bad_option.validate().unwrap_err(), "ERR syntax error");
        let zero_ttl = Command::new(
            Operation::Set,
            vec!["k".into(), "v".into(), "EX".into(), "0".into()],
        );
        assert!(zero_ttl.validate().unwrap_err().contains("invalid expire"));
        let bad_range = Command::new(
            Operation::LRange,
            vec!["k".into(), "zero".into(), "-1".into()],
        );
        assert!(bad_range.validate().unwrap_err().contains("not an integer"));
    }

    #[test]
    fn test_validate_all_reports_first_offender() {
        let commands = vec![
            Command::set("key1", "value1", None),
            Command::new(Operation::Incr, vec!["key3".into(), "x".into()]),
            Command::new(Operation::Get, vec![]),
        ];
        let fault = validate_all(&commands).unwrap_err();
        assert_eq!(fault.index, 1);
        assert_eq!(fault.operation, Operation::Incr);
        assert!(fault.to_string().starts_with("EXECABORT"));
    }

    #[test]
    fn test_fault_classification() {
        assert_eq!(
            ExecutionFault::from_message("WRONGTYPE Operation against a key").kind,
            FaultKind::WrongType
        );
        assert_eq!(
            ExecutionFault::from_message("ERR value is not an integer or out of range").kind,
            FaultKind::NotInteger
        );
        assert_eq!(ExecutionFault::from_message("ERR boom").kind, FaultKind::Other);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Command::lrange("a", 0, -1).to_string(), "lrange a 0 -1");
        assert_eq!(Reply::List(vec!["x".into(), "y".into()]).to_string(), "[x y]");
        assert_eq!(Reply::Nil.to_string(), "(nil)");
        assert_eq!(Command::incr("c").to_wire(), vec!["INCR", "c"]);
    }
}
