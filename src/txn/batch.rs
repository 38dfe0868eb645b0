//! Command batches
//!
//! A batch is an ordered queue of commands submitted to the store as one
//! atomic request. It keeps two levels of outcome apart:
//!
//! - batch level: was the batch rejected before anything ran?
//! - command level: did this particular command produce a value or a fault?
//!
//! A per-command fault never turns into a batch-level error.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::errors::{TxnError, TxnResult};
use crate::observability::{log_event_with_fields, Event};
use crate::store::{
    validate_all, Command, ExecReply, ExecutionFault, KeyValueStore, Operation, Reply, StoreError,
    ValidationFault,
};

/// Per-command result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CommandResult {
    /// Queued, batch not submitted yet
    Pending,
    /// The batch was aborted or discarded; the command never ran
    NotExecuted,
    Value(Reply),
    Error(ExecutionFault),
}

impl CommandResult {
    pub fn is_error(&self) -> bool {
        matches!(self, CommandResult::Error(_))
    }

    pub fn value(&self) -> Option<&Reply> {
        match self {
            CommandResult::Value(reply) => Some(reply),
            _ => None,
        }
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Pending => write!(f, "pending"),
            CommandResult::NotExecuted => write!(f, "not executed"),
            CommandResult::Value(reply) => write!(f, "{}", reply),
            CommandResult::Error(fault) => write!(f, "{}", fault),
        }
    }
}

/// A command waiting in, or already run by, a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedCommand {
    pub command: Command,
    pub result: CommandResult,
}

impl QueuedCommand {
    pub fn operation(&self) -> Operation {
        self.command.operation
    }

    pub fn args(&self) -> &[String] {
        &self.command.args
    }
}

impl fmt::Display for QueuedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.command, self.result)
    }
}

/// Batch-level outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    NotSubmitted,
    AbortedPreExecution,
    PartiallyExecuted,
    FullyExecuted,
}

impl BatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::NotSubmitted => "not_submitted",
            BatchOutcome::AbortedPreExecution => "aborted_pre_execution",
            BatchOutcome::PartiallyExecuted => "partially_executed",
            BatchOutcome::FullyExecuted => "fully_executed",
        }
    }

    /// Whether the commands actually ran
    pub fn executed(&self) -> bool {
        matches!(
            self,
            BatchOutcome::PartiallyExecuted | BatchOutcome::FullyExecuted
        )
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered batch of commands
#[derive(Debug, Clone)]
pub struct CommandBatch {
    commands: Vec<QueuedCommand>,
    outcome: BatchOutcome,
    validation_fault: Option<ValidationFault>,
}

impl Default for CommandBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBatch {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            outcome: BatchOutcome::NotSubmitted,
            validation_fault: None,
        }
    }

    /// Append a command with raw arguments; returns its index.
    ///
    /// Arguments are not checked until submission, so a malformed command can
    /// be queued like any other.
    pub fn enqueue(&mut self, operation: Operation, args: Vec<String>) -> usize {
        self.push(Command::new(operation, args))
    }

    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(QueuedCommand {
            command,
            result: CommandResult::Pending,
        });
        self.commands.len() - 1
    }

    pub fn get(&mut self, key: &str) -> usize {
        self.push(Command::get(key))
    }

    pub fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> usize {
        self.push(Command::set(key, value, ttl))
    }

    pub fn del(&mut self, keys: &[&str]) -> usize {
        self.push(Command::del(keys.iter().copied()))
    }

    pub fn incr(&mut self, key: &str) -> usize {
        self.push(Command::incr(key))
    }

    pub fn lrange(&mut self, key: &str, start: i64, stop: i64) -> usize {
        self.push(Command::lrange(key, start, stop))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[QueuedCommand] {
        &self.commands
    }

    pub fn command(&self, index: usize) -> Option<&QueuedCommand> {
        self.commands.get(index)
    }

    pub fn outcome(&self) -> BatchOutcome {
        self.outcome
    }

    /// The fault that aborted the batch, if it was aborted pre-execution
    pub fn validation_fault(&self) -> Option<&ValidationFault> {
        self.validation_fault.as_ref()
    }

    /// First per-command fault, in queue order
    pub fn first_error(&self) -> Option<&ExecutionFault> {
        self.commands.iter().find_map(|c| match &c.result {
            CommandResult::Error(fault) => Some(fault),
            _ => None,
        })
    }

    pub fn fault_count(&self) -> usize {
        self.commands.iter().filter(|c| c.result.is_error()).count()
    }

    /// `"<command>: <result>"` for every command, in order
    pub fn describe_results(&self) -> Vec<String> {
        self.commands.iter().map(ToString::to_string).collect()
    }

    /// Check every queued command before anything is sent
    pub fn validate(&self) -> Result<(), ValidationFault> {
        validate_all(&self.wire_commands())
    }

    pub(crate) fn wire_commands(&self) -> Vec<Command> {
        self.commands.iter().map(|c| c.command.clone()).collect()
    }

    pub(crate) fn ensure_unsubmitted(&self) -> TxnResult<()> {
        if self.outcome != BatchOutcome::NotSubmitted || self.validation_fault.is_some() {
            return Err(TxnError::BatchAlreadySubmitted);
        }
        if self.commands.iter().any(|c| c.result != CommandResult::Pending) {
            return Err(TxnError::BatchAlreadySubmitted);
        }
        Ok(())
    }

    /// Validate, then submit every command as one atomic request.
    ///
    /// A validation fault aborts the whole batch without contacting the
    /// store. Per-command faults are recorded on their commands only.
    pub async fn execute(&mut self, store: &dyn KeyValueStore) -> TxnResult<BatchOutcome> {
        self.ensure_unsubmitted()?;
        if let Err(fault) = self.validate() {
            self.abort_pre_execution(fault);
            return Ok(self.outcome);
        }
        let reply = store.execute(&self.wire_commands()).await?;
        self.apply_reply(reply)
    }

    /// Record the store's answer to a submission
    pub(crate) fn apply_reply(&mut self, reply: ExecReply) -> TxnResult<BatchOutcome> {
        match reply {
            ExecReply::Aborted(fault) => self.abort_pre_execution(fault),
            ExecReply::Conflict => self.discard(),
            ExecReply::Executed(replies) => {
                if replies.len() != self.commands.len() {
                    return Err(TxnError::StoreUnavailable(StoreError::Protocol(format!(
                        "{} replies for {} commands",
                        replies.len(),
                        self.commands.len()
                    ))));
                }
                for (queued, reply) in self.commands.iter_mut().zip(replies) {
                    queued.result = match reply {
                        Ok(value) => CommandResult::Value(value),
                        Err(fault) => {
                            log_event_with_fields(
                                Event::CommandFault,
                                &[
                                    ("command", &queued.command.to_string()),
                                    ("error", &fault.message),
                                ],
                            );
                            CommandResult::Error(fault)
                        }
                    };
                }
                let faults = self.fault_count();
                self.outcome = if faults > 0 {
                    BatchOutcome::PartiallyExecuted
                } else {
                    BatchOutcome::FullyExecuted
                };
                log_event_with_fields(
                    Event::BatchExecuted,
                    &[
                        ("commands", &self.commands.len().to_string()),
                        ("faults", &faults.to_string()),
                        ("outcome", self.outcome.as_str()),
                    ],
                );
            }
        }
        Ok(self.outcome)
    }

    pub(crate) fn abort_pre_execution(&mut self, fault: ValidationFault) {
        log_event_with_fields(
            Event::BatchAborted,
            &[
                ("index", &fault.index.to_string()),
                ("operation", fault.operation.as_str()),
                ("reason", &fault.reason),
            ],
        );
        for queued in &mut self.commands {
            queued.result = CommandResult::NotExecuted;
        }
        self.outcome = BatchOutcome::AbortedPreExecution;
        self.validation_fault = Some(fault);
    }

    /// Drop the batch unexecuted after a watch conflict. The outcome stays
    /// `NotSubmitted`.
    pub(crate) fn discard(&mut self) {
        for queued in &mut self.commands {
            queued.result = CommandResult::NotExecuted;
        }
    }
}
