//! Observable events
//!
//! Every line the coordinator, store client and server emit is named by one
//! of these.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    ConfigLoaded,
    ServerStart,
    ServerShutdown,

    // Store
    StoreUnavailable,

    // Watch sessions
    WatchBegin,
    WatchConflict,
    WatchCommit,
    WatchAbort,

    // Batches
    BatchExecuted,
    BatchAborted,
    CommandFault,

    // Background writer
    MutatorWrite,
    MutatorFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::ServerStart => "SERVER_START",
            Event::ServerShutdown => "SERVER_SHUTDOWN",
            Event::StoreUnavailable => "STORE_UNAVAILABLE",
            Event::WatchBegin => "TXN_WATCH_BEGIN",
            Event::WatchConflict => "TXN_WATCH_CONFLICT",
            Event::WatchCommit => "TXN_COMMIT",
            Event::WatchAbort => "TXN_ABORT",
            Event::BatchExecuted => "BATCH_EXECUTED",
            Event::BatchAborted => "BATCH_ABORTED",
            Event::CommandFault => "COMMAND_FAULT",
            Event::MutatorWrite => "MUTATOR_WRITE",
            Event::MutatorFailed => "MUTATOR_FAILED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::CommandFault => Severity::Trace,
            Event::WatchConflict | Event::WatchAbort | Event::BatchAborted => Severity::Warn,
            Event::StoreUnavailable | Event::MutatorFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        let events = [
            Event::ConfigLoaded,
            Event::ServerStart,
            Event::ServerShutdown,
            Event::StoreUnavailable,
            Event::WatchBegin,
            Event::WatchConflict,
            Event::WatchCommit,
            Event::WatchAbort,
            Event::BatchExecuted,
            Event::BatchAborted,
            Event::CommandFault,
            Event::MutatorWrite,
            Event::MutatorFailed,
        ];
        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'), "{}", s);
        }
    }

    #[test]
    fn test_conflicts_are_warnings_not_errors() {
        assert_eq!(Event::WatchConflict.severity(), Severity::Warn);
        assert_eq!(Event::StoreUnavailable.severity(), Severity::Error);
    }
}
