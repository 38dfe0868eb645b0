//! Observability for the coordinator
//!
//! - Structured JSON logging (`Logger`)
//! - Typed lifecycle events (`Event`)
//! - Atomic transaction counters (`MetricsRegistry`)
//! - Begin/complete scopes for whole operations (`ObservationScope`)
//!
//! Nothing here feeds back into transaction behavior, and a logging failure
//! never fails an operation.
//!
//! ```ignore
//! use kvtxn::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::WatchConflict, &[("keys", "a")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log an event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its own severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
