//! Scoped begin/complete logging for coordinator operations
//!
//! - `{name}_BEGIN` on creation
//! - `{name}_COMPLETE` with `duration_ms` on `complete`
//! - `{name}_FAILED` on `fail`
//! - `{name}_INCOMPLETE` if dropped first (e.g. the request was cancelled)

use std::time::Instant;

use super::logger::Logger;

pub struct ObservationScope {
    name: &'static str,
    fields: Vec<(&'static str, String)>,
    started: Instant,
    finished: bool,
}

impl ObservationScope {
    pub fn new(name: &'static str) -> Self {
        Self::with_fields(name, Vec::new())
    }

    /// Scope whose fields are repeated on every line it logs
    pub fn with_fields(name: &'static str, fields: Vec<(&'static str, String)>) -> Self {
        let scope = Self {
            name,
            fields,
            started: Instant::now(),
            finished: false,
        };
        scope.emit("BEGIN", &[]);
        scope
    }

    fn emit(&self, suffix: &str, extra: &[(&str, &str)]) {
        let event = format!("{}_{}", self.name, suffix);
        let mut all: Vec<(&str, &str)> = self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all.extend_from_slice(extra);
        match suffix {
            "FAILED" => Logger::error(&event, &all),
            "INCOMPLETE" => Logger::warn(&event, &all),
            _ => Logger::info(&event, &all),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    pub fn complete(mut self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(&mut self, extra: &[(&str, &str)]) {
        self.finished = true;
        let elapsed = self.elapsed_ms().to_string();
        let mut fields = vec![("duration_ms", elapsed.as_str())];
        fields.extend_from_slice(extra);
        self.emit("COMPLETE", &fields);
    }

    pub fn fail(mut self, reason: &str) {
        self.finished = true;
        self.emit("FAILED", &[("reason", reason)]);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.finished {
            self.emit("INCOMPLETE", &[("reason", "scope dropped without completion")]);
        }
    }
}
