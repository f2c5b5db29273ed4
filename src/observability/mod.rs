//! Observability
//!
//! - Structured JSON-lines logging with a process-wide minimum severity
//! - Typed lifecycle events
//! - Scope-based begin/complete logging around every operation
//!
//! Logs are diagnostics for operators. What an operation tells its caller
//! (warnings, notes, planned actions) goes to [`crate::context::Output`].

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::ObservationScope;

/// Log a lifecycle event at its own severity.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::ConfigLoaded, &[("path", "/tmp/gradmin.json")]);
        log_event(Event::RollbackStepFailed, &[]);
    }
}
