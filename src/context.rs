//! Engine context
//!
//! Everything an operation needs from its environment is passed in
//! explicitly through [`AdminContext`]: how to reach instances, who to ask
//! for confirmation, where user-facing messages go and the engine settings.
//! Operations name their target with a [`ClusterHandle`] or
//! [`ClusterSetHandle`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::console::{Console, NonInteractiveConsole};
use crate::errors::{AdminError, AdminResult};
use crate::gateway::{Connector, InstanceGateway, Probe, Rows, Statement};
use crate::observability::{log_event, Event};
use crate::topology::InstanceAddress;

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Fixed interval between polls of remote state.
    pub poll_interval: Duration,
    /// Poll budget when waiting for a member state transition.
    pub state_wait_attempts: u32,
    /// Worker threads used to probe members for status.
    pub status_workers: usize,
    /// Transaction sync timeout used when an operation gets none; `None` waits forever.
    pub default_sync_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            state_wait_attempts: 60,
            status_workers: 4,
            default_sync_timeout: None,
        }
    }
}

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageLevel {
    Info,
    Note,
    Warning,
    Error,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Note => "NOTE",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            MessageLevel::Info => f.write_str(&self.text),
            level => write!(f, "{}: {}", level.as_str(), self.text),
        }
    }
}

/// Messages an operation reports to its caller.
#[derive(Debug, Default)]
pub struct Output {
    messages: Mutex<Vec<Message>>,
}

impl Output {
    pub fn push(&self, level: MessageLevel, text: impl Into<String>) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Message {
                level,
                text: text.into(),
            });
    }

    pub fn info(&self, text: impl Into<String>) {
        self.push(MessageLevel::Info, text);
    }

    pub fn note(&self, text: impl Into<String>) {
        self.push(MessageLevel::Note, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.push(MessageLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.push(MessageLevel::Error, text);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the buffer.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rendered lines, `LEVEL: text` except for plain info.
    pub fn lines(&self) -> Vec<String> {
        self.messages().iter().map(|m| m.to_string()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.text.contains(needle))
    }

    pub fn has_level(&self, level: MessageLevel) -> bool {
        self.messages().iter().any(|m| m.level == level)
    }
}

/// Explicit environment of every operation.
pub struct AdminContext {
    connector: Arc<dyn Connector>,
    console: Arc<dyn Console>,
    output: Output,
    settings: EngineSettings,
}

impl AdminContext {
    pub fn new(connector: Arc<dyn Connector>, console: Arc<dyn Console>, settings: EngineSettings) -> Self {
        Self {
            connector,
            console,
            output: Output::default(),
            settings,
        }
    }

    /// Non-interactive context with default settings.
    pub fn non_interactive(connector: Arc<dyn Connector>) -> Self {
        Self::new(connector, Arc::new(NonInteractiveConsole), EngineSettings::default())
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    /// Open a session, classifying connection failures.
    pub fn connect(&self, address: &InstanceAddress) -> AdminResult<Arc<dyn InstanceGateway>> {
        self.connector
            .connect(address)
            .map_err(|e| AdminError::connectivity(address, e))
    }

    /// Run a read probe.
    pub fn query(&self, address: &InstanceAddress, probe: Probe) -> AdminResult<Rows> {
        self.execute(address, &Statement::Probe(probe))
    }

    /// Execute a statement right away, dry-run or not.
    pub fn execute(&self, address: &InstanceAddress, statement: &Statement) -> AdminResult<Rows> {
        let gateway = self.connect(address)?;
        let text = statement.to_string();
        log_event(
            Event::StatementExecuted,
            &[("instance", address.to_string().as_str()), ("statement", text.as_str())],
        );
        gateway
            .execute(statement)
            .map_err(|e| AdminError::connectivity(address, e))
    }

    /// Whether the instance currently answers.
    pub fn is_reachable(&self, address: &InstanceAddress) -> bool {
        self.connector
            .connect(address)
            .map(|g| g.is_reachable())
            .unwrap_or(false)
    }
}

/// Names a cluster and the instance used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    pub name: String,
    pub seed: InstanceAddress,
}

impl ClusterHandle {
    pub fn new(name: impl Into<String>, seed: InstanceAddress) -> Self {
        Self {
            name: name.into(),
            seed,
        }
    }
}

/// Names a ClusterSet through any instance of one of its clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSetHandle {
    pub seed: InstanceAddress,
}

impl ClusterSetHandle {
    pub fn new(seed: InstanceAddress) -> Self {
        Self { seed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SimFleet;

    #[test]
    fn test_output_rendering() {
        let output = Output::default();
        output.info("Adding instance...");
        output.warning("Instance is unreachable");
        output.note("dryRun enabled");
        assert_eq!(
            output.lines(),
            vec![
                "Adding instance...".to_string(),
                "WARNING: Instance is unreachable".to_string(),
                "NOTE: dryRun enabled".to_string(),
            ]
        );
        assert!(output.has_level(MessageLevel::Warning));
        assert_eq!(output.take().len(), 3);
        assert!(output.messages().is_empty());
    }

    #[test]
    fn test_connect_failure_is_classified() {
        let fleet = SimFleet::new();
        let ctx = AdminContext::non_interactive(Arc::new(fleet));
        let err = ctx
            .connect(&InstanceAddress::new("nowhere", 3306))
            .err()
            .unwrap();
        assert_eq!(err.transport_code(), Some(2005));
    }
}
