//! CLI-specific error types
//!
//! Errors raised by the CLI itself (configuration, fleet file, stdout).
//! Operation failures are reported in the response envelope instead.

use std::fmt;
use std::io;

use crate::errors::AdminError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (files, stdout)
    IoError,
    /// Configuration file already exists
    AlreadyInitialized,
    /// Fleet file unreadable or corrupt
    FleetError,
    /// Command-line argument that the engine rejected
    InvalidArgument,
    /// The operation ran and failed
    OperationFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "GRADMIN_CLI_CONFIG_ERROR",
            Self::IoError => "GRADMIN_CLI_IO_ERROR",
            Self::AlreadyInitialized => "GRADMIN_CLI_ALREADY_INITIALIZED",
            Self::FleetError => "GRADMIN_CLI_FLEET_ERROR",
            Self::InvalidArgument => "GRADMIN_CLI_INVALID_ARGUMENT",
            Self::OperationFailed => "GRADMIN_CLI_OPERATION_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn already_initialized(path: impl fmt::Display) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            format!("Configuration file {} already exists", path),
        )
    }

    pub fn fleet_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::FleetError, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidArgument, msg)
    }

    /// The operation failed; its error was already written to stdout.
    pub fn operation_failed(error: &AdminError) -> Self {
        Self::new(CliErrorCode::OperationFailed, error.to_string())
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let e = CliError::config_error("poll_interval_ms must be > 0");
        assert_eq!(e.to_string(), "GRADMIN_CLI_CONFIG_ERROR: poll_interval_ms must be > 0");
        assert_eq!(e.code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_operation_failed_keeps_engine_message() {
        let e = CliError::operation_failed(&AdminError::argument("Invalid options for status: verbose"));
        assert_eq!(e.code_str(), "GRADMIN_CLI_OPERATION_FAILED");
        assert!(e.message().contains("ArgumentError"));
    }
}
