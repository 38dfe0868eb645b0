//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::txn::TxnError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdout, runtime)
    IoError,
    /// Config file already exists
    AlreadyInitialized,
    /// Store could not be reached
    StoreUnavailable,
    /// Server failed to start or stopped with an error
    BootFailed,
    /// Scenario ended with an error
    ScenarioFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "KVTXN_CLI_CONFIG_ERROR",
            Self::IoError => "KVTXN_CLI_IO_ERROR",
            Self::AlreadyInitialized => "KVTXN_CLI_ALREADY_INITIALIZED",
            Self::StoreUnavailable => "KVTXN_CLI_STORE_UNAVAILABLE",
            Self::BootFailed => "KVTXN_CLI_BOOT_FAILED",
            Self::ScenarioFailed => "KVTXN_CLI_SCENARIO_FAILED",
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
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Boot failed
    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
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

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::AlreadyExists(_) => Self::new(CliErrorCode::AlreadyInitialized, e.to_string()),
            other => Self::config_error(other.to_string()),
        }
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::new(CliErrorCode::StoreUnavailable, e.to_string())
    }
}

impl From<TxnError> for CliError {
    fn from(e: TxnError) -> Self {
        match e {
            TxnError::StoreUnavailable(store) => store.into(),
            other => Self::new(CliErrorCode::ScenarioFailed, other.to_string()),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = CliError::config_error("bad port");
        assert_eq!(err.to_string(), "KVTXN_CLI_CONFIG_ERROR: bad port");
    }

    #[test]
    fn test_conversions() {
        let err: CliError = ConfigError::AlreadyExists("kvtxn.json".into()).into();
        assert_eq!(err.code(), &CliErrorCode::AlreadyInitialized);

        let err: CliError = TxnError::StoreUnavailable(StoreError::Timeout(3000)).into();
        assert_eq!(err.code_str(), "KVTXN_CLI_STORE_UNAVAILABLE");

        let err: CliError = TxnError::EmptyWatchSet.into();
        assert_eq!(err.code(), &CliErrorCode::ScenarioFailed);
    }
}
