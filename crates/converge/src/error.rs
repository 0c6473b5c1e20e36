//! Error types for the deploy engine.
//!
//! Errors fall into two groups. Configuration errors and deploy aborts reach
//! the caller and stop the run. Connection and command errors are scoped to
//! one host: the executor catches them at the unit boundary and records them
//! as operation outcomes instead of propagating them.

use thiserror::Error;

/// Errors that can occur while building or executing a deploy.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad settings, unknown keys or connectors, unmet version/package requirements
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration
        message: String,
    },

    /// A host could not be reached or the transport broke
    #[error("connection error on {host}: {message}")]
    Connection {
        /// Name of the host whose connection failed
        host: String,
        /// Transport error details
        message: String,
    },

    /// A dispatched command exited non-zero (or timed out)
    #[error("command failed on {host} (exit {exit_code}): {command}")]
    Command {
        /// Name of the host the command ran on
        host: String,
        /// The command as it was issued (before privilege wrapping)
        command: String,
        /// Exit status, -1 when the command was killed
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// Too many hosts failed, the remaining operations were skipped
    #[error(
        "deploy aborted after {operation}: {failed} of {attempted} hosts failed{}",
        .threshold.map(|t| format!(" (fail percent {t})")).unwrap_or_default()
    )]
    DeployAborted {
        /// Display name of the operation after which the run stopped
        operation: String,
        /// Number of failed hosts
        failed: usize,
        /// Number of hosts the run started with
        attempted: usize,
        /// Configured fail percent, if any
        threshold: Option<u8>,
    },

    /// An operation outcome was queried before the operation ran
    #[error("operation {name} has not been executed yet")]
    OperationNotExecuted {
        /// Display name of the operation
        name: String,
    },

    /// Hosts declared operations in conflicting relative orders
    #[error("cannot order operations: {message}")]
    OperationOrder {
        /// Which operations form the cycle
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for a connection error on `host`.
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the host itself is unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Fill in the host name on host-scoped errors raised below the host layer.
    pub fn on_host(self, name: &str) -> Self {
        match self {
            Self::Connection { host, message } if host.is_empty() => Self::Connection {
                host: name.to_string(),
                message,
            },
            Self::Command {
                host,
                command,
                exit_code,
                stderr,
            } if host.is_empty() => Self::Command {
                host: name.to_string(),
                command,
                exit_code,
                stderr,
            },
            other => other,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_classification() {
        assert!(!Error::config("bad").is_connection());
        assert!(Error::connection("web1", "refused").is_connection());
    }

    #[test]
    fn test_on_host_fills_missing_name() {
        let err = Error::connection("", "refused").on_host("db1");
        assert_eq!(err.to_string(), "connection error on db1: refused");

        let err = Error::connection("web1", "refused").on_host("db1");
        assert_eq!(err.to_string(), "connection error on web1: refused");
    }

    #[test]
    fn test_abort_message_includes_threshold() {
        let err = Error::DeployAborted {
            operation: "Install nginx".into(),
            failed: 2,
            attempted: 3,
            threshold: Some(50),
        };
        assert_eq!(
            err.to_string(),
            "deploy aborted after Install nginx: 2 of 3 hosts failed (fail percent 50)"
        );
    }
}
