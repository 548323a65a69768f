//! Error taxonomy for provisioning operations.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the provisioning primitives.
///
/// Stage code wraps these in `anyhow::Error` with context; the orchestrator
/// decides whether a failure aborts the run based on the stage's policy.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Configuration input was missing or invalid and could not be recovered
    /// by prompting.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// The host OS could not be identified or is not supported.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A readiness check did not succeed within its attempt budget.
    #[error("Timed out waiting for {what} after {attempts} attempts ({interval:?} interval)")]
    Timeout {
        what: String,
        attempts: u32,
        interval: Duration,
    },

    /// An external command exited unsuccessfully or could not be spawned.
    #[error("Command `{command}` failed{}: {stderr}", exit_suffix(.code))]
    CommandExecution {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map_or_else(|| " (terminated by signal)".to_string(), |c| format!(" (exit {c})"))
}

impl ProvisionError {
    /// Build a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for provisioning primitives.
pub type Result<T> = std::result::Result<T, ProvisionError>;
