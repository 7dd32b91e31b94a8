//! Error types for launcher operations

use std::time::Duration;
use thiserror::Error;

/// Result type for launcher operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for the supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Container runtime is not available and could not be installed")]
    RuntimeUnavailable,

    #[error("Failed to build image {image}")]
    BuildFailed { image: String },

    #[error("Failed to start container {container}")]
    StartFailed { container: String },

    #[error("Failed to stop container {container}")]
    StopFailed { container: String },

    #[error("Workload did not become ready after {attempts} attempts")]
    ReadinessTimeout { attempts: u32 },

    #[error("Restart of {container} failed: {reason}")]
    RestartFailed { container: String, reason: String },

    #[error("{operation} is not supported in direct mode")]
    UnsupportedOperation { operation: &'static str },

    #[error("Cannot {action} while supervisor is {state}")]
    InvalidState {
        action: &'static str,
        state: crate::SupervisorState,
    },

    #[error("Supervisor has not been initialized")]
    NotInitialized,

    #[error("Direct mode requires a workload entry point")]
    MissingWorkload,

    #[error("Workload error: {0}")]
    Workload(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures reported by a [`RuntimeClient`](crate::RuntimeClient).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to parse runtime output: {0}")]
    Parse(String),
}
