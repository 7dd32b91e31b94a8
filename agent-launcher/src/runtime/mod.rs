//! Container engine boundary
//!
//! [`RuntimeClient`] is the seam between the launcher and whatever engine
//! actually builds and runs images. Every call is discrete and carries no
//! hidden state, so retrying one is always safe.

mod cli;

pub use cli::CliRuntime;

use crate::error::RuntimeError;
use crate::sandbox::SandboxConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Result type for engine calls
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Client for an external container engine
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Whether the engine is installed and answering
    async fn is_available(&self) -> bool;

    /// Best-effort engine bootstrap
    async fn install(&self) -> bool;

    /// Build `image_name` from `build_context`; `Ok(false)` on a failed build
    async fn build(&self, image_name: &str, build_context: &Path) -> RuntimeResult<bool>;

    /// Run a detached container, returning its id
    async fn run(&self, config: &SandboxConfig) -> RuntimeResult<String>;

    /// Stop and remove a container; `Ok(false)` when none existed
    async fn stop(&self, container_name: &str, grace: Duration) -> RuntimeResult<bool>;

    /// Query the engine for the container's current state
    async fn inspect(&self, container_name: &str) -> RuntimeResult<ContainerStatus>;

    /// Last `tail_lines` lines of container output
    async fn logs(&self, container_name: &str, tail_lines: usize) -> RuntimeResult<String>;

    /// Run a shell command inside the container, returning stdout
    async fn exec(&self, container_name: &str, command: &str) -> RuntimeResult<String>;
}

/// Health of the supervised workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Workload is healthy and responding
    Healthy,
    /// Workload is unhealthy (failed checks, exited)
    Unhealthy,
    /// Health cannot be determined
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Point-in-time view of the workload, recomputed on every query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    /// Whether the engine (or, in direct mode, the host) can run the workload
    pub is_installed: bool,
    /// Whether the workload is running
    pub is_running: bool,
    /// Derived health
    pub health: HealthStatus,
    /// Engine container id, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Why the status could not be fully determined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the query was made
    pub checked_at: DateTime<Utc>,
}

impl ContainerStatus {
    /// Status for a workload that is not present at all
    pub fn absent(is_installed: bool) -> Self {
        Self {
            is_installed,
            is_running: false,
            health: HealthStatus::Unknown,
            container_id: None,
            error: None,
            checked_at: Utc::now(),
        }
    }

    /// Attach a diagnostic error message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
