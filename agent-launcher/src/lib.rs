//! Agent Launcher - Keeps a single agent workload alive, directly or in a container
//!
//! The [`Supervisor`] launches one workload, waits until its HTTP health endpoint
//! reports ready, and in containerized mode keeps watching it, restarting the
//! container when the engine reports it unhealthy.
//!
//! ## Execution modes
//!
//! - **Containerized** - build an image, run it with the data directory and env
//!   file mounted, monitor and restart automatically
//! - **Direct** - call a [`Workload`] entry point in-process or as a child process;
//!   no monitoring, logs, or exec
//!
//! ## Configuration
//!
//! [`LauncherConfig::load`] layers built-in defaults, `agent-launcher.toml`, the
//! file named by `AGENT_LAUNCHER_CONFIG`, and `AGENT_LAUNCHER_*` environment
//! variables (`__` separates nested keys).

pub mod config;
pub mod error;
pub mod health;
pub mod restart;
pub mod runtime;
pub mod sandbox;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use config::LauncherConfig;
pub use error::{Result, RuntimeError, SupervisorError};
pub use health::{HealthProbe, ProbeOutcome};
pub use runtime::{CliRuntime, ContainerStatus, HealthStatus, RuntimeClient};
pub use sandbox::{SandboxConfig, SandboxManager};
pub use supervisor::{
    DIRECT_LOGS_UNAVAILABLE, ExecutionMode, LaunchOptions, ProcessWorkload, Supervisor,
    SupervisorState, Workload,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
