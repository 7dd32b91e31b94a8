//! The launcher: one supervisor per workload
//!
//! A [`Supervisor`] picks direct or containerized execution, drives the
//! startup sequence through readiness, and (containerized) keeps a health
//! monitor running that restarts unhealthy containers within a bounded budget.
//!
//! ```rust,no_run
//! use agent_launcher::{LaunchOptions, LauncherConfig, Supervisor};
//!
//! # async fn demo() -> agent_launcher::Result<()> {
//! let mut supervisor = Supervisor::new(LauncherConfig::load()?);
//! supervisor.initialize(LaunchOptions::containerized(7777)).await?;
//! supervisor.launch().await?;
//!
//! println!("{:?}", supervisor.get_status().await);
//! supervisor.stop().await?;
//! # Ok(())
//! # }
//! ```

mod monitor;
mod state;
mod workload;


pub use state::SupervisorState;
pub use workload::{ProcessWorkload, Workload};

use crate::config::LauncherConfig;
use crate::error::{Result, SupervisorError};
use crate::health::{HealthProbe, ProbeOutcome, poll_until_ready};
use crate::restart::RestartPolicy;
use crate::runtime::{CliRuntime, ContainerStatus, HealthStatus, RuntimeClient};
use crate::sandbox::{SandboxConfig, SandboxManager, VolumeMapping};
use chrono::Utc;
use monitor::{HealthMonitor, MonitorHandle};
use serde::{Deserialize, Serialize};
use state::StateCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Returned by [`Supervisor::get_logs`] in direct mode
pub const DIRECT_LOGS_UNAVAILABLE: &str = "Logs not available in direct mode";

/// Caller-supplied launch options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    /// Run inside a container instead of as a local process
    pub use_container: bool,
    /// Port the workload listens on (mapped 1:1 in containerized mode)
    pub port: u16,
    /// Host data directory; defaults to `sandbox.data_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<PathBuf>,
    /// Extra environment for the workload
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl LaunchOptions {
    pub fn containerized(port: u16) -> Self {
        Self {
            use_container: true,
            port,
            ..Default::default()
        }
    }

    pub fn direct(port: u16) -> Self {
        Self {
            use_container: false,
            port,
            ..Default::default()
        }
    }

    pub fn with_data_volume(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_volume = Some(path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Direct-mode workload plus the environment it is started with
pub struct DirectWorkload {
    workload: Arc<dyn Workload>,
    env: BTreeMap<String, String>,
}

/// How the workload is executed
pub enum ExecutionMode {
    Direct(DirectWorkload),
    Containerized(Arc<SandboxManager>),
}

/// Supervises exactly one workload instance
pub struct Supervisor {
    config: LauncherConfig,
    runtime: Arc<dyn RuntimeClient>,
    workload: Option<Arc<dyn Workload>>,
    state: Arc<StateCell>,
    mode: Option<ExecutionMode>,
    probe: Option<HealthProbe>,
    monitor: Option<MonitorHandle>,
    restarts: Arc<AtomicU32>,
}

impl Supervisor {
    /// Create a supervisor that drives the configured engine binary
    pub fn new(config: LauncherConfig) -> Self {
        let runtime = Arc::new(CliRuntime::new(config.runtime.clone()));
        Self::with_runtime(config, runtime)
    }

    /// Create a supervisor over an explicit runtime client
    pub fn with_runtime(config: LauncherConfig, runtime: Arc<dyn RuntimeClient>) -> Self {
        Self {
            config,
            runtime,
            workload: None,
            state: Arc::new(StateCell::new()),
            mode: None,
            probe: None,
            monitor: None,
            restarts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Entry point used in direct mode
    pub fn with_workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = Some(workload);
        self
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        self.state.get()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn mode(&self) -> Option<&ExecutionMode> {
        self.mode.as_ref()
    }

    /// Sandbox manager, when running containerized
    pub fn sandbox(&self) -> Option<&SandboxManager> {
        match &self.mode {
            Some(ExecutionMode::Containerized(manager)) => Some(manager),
            _ => None,
        }
    }

    /// Automatic restarts triggered by the health monitor so far
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Prepare the chosen execution mode. `Uninitialized → Initializing`.
    ///
    /// # Errors
    ///
    /// `RuntimeUnavailable` when containerized mode was requested and the engine
    /// is missing and cannot be installed; the supervisor is then `Failed`.
    pub async fn initialize(&mut self, options: LaunchOptions) -> Result<()> {
        self.state
            .transition(SupervisorState::Initializing, "initialize")?;

        match self.prepare(&options).await {
            Ok(mode) => {
                self.probe = Some(HealthProbe::new(&self.config.readiness, options.port)?);
                self.mode = Some(mode);
                info!(
                    port = options.port,
                    containerized = options.use_container,
                    "Supervisor initialized"
                );
                Ok(())
            }
            Err(e) => {
                error!("Supervisor initialization failed: {}", e);
                self.state.fail();
                Err(e)
            }
        }
    }

    async fn prepare(&self, options: &LaunchOptions) -> Result<ExecutionMode> {
        let mut env = options.environment.clone();
        env.insert(
            self.config.direct.port_env_var.clone(),
            options.port.to_string(),
        );

        if !options.use_container {
            let workload = self.workload.clone().ok_or(SupervisorError::MissingWorkload)?;
            return Ok(ExecutionMode::Direct(DirectWorkload { workload, env }));
        }

        let settings = &self.config.sandbox;
        let data_dir = options
            .data_volume
            .clone()
            .unwrap_or_else(|| settings.data_dir.clone());
        tokio::fs::create_dir_all(&data_dir).await?;
        ensure_file(&settings.env_file).await?;

        let mut sandbox = SandboxConfig::new(&settings.container_name, &settings.image_name)
            .with_build_context(&settings.build_context)
            .with_port(options.port, options.port)
            .with_volume(VolumeMapping::read_write(
                tokio::fs::canonicalize(&data_dir).await?,
                &settings.data_mount,
            ))
            .with_volume(VolumeMapping::read_only(
                tokio::fs::canonicalize(&settings.env_file).await?,
                &settings.env_mount,
            ));
        sandbox.environment = env;

        let manager = SandboxManager::new(sandbox, self.runtime.clone(), self.config.runtime.stop_grace);

        if !manager.check_runtime_available().await {
            warn!("Container runtime not available, attempting install");
            if !manager.install_runtime().await {
                return Err(SupervisorError::RuntimeUnavailable);
            }
        }

        Ok(ExecutionMode::Containerized(Arc::new(manager)))
    }

    /// Launch the workload. `Initializing | Stopped → Starting`.
    ///
    /// Containerized: build the image, then start the container; either failure
    /// is fatal and neither is retried. Direct: invoke the workload's start
    /// entry point with the listen port in its environment.
    pub async fn start(&mut self) -> Result<()> {
        self.state.transition(SupervisorState::Starting, "start")?;

        let result = match &self.mode {
            None => Err(SupervisorError::NotInitialized),
            Some(ExecutionMode::Containerized(manager)) => {
                if !manager.build_image().await {
                    Err(SupervisorError::BuildFailed {
                        image: manager.config().image_name.clone(),
                    })
                } else if manager.start_container().await.is_none() {
                    Err(SupervisorError::StartFailed {
                        container: manager.container_name().to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            Some(ExecutionMode::Direct(direct)) => direct.workload.start(&direct.env).await,
        };

        if let Err(e) = &result {
            error!("Failed to start workload: {}", e);
            self.state.fail();
        }
        result
    }

    /// Poll the health endpoint until ready. `Starting → WaitingForReady → Running`.
    ///
    /// Attempts are sequential and `interval` apart; exhausting `max_attempts`
    /// is fatal and reported as `ReadinessTimeout` with the attempt count.
    pub async fn wait_for_ready(&self, max_attempts: u32, interval: Duration) -> Result<()> {
        self.state
            .transition(SupervisorState::WaitingForReady, "wait for readiness")?;
        let probe = self.probe.as_ref().ok_or(SupervisorError::NotInitialized)?;

        info!(url = %probe.url(), max_attempts, ?interval, "Waiting for workload readiness");
        match poll_until_ready(probe, max_attempts, interval, None).await {
            Ok(attempt) => {
                self.state.transition(SupervisorState::Running, "mark running")?;
                info!(attempt, "Workload is ready");
                Ok(())
            }
            Err(e) => {
                let err = SupervisorError::from(e);
                error!("{}", err);
                self.state.fail();
                Err(err)
            }
        }
    }

    /// Start the health monitor (containerized mode only)
    pub fn monitor(&mut self) -> Result<()> {
        let manager = match &self.mode {
            None => return Err(SupervisorError::NotInitialized),
            Some(ExecutionMode::Direct(_)) => {
                return Err(SupervisorError::UnsupportedOperation {
                    operation: "health monitoring",
                });
            }
            Some(ExecutionMode::Containerized(manager)) => manager.clone(),
        };

        let state = self.state.get();
        if state != SupervisorState::Running {
            return Err(SupervisorError::InvalidState {
                action: "start monitoring",
                state,
            });
        }
        if self.monitor.is_some() {
            return Ok(());
        }

        let probe = self.probe.clone().ok_or(SupervisorError::NotInitialized)?;
        let handle = HealthMonitor::new(
            manager,
            probe,
            self.state.clone(),
            self.config.monitor.clone(),
            self.config.readiness.interval,
            RestartPolicy::new(self.config.restart.clone()),
            self.restarts.clone(),
            CancellationToken::new(),
        )
        .spawn();
        self.monitor = Some(handle);
        Ok(())
    }

    /// `start()`, readiness with the configured budget, then monitoring
    pub async fn launch(&mut self) -> Result<()> {
        self.start().await?;
        self.wait_for_ready(
            self.config.readiness.max_attempts,
            self.config.readiness.interval,
        )
        .await?;

        if matches!(self.mode, Some(ExecutionMode::Containerized(_))) {
            self.monitor()?;
        }
        Ok(())
    }

    /// Stop supervising. `Running | Degraded | Restarting | Failed → Stopping → Stopped`.
    ///
    /// From `Failed` this removes any container a timed-out launch or an
    /// exhausted monitor left running.
    ///
    /// The monitor is cancelled (and any in-flight restart awaited) before the
    /// container is stopped, so no restart is issued once stopping begins.
    pub async fn stop(&mut self) -> Result<()> {
        self.state.transition(SupervisorState::Stopping, "stop")?;

        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown().await;
        }

        let result = match &self.mode {
            Some(ExecutionMode::Containerized(manager)) => {
                if manager.stop_container().await {
                    Ok(())
                } else {
                    Err(SupervisorError::StopFailed {
                        container: manager.container_name().to_string(),
                    })
                }
            }
            // The host owns a direct workload's process lifetime
            Some(ExecutionMode::Direct(_)) | None => Ok(()),
        };

        self.state.transition(SupervisorState::Stopped, "finish stopping")?;
        info!("Supervisor stopped");
        result
    }

    /// Current workload status, in the same shape for both modes
    pub async fn get_status(&self) -> ContainerStatus {
        match (&self.mode, &self.probe) {
            (Some(ExecutionMode::Containerized(manager)), _) => manager.get_status().await,
            (Some(ExecutionMode::Direct(_)), Some(probe)) => direct_status(probe).await,
            _ => ContainerStatus::absent(false).with_error("Supervisor has not been initialized"),
        }
    }

    /// Last `tail_lines` lines of workload output
    pub async fn get_logs(&self, tail_lines: usize) -> Result<String> {
        match &self.mode {
            Some(ExecutionMode::Containerized(manager)) => Ok(manager.get_logs(tail_lines).await?),
            Some(ExecutionMode::Direct(_)) => Ok(DIRECT_LOGS_UNAVAILABLE.to_string()),
            None => Err(SupervisorError::NotInitialized),
        }
    }

    /// Run `command` inside the workload's container
    pub async fn exec_command(&self, command: &str) -> Result<String> {
        match &self.mode {
            Some(ExecutionMode::Containerized(manager)) => {
                Ok(manager.exec_in_container(command).await?)
            }
            Some(ExecutionMode::Direct(_)) => Err(SupervisorError::UnsupportedOperation {
                operation: "exec",
            }),
            None => Err(SupervisorError::NotInitialized),
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(monitor) = &self.monitor {
            monitor.cancel();
        }
    }
}

async fn direct_status(probe: &HealthProbe) -> ContainerStatus {
    let (is_running, health, error) = match probe.check().await {
        ProbeOutcome::Healthy => (true, HealthStatus::Healthy, None),
        ProbeOutcome::Unhealthy { reason } => (true, HealthStatus::Unhealthy, Some(reason)),
        ProbeOutcome::Unreachable { reason } => (false, HealthStatus::Unknown, Some(reason)),
    };

    ContainerStatus {
        is_installed: true,
        is_running,
        health,
        container_id: None,
        error,
        checked_at: Utc::now(),
    }
}

/// Create `path` (and its parent) as an empty file when missing, so the engine
/// bind-mounts a file rather than inventing a directory.
async fn ensure_file(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, b"").await?;
    info!(path = %path.display(), "Created empty env file");
    Ok(())
}
