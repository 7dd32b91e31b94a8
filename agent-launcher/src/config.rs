//! Configuration types for the launcher

use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const CONFIG_FILE: &str = "agent-launcher.toml";

/// Environment variable pointing at an additional config file
pub const CONFIG_PATH_ENV: &str = "AGENT_LAUNCHER_CONFIG";

/// Prefix for environment overrides (`AGENT_LAUNCHER_READINESS__MAX_ATTEMPTS=10`)
pub const ENV_PREFIX: &str = "AGENT_LAUNCHER_";

/// Main configuration for the launcher
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LauncherConfig {
    /// Container engine settings
    pub runtime: RuntimeConfig,

    /// Container naming, image and mounts
    pub sandbox: SandboxSettings,

    /// Startup readiness polling
    pub readiness: ReadinessConfig,

    /// Periodic health monitoring
    pub monitor: MonitorConfig,

    /// Restart budget for the monitor loop
    pub restart: RestartConfig,

    /// Direct (non-container) mode settings
    pub direct: DirectConfig,
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine binary (docker or a CLI-compatible replacement such as podman)
    pub binary: String,

    /// Timeout applied to every engine command except builds
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Timeout applied to image builds
    #[serde(with = "humantime_serde")]
    pub build_timeout: Duration,

    /// Grace period given to `stop` before the engine force-kills the container
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Optional bootstrap command run when the engine is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<Vec<String>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout: Duration::from_secs(30),
            build_timeout: Duration::from_secs(15 * 60),
            stop_grace: Duration::from_secs(10),
            install_command: None,
        }
    }
}

/// Settings that shape the [`SandboxConfig`](crate::SandboxConfig)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Container name, unique per supervised workload
    pub container_name: String,

    /// Image tag to build and run
    pub image_name: String,

    /// Directory handed to the engine as build context
    pub build_context: PathBuf,

    /// Host data directory used when launch options don't name one
    pub data_dir: PathBuf,

    /// Mount point of the data directory inside the container
    pub data_mount: PathBuf,

    /// Host `.env` file mounted read-only into the container
    pub env_file: PathBuf,

    /// Mount point of the `.env` file inside the container
    pub env_mount: PathBuf,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agent-launcher")
            .join("data");

        Self {
            container_name: "agent".to_string(),
            image_name: "agent:latest".to_string(),
            build_context: PathBuf::from("."),
            data_dir,
            data_mount: PathBuf::from("/app/data"),
            env_file: PathBuf::from(".env"),
            env_mount: PathBuf::from("/app/.env"),
        }
    }
}

/// Readiness polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Host the workload's HTTP server is reached on
    pub host: String,

    /// Path of the health endpoint
    pub health_path: String,

    /// Attempts before startup is declared failed
    pub max_attempts: u32,

    /// Spacing between attempts
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Timeout of a single probe request
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            health_path: "/health".to_string(),
            max_attempts: 30,
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Delay after startup before the first check
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Spacing between checks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Log lines captured for diagnostics before a restart
    pub log_tail_lines: usize,

    /// Readiness attempts granted to a restarted container
    pub restart_ready_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            interval: Duration::from_secs(30),
            log_tail_lines: 50,
            restart_ready_attempts: 15,
        }
    }
}

/// Bounds on automatic restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Restarts allowed inside one window before the supervisor gives up.
    ///
    /// Every attempt counts, including restarts that recovered the workload, so a
    /// container that keeps dying and recovering still ends up `Failed` once it
    /// has been restarted this many times within `window`.
    pub max_restarts: u32,

    /// Length of the rolling window
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Delay imposed after the first failed restart
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound on the backoff delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Growth factor between consecutive failures
    pub backoff_multiplier: f64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(10 * 60),
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5 * 60),
            backoff_multiplier: 2.0,
        }
    }
}

/// Direct mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Environment variable carrying the listen port to the workload
    pub port_env_var: String,

    /// Workload binary spawned by the CLI in direct mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,

    /// Arguments passed to `program`
    pub args: Vec<String>,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            port_env_var: "PORT".to_string(),
            program: None,
            args: Vec::new(),
        }
    }
}

impl LauncherConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `agent-launcher.toml` in the working directory
    /// 3. File named by `AGENT_LAUNCHER_CONFIG`
    /// 4. `AGENT_LAUNCHER_*` environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment =
            Figment::from(Serialized::defaults(LauncherConfig::default())).merge(Toml::file(CONFIG_FILE));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }

        let config: LauncherConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| {
                SupervisorError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: LauncherConfig = Figment::from(Serialized::defaults(LauncherConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                SupervisorError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SupervisorError::Configuration(msg.to_string()));

        if self.runtime.binary.trim().is_empty() {
            return invalid("runtime.binary cannot be empty");
        }
        if self.sandbox.container_name.trim().is_empty() {
            return invalid("sandbox.container_name cannot be empty");
        }
        if self.sandbox.image_name.trim().is_empty() {
            return invalid("sandbox.image_name cannot be empty");
        }
        if self.readiness.max_attempts == 0 || self.monitor.restart_ready_attempts == 0 {
            return invalid("readiness attempt budgets must be at least 1");
        }
        if self.readiness.interval.is_zero() || self.monitor.interval.is_zero() {
            return invalid("polling intervals must be non-zero");
        }
        if !self.readiness.health_path.starts_with('/') {
            return invalid("readiness.health_path must start with '/'");
        }
        if self.restart.max_restarts == 0 {
            return invalid("restart.max_restarts must be at least 1");
        }
        if self.restart.backoff_multiplier < 1.0 {
            return invalid("restart.backoff_multiplier must be >= 1.0");
        }
        Ok(())
    }
}
