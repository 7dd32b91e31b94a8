//! Translates one [`SandboxConfig`] into engine calls.
//!
//! The manager is pure mechanism: build and start failures are reported to the
//! caller and never retried here. Retry policy belongs to the supervisor.

use super::SandboxConfig;
use crate::error::RuntimeError;
use crate::runtime::{ContainerStatus, RuntimeClient, RuntimeResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Owns the configuration and lifecycle of one container instance
pub struct SandboxManager {
    config: SandboxConfig,
    runtime: Arc<dyn RuntimeClient>,
    stop_grace: Duration,
}

impl SandboxManager {
    /// Create a manager for `config`, giving containers `stop_grace` to exit
    pub fn new(config: SandboxConfig, runtime: Arc<dyn RuntimeClient>, stop_grace: Duration) -> Self {
        Self {
            config,
            runtime,
            stop_grace,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn container_name(&self) -> &str {
        &self.config.container_name
    }

    pub async fn check_runtime_available(&self) -> bool {
        self.runtime.is_available().await
    }

    /// Attempt an automated runtime install. The caller decides whether failure is fatal.
    pub async fn install_runtime(&self) -> bool {
        info!("Attempting to install container runtime");
        let installed = self.runtime.install().await;
        if installed {
            info!("Container runtime installed");
        } else {
            warn!("Container runtime install failed");
        }
        installed
    }

    /// Build the configured image. Any failure is reported as `false`.
    #[instrument(skip(self), fields(image = %self.config.image_name))]
    pub async fn build_image(&self) -> bool {
        info!(context = %self.config.build_context.display(), "Building image");
        match self
            .runtime
            .build(&self.config.image_name, &self.config.build_context)
            .await
        {
            Ok(true) => {
                info!("Image built");
                true
            }
            Ok(false) => {
                error!("Image build exited unsuccessfully");
                false
            }
            Err(e) => {
                error!("Image build failed: {}", e);
                false
            }
        }
    }

    /// Start a fresh container, replacing any stale one with the same name.
    ///
    /// Returns the new container id, or `None` if the container could not be started.
    #[instrument(skip(self), fields(container = %self.config.container_name))]
    pub async fn start_container(&self) -> Option<String> {
        for volume in &self.config.volumes {
            if !volume.host_path.exists() {
                error!(
                    path = %volume.host_path.display(),
                    "Volume host path does not exist"
                );
                return None;
            }
        }

        match self.runtime.stop(&self.config.container_name, self.stop_grace).await {
            Ok(true) => debug!("Removed stale container"),
            Ok(false) => {}
            Err(e) => warn!("Failed to clean up stale container: {}", e),
        }

        match self.runtime.run(&self.config).await {
            Ok(id) => {
                info!(container_id = %id, "Container started");
                Some(id)
            }
            Err(e) => {
                error!("Failed to start container: {}", e);
                None
            }
        }
    }

    /// Stop the container, allowing the configured grace period before force-kill
    pub async fn stop_container(&self) -> bool {
        info!(container = %self.config.container_name, "Stopping container");
        match self.runtime.stop(&self.config.container_name, self.stop_grace).await {
            Ok(existed) => {
                if !existed {
                    debug!(container = %self.config.container_name, "Container was not running");
                }
                true
            }
            Err(e) => {
                error!(container = %self.config.container_name, "Failed to stop container: {}", e);
                false
            }
        }
    }

    /// Re-query the engine. Never served from a cache.
    pub async fn get_status(&self) -> ContainerStatus {
        match self.runtime.inspect(&self.config.container_name).await {
            Ok(status) => status,
            Err(e) => {
                let installed = !matches!(e, RuntimeError::Spawn { .. });
                ContainerStatus::absent(installed).with_error(e.to_string())
            }
        }
    }

    pub async fn get_logs(&self, tail_lines: usize) -> RuntimeResult<String> {
        self.runtime.logs(&self.config.container_name, tail_lines).await
    }

    pub async fn exec_in_container(&self, command: &str) -> RuntimeResult<String> {
        self.runtime.exec(&self.config.container_name, command).await
    }
}
