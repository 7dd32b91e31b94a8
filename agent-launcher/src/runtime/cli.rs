//! Engine adapter that shells out to a Docker-compatible CLI

use super::{ContainerStatus, HealthStatus, RuntimeClient, RuntimeResult};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::sandbox::SandboxConfig;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Runtime client backed by the `docker` (or `podman`) binary
#[derive(Debug, Clone)]
pub struct CliRuntime {
    config: RuntimeConfig,
}

impl CliRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Engine binary in use
    pub fn binary(&self) -> &str {
        &self.config.binary
    }

    async fn output(&self, args: &[String], limit: Duration) -> RuntimeResult<Output> {
        run_program(&self.config.binary, args, limit).await
    }

    async fn command(&self, args: &[String]) -> RuntimeResult<Output> {
        self.output(args, self.config.command_timeout).await
    }

    fn label(&self, args: &[String]) -> String {
        label(&self.config.binary, args)
    }
}

#[async_trait]
impl RuntimeClient for CliRuntime {
    async fn is_available(&self) -> bool {
        match self.command(&strings(["version"])).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("{} is not available: {}", self.config.binary, e);
                false
            }
        }
    }

    async fn install(&self) -> bool {
        let Some((program, args)) = self
            .config
            .install_command
            .as_ref()
            .and_then(|cmd| cmd.split_first())
        else {
            warn!(
                "No install command configured for {}, cannot bootstrap runtime",
                self.config.binary
            );
            return false;
        };

        info!(program = %program, "Installing container runtime");
        match run_program(program, args, self.config.build_timeout).await {
            Ok(output) if output.status.success() => self.is_available().await,
            Ok(output) => {
                warn!(
                    code = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Runtime install command failed"
                );
                false
            }
            Err(e) => {
                warn!("Runtime install command failed: {}", e);
                false
            }
        }
    }

    async fn build(&self, image_name: &str, build_context: &Path) -> RuntimeResult<bool> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            image_name.to_string(),
            build_context.display().to_string(),
        ];
        let output = self.output(&args, self.config.build_timeout).await?;

        if !output.status.success() {
            warn!(
                image = %image_name,
                code = ?output.status.code(),
                stderr = %tail(&String::from_utf8_lossy(&output.stderr), 20),
                "Image build failed"
            );
        }
        Ok(output.status.success())
    }

    async fn run(&self, config: &SandboxConfig) -> RuntimeResult<String> {
        let args = run_args(config);
        let output = self.command(&args).await?;

        if !output.status.success() {
            return Err(failed(self.label(&args), &output));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Parse(
                "engine returned an empty container id".to_string(),
            ));
        }
        Ok(id)
    }

    async fn stop(&self, container_name: &str, grace: Duration) -> RuntimeResult<bool> {
        let stop_args = strings(["stop", "-t", &grace_secs(grace).to_string(), container_name]);
        let stopped = self
            .output(&stop_args, self.config.command_timeout + grace)
            .await?;

        if !stopped.status.success() {
            if is_missing(&stopped) {
                return Ok(false);
            }
            return Err(failed(self.label(&stop_args), &stopped));
        }

        let rm_args = strings(["rm", "-f", container_name]);
        let removed = self.command(&rm_args).await?;
        if !removed.status.success() && !is_missing(&removed) {
            return Err(failed(self.label(&rm_args), &removed));
        }
        Ok(true)
    }

    async fn inspect(&self, container_name: &str) -> RuntimeResult<ContainerStatus> {
        let args = strings(["inspect", "--type", "container", container_name]);
        let output = self.command(&args).await?;

        if !output.status.success() {
            if is_missing(&output) {
                return Ok(ContainerStatus::absent(true));
            }
            return Err(failed(self.label(&args), &output));
        }
        parse_inspect(&String::from_utf8_lossy(&output.stdout))
    }

    async fn logs(&self, container_name: &str, tail_lines: usize) -> RuntimeResult<String> {
        let args = strings(["logs", "--tail", &tail_lines.to_string(), container_name]);
        let output = self.command(&args).await?;

        if !output.status.success() {
            return Err(failed(self.label(&args), &output));
        }

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn exec(&self, container_name: &str, command: &str) -> RuntimeResult<String> {
        let args = strings(["exec", container_name, "sh", "-c", command]);
        let output = self.command(&args).await?;

        if !output.status.success() {
            return Err(failed(self.label(&args), &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

async fn run_program(program: &str, args: &[String], limit: Duration) -> RuntimeResult<Output> {
    let command = label(program, args);
    debug!(%command, "Running engine command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RuntimeError::Spawn {
            command: command.clone(),
            source,
        })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(RuntimeError::Spawn { command, source }),
        Err(_) => Err(RuntimeError::Timeout {
            command,
            timeout: limit,
        }),
    }
}

/// Arguments for `run`, in the order the engine receives them
pub(crate) fn run_args(config: &SandboxConfig) -> Vec<String> {
    let mut args = strings(["run", "-d", "--name", &config.container_name]);

    for port in &config.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port.host, port.container));
    }
    for volume in &config.volumes {
        args.push("-v".to_string());
        args.push(volume.to_arg());
    }
    for (key, value) in &config.environment {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(config.image_name.clone());
    args
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    #[serde(default)]
    status: String,
}

/// Map `inspect` JSON onto a [`ContainerStatus`]
pub(crate) fn parse_inspect(stdout: &str) -> RuntimeResult<ContainerStatus> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout).map_err(|e| RuntimeError::Parse(e.to_string()))?;

    let Some(entry) = entries.into_iter().next() else {
        return Ok(ContainerStatus::absent(true));
    };

    let health = if !entry.state.running {
        match entry.state.status.as_str() {
            "created" | "restarting" => HealthStatus::Unknown,
            _ => HealthStatus::Unhealthy,
        }
    } else {
        match entry.state.health.as_ref().map(|h| h.status.as_str()) {
            None | Some("") | Some("none") | Some("healthy") => HealthStatus::Healthy,
            Some("unhealthy") => HealthStatus::Unhealthy,
            Some(_) => HealthStatus::Unknown,
        }
    };

    Ok(ContainerStatus {
        is_installed: true,
        is_running: entry.state.running,
        health,
        container_id: Some(entry.id),
        error: None,
        checked_at: Utc::now(),
    })
}

fn is_missing(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    stderr.contains("no such container")
        || stderr.contains("no such object")
        || stderr.contains("no container with name or id")
}

fn failed(command: String, output: &Output) -> RuntimeError {
    RuntimeError::CommandFailed {
        command,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn label(program: &str, args: &[String]) -> String {
    match args.first() {
        Some(sub) => format!("{} {}", program, sub),
        None => program.to_string(),
    }
}

/// `stop -t` takes whole seconds; round up so a sub-second grace isn't an immediate kill
fn grace_secs(grace: Duration) -> u64 {
    grace.as_secs() + u64::from(grace.subsec_nanos() > 0)
}

fn strings<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
