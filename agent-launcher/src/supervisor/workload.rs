//! Direct-mode workload entry points

use crate::error::{Result, SupervisorError};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::info;

/// Start entry point of a workload run without a container.
///
/// The listen port arrives through `env` under the configured port variable.
/// Once started, the workload's lifetime belongs to the host, not the supervisor.
#[async_trait]
pub trait Workload: Send + Sync {
    async fn start(&self, env: &BTreeMap<String, String>) -> Result<()>;
}

/// Workload launched as a local child process
pub struct ProcessWorkload {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    child: Mutex<Option<Child>>,
}

impl ProcessWorkload {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            child: Mutex::new(None),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Process id of the spawned child, if still tracked
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Workload for ProcessWorkload {
    async fn start(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if child.try_wait()?.is_none() {
                return Err(SupervisorError::Workload(format!(
                    "{} is already running",
                    self.program.display()
                )));
            }
        }

        if !self.program.exists() {
            return Err(SupervisorError::Workload(format!(
                "Agent binary not found: {}",
                self.program.display()
            )));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(ref working_dir) = self.working_dir {
            cmd.current_dir(working_dir);
        }

        let child = cmd.spawn().context("Failed to spawn agent process")?;
        info!(
            "Agent process {} started (PID: {:?})",
            self.program.display(),
            child.id()
        );
        *guard = Some(child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary() {
        let workload = ProcessWorkload::new("/definitely/not/an/agent");
        let err = workload.start(&BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Workload(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawns_with_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("port.txt");
        let workload = ProcessWorkload::new("/bin/sh")
            .with_args(["-c", "echo $PORT > port.txt"])
            .with_working_dir(dir.path());

        let env = BTreeMap::from([("PORT".to_string(), "7777".to_string())]);
        workload.start(&env).await.unwrap();
        assert!(workload.pid().await.is_some());

        let mut child = workload.child.lock().await.take().unwrap();
        child.wait().await.unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap().trim(), "7777");
    }
}
