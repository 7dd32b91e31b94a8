//! Scripted in-memory runtime used by unit tests

use crate::error::RuntimeError;
use crate::runtime::{ContainerStatus, HealthStatus, RuntimeClient, RuntimeResult};
use crate::sandbox::SandboxConfig;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Runtime double that tracks containers by name and rejects name collisions
/// the way a real engine does.
pub(crate) struct MockRuntime {
    available: AtomicBool,
    install_succeeds: AtomicBool,
    fail_builds: AtomicBool,
    fail_runs: AtomicBool,
    containers: Mutex<HashMap<String, String>>,
    health_script: Mutex<VecDeque<HealthStatus>>,
    run_delay: Mutex<Duration>,
    inspect_delay: Mutex<Duration>,
    install_count: AtomicUsize,
    build_count: AtomicUsize,
    run_count: AtomicUsize,
    inspect_count: AtomicUsize,
    stop_count: AtomicUsize,
}

impl MockRuntime {
    pub(crate) fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            install_succeeds: AtomicBool::new(true),
            fail_builds: AtomicBool::new(false),
            fail_runs: AtomicBool::new(false),
            containers: Mutex::new(HashMap::new()),
            health_script: Mutex::new(VecDeque::new()),
            run_delay: Mutex::new(Duration::ZERO),
            inspect_delay: Mutex::new(Duration::ZERO),
            install_count: AtomicUsize::new(0),
            build_count: AtomicUsize::new(0),
            run_count: AtomicUsize::new(0),
            inspect_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub(crate) fn set_install_succeeds(&self, succeeds: bool) {
        self.install_succeeds.store(succeeds, Ordering::SeqCst);
    }

    pub(crate) fn fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_runs(&self, fail: bool) {
        self.fail_runs.store(fail, Ordering::SeqCst);
    }

    /// Health reported by successive inspections of a running container;
    /// `Healthy` once the script runs out.
    pub(crate) fn script_health(&self, statuses: impl IntoIterator<Item = HealthStatus>) {
        self.health_script.lock().unwrap().extend(statuses);
    }

    pub(crate) fn set_run_delay(&self, delay: Duration) {
        *self.run_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_inspect_delay(&self, delay: Duration) {
        *self.inspect_delay.lock().unwrap() = delay;
    }

    pub(crate) fn install_count(&self) -> usize {
        self.install_count.load(Ordering::SeqCst)
    }

    pub(crate) fn build_count(&self) -> usize {
        self.build_count.load(Ordering::SeqCst)
    }

    pub(crate) fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    pub(crate) fn inspect_count(&self) -> usize {
        self.inspect_count.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }

    pub(crate) fn running_containers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn install(&self) -> bool {
        self.install_count.fetch_add(1, Ordering::SeqCst);
        let ok = self.install_succeeds.load(Ordering::SeqCst);
        if ok {
            self.set_available(true);
        }
        ok
    }

    async fn build(&self, _image_name: &str, _build_context: &Path) -> RuntimeResult<bool> {
        self.build_count.fetch_add(1, Ordering::SeqCst);
        Ok(!self.fail_builds.load(Ordering::SeqCst))
    }

    async fn run(&self, config: &SandboxConfig) -> RuntimeResult<String> {
        let n = self.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.run_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "mock run".to_string(),
                code: Some(125),
                stderr: "image not found".to_string(),
            });
        }

        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&config.container_name) {
            return Err(RuntimeError::CommandFailed {
                command: "mock run".to_string(),
                code: Some(125),
                stderr: format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    config.container_name
                ),
            });
        }

        let id = format!("container-{}", n);
        containers.insert(config.container_name.clone(), id.clone());
        Ok(id)
    }

    async fn stop(&self, container_name: &str, _grace: Duration) -> RuntimeResult<bool> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.containers.lock().unwrap().remove(container_name).is_some())
    }

    async fn inspect(&self, container_name: &str) -> RuntimeResult<ContainerStatus> {
        self.inspect_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inspect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let id = self.containers.lock().unwrap().get(container_name).cloned();
        let Some(id) = id else {
            return Ok(ContainerStatus::absent(true));
        };

        let health = self
            .health_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(HealthStatus::Healthy);

        Ok(ContainerStatus {
            is_installed: true,
            is_running: true,
            health,
            container_id: Some(id),
            error: None,
            checked_at: Utc::now(),
        })
    }

    async fn logs(&self, container_name: &str, tail_lines: usize) -> RuntimeResult<String> {
        Ok(format!("{}: last {} lines", container_name, tail_lines))
    }

    async fn exec(&self, _container_name: &str, command: &str) -> RuntimeResult<String> {
        Ok(format!("ran: {}", command))
    }
}
