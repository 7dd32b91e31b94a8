//! Periodic health monitor with bounded automatic restarts

use super::state::{StateCell, SupervisorState};
use crate::config::MonitorConfig;
use crate::error::SupervisorError;
use crate::health::{HealthProbe, PollError, poll_until_ready};
use crate::restart::{RestartDecision, RestartPolicy};
use crate::runtime::{ContainerStatus, HealthStatus};
use crate::sandbox::SandboxManager;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single monitor tick did
#[derive(Debug)]
pub(crate) enum TickOutcome {
    Healthy,
    Unknown,
    /// Unhealthy; a restart task was spawned
    RestartTriggered(JoinHandle<()>),
    /// Unhealthy, but a restart is already running
    RestartInFlight,
    /// Unhealthy, but still backing off from a failed restart
    Backoff(Duration),
    /// Restart budget spent; the supervisor has failed
    Exhausted,
    /// The monitor was cancelled mid-tick
    Cancelled,
}

/// Monitor state shared between the loop and its restart tasks
pub(crate) struct HealthMonitor {
    manager: Arc<SandboxManager>,
    probe: HealthProbe,
    state: Arc<StateCell>,
    config: MonitorConfig,
    ready_interval: Duration,
    policy: Mutex<RestartPolicy>,
    restart_in_flight: AtomicBool,
    restarts: Arc<AtomicU32>,
    cancel: CancellationToken,
}

/// Running monitor task
pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to stop without waiting for it
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel the loop and wait for it, including any in-flight restart
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Health monitor task ended abnormally: {}", e);
        }
    }
}

impl HealthMonitor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        manager: Arc<SandboxManager>,
        probe: HealthProbe,
        state: Arc<StateCell>,
        config: MonitorConfig,
        ready_interval: Duration,
        policy: RestartPolicy,
        restarts: Arc<AtomicU32>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            probe,
            state,
            config,
            ready_interval,
            policy: Mutex::new(policy),
            restart_in_flight: AtomicBool::new(false),
            restarts,
            cancel,
        }
    }

    /// Start the loop on its own task
    pub(crate) fn spawn(self) -> MonitorHandle {
        let cancel = self.cancel.clone();
        let monitor = Arc::new(self);
        let task = tokio::spawn(async move { monitor.run().await });
        MonitorHandle { cancel, task }
    }

    async fn run(self: Arc<Self>) {
        info!(
            container = %self.manager.container_name(),
            initial_delay = ?self.config.initial_delay,
            interval = ?self.config.interval,
            "Health monitor started"
        );

        // Warm-up grace so a slow first boot isn't mistaken for a failure
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.config.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut restart_task: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.clone().tick().await {
                TickOutcome::RestartTriggered(task) => restart_task = Some(task),
                TickOutcome::Exhausted | TickOutcome::Cancelled => break,
                _ => {}
            }
        }

        if let Some(task) = restart_task {
            let _ = task.await;
        }
        debug!(container = %self.manager.container_name(), "Health monitor stopped");
    }

    pub(crate) async fn tick(self: Arc<Self>) -> TickOutcome {
        let status = tokio::select! {
            _ = self.cancel.cancelled() => return TickOutcome::Cancelled,
            status = self.manager.get_status() => status,
        };
        // stop() may have begun while the status query was in flight
        if self.cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }

        match observed_health(&status) {
            HealthStatus::Healthy => {
                if self
                    .state
                    .transition_from(&[SupervisorState::Degraded], SupervisorState::Running)
                {
                    info!(container = %self.manager.container_name(), "Workload recovered");
                }
                TickOutcome::Healthy
            }
            HealthStatus::Unknown => {
                debug!(error = ?status.error, "Workload health unknown");
                TickOutcome::Unknown
            }
            HealthStatus::Unhealthy => self.handle_unhealthy().await,
        }
    }

    async fn handle_unhealthy(self: Arc<Self>) -> TickOutcome {
        let container = self.manager.container_name().to_string();

        if self.restart_in_flight.load(Ordering::SeqCst) {
            debug!(%container, "Unhealthy, restart already in flight");
            return TickOutcome::RestartInFlight;
        }

        let decision = self.policy().decide(Instant::now());
        match decision {
            RestartDecision::Allowed => {}
            RestartDecision::Backoff { remaining } => {
                warn!(%container, ?remaining, "Unhealthy, waiting out restart backoff");
                return TickOutcome::Backoff(remaining);
            }
            RestartDecision::Exhausted => {
                error!(
                    %container,
                    "Restart budget exhausted, giving up on automatic recovery"
                );
                self.state.fail();
                return TickOutcome::Exhausted;
            }
        }

        if self
            .restart_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TickOutcome::RestartInFlight;
        }

        let logs = self.recent_logs().await;
        warn!(%container, logs = %logs, "Workload unhealthy, restarting");

        if self.cancel.is_cancelled() {
            self.restart_in_flight.store(false, Ordering::SeqCst);
            return TickOutcome::Cancelled;
        }

        self.policy().record_attempt(Instant::now());
        self.restarts.fetch_add(1, Ordering::SeqCst);

        let monitor = self.clone();
        TickOutcome::RestartTriggered(tokio::spawn(async move { monitor.restart().await }))
    }

    async fn restart(self: Arc<Self>) {
        let container = self.manager.container_name().to_string();

        if self.cancel.is_cancelled()
            || !self.state.transition_from(
                &[SupervisorState::Running, SupervisorState::Degraded],
                SupervisorState::Restarting,
            )
        {
            self.restart_in_flight.store(false, Ordering::SeqCst);
            return;
        }

        let result = match self.manager.start_container().await {
            None => Err("container failed to start".to_string()),
            Some(id) => {
                debug!(%container, container_id = %id, "Restarted container, waiting for readiness");
                match poll_until_ready(
                    &self.probe,
                    self.config.restart_ready_attempts,
                    self.ready_interval,
                    Some(&self.cancel),
                )
                .await
                {
                    Ok(attempt) => Ok(attempt),
                    Err(PollError::Cancelled { .. }) => {
                        debug!(%container, "Restart readiness wait cancelled");
                        self.restart_in_flight.store(false, Ordering::SeqCst);
                        return;
                    }
                    Err(PollError::Exhausted { attempts, last }) => Err(format!(
                        "not ready after {} attempts ({:?})",
                        attempts, last
                    )),
                }
            }
        };

        match result {
            Ok(attempt) => {
                self.policy().record_success();
                self.state
                    .transition_from(&[SupervisorState::Restarting], SupervisorState::Running);
                info!(%container, attempt, "Workload restarted and ready");
            }
            Err(reason) => {
                self.policy().record_failure(Instant::now());
                let err = SupervisorError::RestartFailed {
                    container: container.clone(),
                    reason,
                };
                let logs = self.recent_logs().await;
                error!(error = %err, logs = %logs, "Automatic restart failed, continuing to monitor");
                self.state
                    .transition_from(&[SupervisorState::Restarting], SupervisorState::Degraded);
            }
        }

        self.restart_in_flight.store(false, Ordering::SeqCst);
    }

    async fn recent_logs(&self) -> String {
        self.manager
            .get_logs(self.config.log_tail_lines)
            .await
            .unwrap_or_else(|e| format!("<logs unavailable: {}>", e))
    }

    fn policy(&self) -> std::sync::MutexGuard<'_, RestartPolicy> {
        self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Health as the monitor sees it. A container that vanished from the engine
/// while it should be running counts as unhealthy.
fn observed_health(status: &ContainerStatus) -> HealthStatus {
    if status.container_id.is_none() && status.error.is_none() {
        HealthStatus::Unhealthy
    } else {
        status.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReadinessConfig, RestartConfig};
    use crate::sandbox::SandboxConfig;
    use crate::testing::MockRuntime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        runtime: Arc<MockRuntime>,
        state: Arc<StateCell>,
        restarts: Arc<AtomicU32>,
        monitor: Arc<HealthMonitor>,
        _server: MockServer,
    }

    async fn fixture(restart: RestartConfig) -> Fixture {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})),
            )
            .mount(&server)
            .await;

        let runtime = Arc::new(MockRuntime::new());
        let port = server.address().port();
        let manager = Arc::new(SandboxManager::new(
            SandboxConfig::new("agent", "agent:latest").with_port(port, port),
            runtime.clone(),
            Duration::from_secs(1),
        ));
        manager.start_container().await.unwrap();

        let state = Arc::new(StateCell::new());
        for (to, action) in [
            (SupervisorState::Initializing, "initialize"),
            (SupervisorState::Starting, "start"),
            (SupervisorState::WaitingForReady, "wait"),
            (SupervisorState::Running, "wait"),
        ] {
            state.transition(to, action).unwrap();
        }

        let restarts = Arc::new(AtomicU32::new(0));
        let monitor = Arc::new(HealthMonitor::new(
            manager,
            HealthProbe::new(&ReadinessConfig::default(), port).unwrap(),
            state.clone(),
            MonitorConfig {
                initial_delay: Duration::ZERO,
                interval: Duration::from_millis(20),
                log_tail_lines: 5,
                restart_ready_attempts: 3,
            },
            Duration::from_millis(10),
            RestartPolicy::new(restart),
            restarts.clone(),
            CancellationToken::new(),
        ));

        Fixture {
            runtime,
            state,
            restarts,
            monitor,
            _server: server,
        }
    }

    fn lenient() -> RestartConfig {
        RestartConfig {
            initial_backoff: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_restart_for_unhealthy_tick() {
        let f = fixture(lenient()).await;
        f.runtime.script_health([
            HealthStatus::Healthy,
            HealthStatus::Unhealthy,
            HealthStatus::Healthy,
        ]);

        assert!(matches!(f.monitor.clone().tick().await, TickOutcome::Healthy));
        let TickOutcome::RestartTriggered(task) = f.monitor.clone().tick().await else {
            panic!("expected a restart on the unhealthy tick");
        };
        task.await.unwrap();
        assert!(matches!(f.monitor.clone().tick().await, TickOutcome::Healthy));

        // One initial start plus exactly one restart
        assert_eq!(f.runtime.run_count(), 2);
        assert_eq!(f.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.get(), SupervisorState::Running);
    }

    #[tokio::test]
    async fn test_no_second_restart_while_in_flight() {
        let f = fixture(lenient()).await;
        f.runtime.set_run_delay(Duration::from_millis(200));
        f.runtime.script_health([HealthStatus::Unhealthy; 3]);

        let TickOutcome::RestartTriggered(task) = f.monitor.clone().tick().await else {
            panic!("expected a restart");
        };
        // The restart task holds the container down while the delayed run is pending,
        // so later ticks still observe it as unhealthy
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            f.monitor.clone().tick().await,
            TickOutcome::RestartInFlight
        ));
        assert!(matches!(
            f.monitor.clone().tick().await,
            TickOutcome::RestartInFlight
        ));

        task.await.unwrap();
        assert_eq!(f.runtime.run_count(), 2);
        assert_eq!(f.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_restart_degrades_then_recovers() {
        let f = fixture(lenient()).await;
        f.runtime.script_health([HealthStatus::Unhealthy]);
        f.runtime.fail_runs(true);

        let TickOutcome::RestartTriggered(task) = f.monitor.clone().tick().await else {
            panic!("expected a restart");
        };
        task.await.unwrap();
        assert_eq!(f.state.get(), SupervisorState::Degraded);

        // Container is gone after the failed restart, so the next tick retries
        f.runtime.fail_runs(false);
        let TickOutcome::RestartTriggered(task) = f.monitor.clone().tick().await else {
            panic!("expected a second restart");
        };
        task.await.unwrap();
        assert_eq!(f.state.get(), SupervisorState::Running);
        assert_eq!(f.restarts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backoff_after_failed_restart() {
        let f = fixture(RestartConfig {
            initial_backoff: Duration::from_secs(30),
            ..Default::default()
        })
        .await;
        f.runtime.fail_runs(true);
        f.runtime.script_health([HealthStatus::Unhealthy]);

        let TickOutcome::RestartTriggered(task) = f.monitor.clone().tick().await else {
            panic!("expected a restart");
        };
        task.await.unwrap();

        assert!(matches!(
            f.monitor.clone().tick().await,
            TickOutcome::Backoff(remaining) if remaining > Duration::from_secs(20)
        ));
        assert_eq!(f.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails_supervisor() {
        let f = fixture(RestartConfig {
            max_restarts: 1,
            initial_backoff: Duration::ZERO,
            ..Default::default()
        })
        .await;
        f.runtime.fail_runs(true);
        f.runtime.script_health([HealthStatus::Unhealthy]);

        let TickOutcome::RestartTriggered(task) = f.monitor.clone().tick().await else {
            panic!("expected a restart");
        };
        task.await.unwrap();

        assert!(matches!(f.monitor.clone().tick().await, TickOutcome::Exhausted));
        assert_eq!(f.state.get(), SupervisorState::Failed);
    }

    #[tokio::test]
    async fn test_spawned_loop_restarts_and_shuts_down() {
        let f = fixture(lenient()).await;
        f.runtime
            .script_health([HealthStatus::Healthy, HealthStatus::Unhealthy]);

        let monitor = Arc::try_unwrap(f.monitor)
            .ok()
            .expect("fixture holds the only reference");
        let handle = monitor.spawn();

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.runtime.run_count() < 2 || f.state.get() != SupervisorState::Running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("monitor should restart the unhealthy container");

        handle.shutdown().await;
        let inspections = f.runtime.inspect_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.runtime.inspect_count(), inspections);
        assert_eq!(f.restarts.load(Ordering::SeqCst), 1);
    }
}
