//! HTTP health probing and bounded readiness polling
//!
//! Readiness is distinct from the engine reporting a container as running: the
//! workload inside may still be warming up. The probe asks the workload itself.

use crate::config::ReadinessConfig;
use crate::error::{Result, SupervisorError};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// HTTP 200 with `status: "healthy"`
    Healthy,
    /// The workload answered but is not healthy
    Unhealthy { reason: String },
    /// No HTTP response at all
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

#[derive(Debug, Deserialize)]
struct HealthPayload {
    status: Option<String>,
}

/// Probe for the workload's health endpoint
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
    url: String,
}

impl HealthProbe {
    /// Probe `http://{host}:{port}{health_path}` with the configured timeout
    pub fn new(config: &ReadinessConfig, port: u16) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| {
                SupervisorError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: format!("http://{}:{}{}", config.host, port, config.health_path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one GET against the health endpoint
    pub async fn check(&self) -> ProbeOutcome {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => {
                return ProbeOutcome::Unreachable {
                    reason: format!("Unable to connect to agent at {}: {}", self.url, e),
                };
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return ProbeOutcome::Unhealthy {
                reason: format!("health endpoint returned {}", status),
            };
        }

        match response.json::<HealthPayload>().await {
            Ok(HealthPayload { status: Some(s) }) if s.eq_ignore_ascii_case("healthy") => {
                ProbeOutcome::Healthy
            }
            Ok(HealthPayload { status }) => ProbeOutcome::Unhealthy {
                reason: format!("health status is {:?}", status.unwrap_or_default()),
            },
            Err(e) => ProbeOutcome::Unhealthy {
                reason: format!("invalid health payload: {}", e),
            },
        }
    }
}

/// Why polling stopped without the workload becoming ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// Every attempt was spent
    Exhausted { attempts: u32, last: ProbeOutcome },
    /// The token fired between attempts
    Cancelled { attempts: u32 },
}

impl From<PollError> for SupervisorError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Exhausted { attempts, .. } | PollError::Cancelled { attempts } => {
                SupervisorError::ReadinessTimeout { attempts }
            }
        }
    }
}

/// Poll `probe` until it reports healthy.
///
/// Attempts are strictly sequential and spaced `interval` apart, so exhausting
/// `max_attempts` takes at least `(max_attempts - 1) * interval`. Returns the
/// attempt number that succeeded.
pub async fn poll_until_ready(
    probe: &HealthProbe,
    max_attempts: u32,
    interval: Duration,
    cancel: Option<&CancellationToken>,
) -> std::result::Result<u32, PollError> {
    let mut last = ProbeOutcome::Unreachable {
        reason: "not probed".to_string(),
    };

    for attempt in 1..=max_attempts {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(PollError::Cancelled {
                attempts: attempt - 1,
            });
        }

        last = probe.check().await;
        if last.is_healthy() {
            debug!(attempt, url = %probe.url(), "Workload is ready");
            return Ok(attempt);
        }
        debug!(attempt, max_attempts, outcome = ?last, "Workload not ready yet");

        if attempt < max_attempts {
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(PollError::Cancelled { attempts: attempt });
                        }
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                None => tokio::time::sleep(interval).await,
            }
        }
    }

    Err(PollError::Exhausted {
        attempts: max_attempts,
        last,
    })
}
