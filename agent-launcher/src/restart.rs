//! Restart budget for the health monitor
//!
//! Consecutive failed restarts back off exponentially, and the number of
//! restarts inside a rolling window is capped so a persistently broken image
//! cannot cause a restart storm.

use crate::config::RestartConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Verdict on whether a restart may be attempted now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Go ahead
    Allowed,
    /// Still backing off from the previous failure
    Backoff { remaining: Duration },
    /// Window budget spent; stop restarting
    Exhausted,
}

/// Tracks restart attempts and failures for one supervisor
#[derive(Debug)]
pub struct RestartPolicy {
    config: RestartConfig,
    attempts: VecDeque<Instant>,
    consecutive_failures: u32,
    next_allowed: Option<Instant>,
}

impl RestartPolicy {
    pub fn new(config: RestartConfig) -> Self {
        Self {
            config,
            attempts: VecDeque::new(),
            consecutive_failures: 0,
            next_allowed: None,
        }
    }

    /// Backoff delay after `failures` consecutive failures (1-indexed)
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let base = self.config.initial_backoff.as_millis() as f64
            * self.config.backoff_multiplier.powi(failures as i32 - 1);
        let clamped = base.min(self.config.max_backoff.as_millis() as f64);
        Duration::from_millis(clamped as u64)
    }

    pub fn decide(&mut self, now: Instant) -> RestartDecision {
        self.expire(now);

        if self.attempts.len() >= self.config.max_restarts as usize {
            return RestartDecision::Exhausted;
        }
        match self.next_allowed {
            Some(at) if at > now => RestartDecision::Backoff {
                remaining: at - now,
            },
            _ => RestartDecision::Allowed,
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.expire(now);
        self.attempts.push_back(now);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.next_allowed = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        self.next_allowed = Some(now + self.delay_for_failure(self.consecutive_failures));
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Attempts still counted against the window
    pub fn attempts_in_window(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.attempts.len()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_duration_since(oldest) >= self.config.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartPolicy {
        RestartPolicy::new(RestartConfig {
            max_restarts: 3,
            window: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        })
    }

    #[test]
    fn test_delay_calculation() {
        let policy = policy();
        assert_eq!(policy.delay_for_failure(0), Duration::ZERO);
        assert_eq!(policy.delay_for_failure(1).as_millis(), 500);
        assert_eq!(policy.delay_for_failure(2).as_millis(), 1000);
        assert_eq!(policy.delay_for_failure(3).as_millis(), 2000);
        // Capped at max
        assert_eq!(policy.delay_for_failure(10), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_after_failure() {
        let mut policy = policy();
        let now = Instant::now();

        assert_eq!(policy.decide(now), RestartDecision::Allowed);
        policy.record_attempt(now);
        policy.record_failure(now);

        assert_eq!(
            policy.decide(now + Duration::from_millis(100)),
            RestartDecision::Backoff {
                remaining: Duration::from_millis(400)
            }
        );
        assert_eq!(
            policy.decide(now + Duration::from_millis(500)),
            RestartDecision::Allowed
        );
    }

    #[test]
    fn test_success_clears_backoff() {
        let mut policy = policy();
        let now = Instant::now();

        policy.record_attempt(now);
        policy.record_failure(now);
        policy.record_success();

        assert_eq!(policy.consecutive_failures(), 0);
        assert_eq!(policy.decide(now), RestartDecision::Allowed);
    }

    #[test]
    fn test_window_budget() {
        let mut policy = policy();
        let now = Instant::now();

        for i in 0..3 {
            let at = now + Duration::from_secs(i);
            assert_eq!(policy.decide(at), RestartDecision::Allowed);
            policy.record_attempt(at);
            policy.record_success();
        }

        assert_eq!(
            policy.decide(now + Duration::from_secs(5)),
            RestartDecision::Exhausted
        );
        // The oldest attempt ages out of the window
        assert_eq!(
            policy.decide(now + Duration::from_secs(60)),
            RestartDecision::Allowed
        );
        assert_eq!(policy.attempts_in_window(now + Duration::from_secs(60)), 2);
    }
}
