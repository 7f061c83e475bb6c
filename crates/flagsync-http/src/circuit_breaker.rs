use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown after the first opening
    pub cooldown: Duration,
    /// Cooldown doubles on every failed probe up to this bound
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

impl BreakerConfig {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown = max_cooldown;
        self
    }
}

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen { probing: bool },
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
    cooldown: Duration,
}

/// Per-host circuit breaker.
///
/// Half-open admits exactly one probe; others are rejected until it reports.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<RwLock<Inner>>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failures: 0,
                cooldown: config.cooldown,
            })),
            config,
        }
    }

    /// Check if we can execute a request
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    fn allow_request_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed => true,
            State::Open { until } if now >= until => {
                inner.state = State::HalfOpen { probing: true };
                true
            }
            State::Open { .. } => false,
            State::HalfOpen { probing: true } => false,
            State::HalfOpen { probing: false } => {
                inner.state = State::HalfOpen { probing: true };
                true
            }
        }
    }

    /// Report success
    pub fn report_success(&self) {
        let mut inner = self.inner.write();
        inner.state = State::Closed;
        inner.failures = 0;
        inner.cooldown = self.config.cooldown;
    }

    /// Report failure
    pub fn report_failure(&self) {
        self.report_failure_at(Instant::now());
    }

    fn report_failure_at(&self, now: Instant) {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = State::Open {
                        until: now + inner.cooldown,
                    };
                }
            }
            State::HalfOpen { .. } => {
                inner.cooldown = inner
                    .cooldown
                    .saturating_mul(2)
                    .min(self.config.max_cooldown);
                inner.state = State::Open {
                    until: now + inner.cooldown,
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Give the probe slot back without judging the host
    pub fn release(&self) {
        let mut inner = self.inner.write();
        if let State::HalfOpen { probing: true } = inner.state {
            inner.state = State::HalfOpen { probing: false };
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.inner.read().state {
            State::Closed => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Current cooldown, grows while probes keep failing
    pub fn cooldown(&self) -> Duration {
        self.inner.read().cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig::default()
                .failure_threshold(3)
                .cooldown(Duration::from_secs(10))
                .max_cooldown(Duration::from_secs(30)),
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker();
        cb.report_failure();
        cb.report_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow_request());

        cb.report_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_run() {
        let cb = breaker();
        cb.report_failure();
        cb.report_failure();
        cb.report_success();
        cb.report_failure();
        cb.report_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let cb = breaker();
        let start = Instant::now();
        for _ in 0..3 {
            cb.report_failure_at(start);
        }

        let later = start + Duration::from_secs(11);
        assert!(cb.allow_request_at(later));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(!cb.allow_request_at(later));
        assert!(!cb.allow_request_at(later));

        cb.report_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow_request_at(later));
    }

    #[test]
    fn test_failed_probe_doubles_cooldown() {
        let cb = breaker();
        let start = Instant::now();
        for _ in 0..3 {
            cb.report_failure_at(start);
        }

        let probe = start + Duration::from_secs(10);
        assert!(cb.allow_request_at(probe));
        cb.report_failure_at(probe);
        assert_eq!(cb.cooldown(), Duration::from_secs(20));
        assert!(!cb.allow_request_at(probe + Duration::from_secs(19)));
        assert!(cb.allow_request_at(probe + Duration::from_secs(20)));

        let probe = probe + Duration::from_secs(20);
        cb.report_failure_at(probe);
        assert_eq!(cb.cooldown(), Duration::from_secs(30));

        cb.report_success();
        assert_eq!(cb.cooldown(), Duration::from_secs(10));
    }

    #[test]
    fn test_release_frees_probe() {
        let cb = breaker();
        let start = Instant::now();
        for _ in 0..3 {
            cb.report_failure_at(start);
        }
        let later = start + Duration::from_secs(10);
        assert!(cb.allow_request_at(later));
        cb.release();
        assert!(cb.allow_request_at(later));
        assert!(!cb.allow_request_at(later));
    }
}
