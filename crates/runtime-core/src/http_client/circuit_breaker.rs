//! Circuit breaker protecting calls to a named downstream peer.
//!
//! Generalizes the teacher's consecutive-failure breaker into the
//! sliding-window breaker spec.md §4.1/§4.2 describes: a breaker trips to
//! `Open` when, over the rolling `interval`, at least `min_requests` calls
//! have been observed and the failure ratio meets `failure_ratio`. After
//! `timeout` elapses in `Open`, the breaker allows up to `max_requests`
//! concurrent probes in `HalfOpen`; one success closes it, one failure
//! reopens it.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Phase of a circuit breaker, numerically encoded for the Prometheus gauge
/// (`Closed=0, HalfOpen=1, Open=2`, matching spec §4.1 "Metrics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl From<u8> for CircuitPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitPhase::HalfOpen,
            2 => CircuitPhase::Open,
            _ => CircuitPhase::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Rolling window over which requests/failures are counted in `Closed`.
    pub interval: Duration,
    /// Minimum requests observed in `interval` before the ratio is evaluated.
    pub min_requests: u64,
    /// Failures / requests ratio at or above which the breaker trips.
    pub failure_ratio: f64,
    /// Time spent `Open` before transitioning to `HalfOpen`.
    pub timeout: Duration,
    /// Concurrent probes admitted while `HalfOpen`.
    pub max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            min_requests: 3,
            failure_ratio: 0.5,
            timeout: Duration::from_millis(100),
            max_requests: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub phase: CircuitPhase,
    pub requests: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

struct Window {
    requests: u64,
    failures: u64,
    started_at: Instant,
}

impl Window {
    fn fresh() -> Self {
        Self {
            requests: 0,
            failures: 0,
            started_at: Instant::now(),
        }
    }
}

/// A single named breaker. Cheap to clone (wraps `Arc`-able state once
/// constructed via [`CircuitBreaker::new`]).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    phase: AtomicU8,
    consecutive_failures: AtomicU64,
    half_open_admitted: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    window: RwLock<Window>,
}

/// Error returned when a call is rejected without reaching the downstream.
#[derive(Debug, thiserror::Error)]
#[error("circuit '{0}' is open")]
pub struct CircuitOpenError(pub String);

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            phase: AtomicU8::new(CircuitPhase::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            half_open_admitted: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            window: RwLock::new(Window::fresh()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> CircuitPhase {
        CircuitPhase::from(self.phase.load(Ordering::Acquire))
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let window = self.window.read().await;
        BreakerSnapshot {
            phase: self.phase(),
            requests: window.requests,
            failures: window.failures,
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
        }
    }

    /// Called before issuing a downstream call. Returns `Err` if the call
    /// must fail fast; on `Ok`, the caller must invoke [`Self::record`]
    /// exactly once with the outcome, including in the `HalfOpen` probe
    /// path where `Ok(true)` marks it a counted probe.
    pub async fn admit(self: &Arc<Self>) -> Result<bool, CircuitOpenError> {
        match self.phase() {
            CircuitPhase::Closed => Ok(false),
            CircuitPhase::Open => {
                let should_probe = {
                    let opened_at = self.opened_at.read().await;
                    match *opened_at {
                        Some(t) => t.elapsed() >= self.config.timeout,
                        None => true,
                    }
                };
                if should_probe {
                    self.transition(CircuitPhase::HalfOpen).await;
                    self.admit_half_open()
                } else {
                    Err(CircuitOpenError(self.name.clone()))
                }
            }
            CircuitPhase::HalfOpen => self.admit_half_open(),
        }
    }

    fn admit_half_open(self: &Arc<Self>) -> Result<bool, CircuitOpenError> {
        let admitted = self.half_open_admitted.fetch_add(1, Ordering::AcqRel);
        if admitted < self.config.max_requests {
            Ok(true)
        } else {
            self.half_open_admitted.fetch_sub(1, Ordering::AcqRel);
            Err(CircuitOpenError(self.name.clone()))
        }
    }

    /// Records the outcome of a call admitted by [`Self::admit`].
    pub async fn record(self: &Arc<Self>, success: bool) {
        match self.phase() {
            CircuitPhase::HalfOpen => {
                self.half_open_admitted.fetch_sub(1, Ordering::AcqRel);
                if success {
                    self.reset_to_closed().await;
                } else {
                    self.trip_open().await;
                }
            }
            CircuitPhase::Closed => {
                self.roll_window_if_due().await;
                let (requests, failures) = {
                    let mut window = self.window.write().await;
                    window.requests += 1;
                    if !success {
                        window.failures += 1;
                    }
                    (window.requests, window.failures)
                };
                if success {
                    self.consecutive_failures.store(0, Ordering::Release);
                } else {
                    self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
                }
                if requests >= self.config.min_requests
                    && (failures as f64 / requests as f64) >= self.config.failure_ratio
                {
                    self.trip_open().await;
                }
            }
            CircuitPhase::Open => {
                // A racing call recorded after the breaker tripped; ignore.
            }
        }
    }

    async fn roll_window_if_due(&self) {
        let mut window = self.window.write().await;
        if window.started_at.elapsed() >= self.config.interval {
            *window = Window::fresh();
        }
    }

    async fn trip_open(self: &Arc<Self>) {
        *self.opened_at.write().await = Some(Instant::now());
        self.half_open_admitted.store(0, Ordering::Release);
        self.transition(CircuitPhase::Open).await;
        tracing::warn!(breaker = %self.name, "circuit breaker opened");
    }

    async fn reset_to_closed(self: &Arc<Self>) {
        *self.window.write().await = Window::fresh();
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_admitted.store(0, Ordering::Release);
        self.transition(CircuitPhase::Closed).await;
        tracing::info!(breaker = %self.name, "circuit breaker closed");
    }

    async fn transition(&self, to: CircuitPhase) {
        self.phase.store(to as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            interval: Duration::from_secs(10),
            min_requests: 3,
            failure_ratio: 0.5,
            timeout: Duration::from_millis(50),
            max_requests: 1,
        }
    }

    #[tokio::test]
    async fn opens_no_earlier_than_min_requests_at_threshold_ratio() {
        let breaker = CircuitBreaker::new("peer", config());
        for _ in 0..2 {
            breaker.admit().await.unwrap();
            breaker.record(false).await;
        }
        assert_eq!(breaker.phase(), CircuitPhase::Closed);

        breaker.admit().await.unwrap();
        breaker.record(false).await;
        assert_eq!(breaker.phase(), CircuitPhase::Open);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_admitting() {
        let breaker = CircuitBreaker::new("peer", config());
        for _ in 0..3 {
            breaker.admit().await.unwrap();
            breaker.record(false).await;
        }
        assert_eq!(breaker.phase(), CircuitPhase::Open);
        assert!(breaker.admit().await.is_err());
    }

    #[tokio::test]
    async fn half_open_success_closes_failure_reopens() {
        let breaker = CircuitBreaker::new("peer", config());
        for _ in 0..3 {
            breaker.admit().await.unwrap();
            breaker.record(false).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        breaker.admit().await.unwrap();
        assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
        breaker.record(true).await;
        assert_eq!(breaker.phase(), CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_at_most_max_requests_concurrently() {
        let mut cfg = config();
        cfg.max_requests = 1;
        let breaker = CircuitBreaker::new("peer", cfg);
        for _ in 0..3 {
            breaker.admit().await.unwrap();
            breaker.record(false).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        breaker.admit().await.unwrap();
        assert!(breaker.admit().await.is_err());
    }
}
