//! Resilient HTTP client: connection pooling (via `reqwest`), per-attempt
//! deadlines, bounded retries, and circuit-breaker protection, with
//! downstream error envelope translation (spec §4.1).

pub mod circuit_breaker;
pub mod error_mapping;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use tokio::sync::RwLock;

use crate::context::RequestContext;
use crate::error::{ErrorCode, RuntimeError};
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPhase};
use retry::{is_retryable_status, RetryPolicy};

static BREAKER_PHASE_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new(
            "circuit_breaker_phase",
            "Circuit breaker phase (0=closed,1=half_open,2=open)",
        ),
        &["name"],
    )
    .expect("valid gauge opts")
});

static FALLBACK_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("circuit_breaker_fallback_total", "Fallback invocations by breaker name"),
        &["name"],
    )
    .expect("valid counter opts")
});

/// Registers the client's Prometheus collectors. Idempotent-safe to call
/// once per process; the lifecycle module calls this during startup.
pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(BREAKER_PHASE_GAUGE.clone()))?;
    registry.register(Box::new(FALLBACK_COUNTER.clone()))?;
    Ok(())
}

fn observe_phase(name: &str, phase: CircuitPhase) {
    BREAKER_PHASE_GAUGE
        .with_label_values(&[name])
        .set(phase as u8 as f64);
}

/// A peer-scoped resilient client: one per downstream service, so the
/// breaker is chosen at the call site (spec §9 "Breaker identity").
pub struct ResilientClient {
    name: String,
    inner: reqwest::Client,
    retry_policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

pub struct ResilientClientConfig {
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    pub connect_timeout: Duration,
}

impl Default for ResilientClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl ResilientClient {
    pub fn new(name: impl Into<String>, config: ResilientClientConfig) -> reqwest::Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        let name = name.into();
        Ok(Self {
            breaker: CircuitBreaker::new(name.clone(), config.breaker),
            name,
            inner,
            retry_policy: config.retry,
        })
    }

    pub fn breaker_snapshot(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    /// Executes `request` with retry + circuit-breaker protection. `ctx`
    /// supplies the deadline that bounds retry waits; cancellation always
    /// wins and stops further attempts immediately (spec §5).
    ///
    /// `fallback` is invoked, if provided, when the breaker rejects the call
    /// outright; its invocation is counted against the fallback metric.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        request: reqwest::Request,
        fallback: Option<&(dyn Fn() -> RawResponse + Send + Sync)>,
    ) -> Result<RawResponse, RuntimeError> {
        if let Err(_rejected) = self.breaker.admit().await {
            observe_phase(&self.name, self.breaker.phase());
            if let Some(f) = fallback {
                FALLBACK_COUNTER.with_label_values(&[&self.name]).inc();
                return Ok(f());
            }
            return Err(RuntimeError::circuit_open(format!(
                "circuit '{}' is open",
                self.name
            )));
        }

        let outcome = self.attempt_with_retries(ctx, request).await;
        observe_phase(&self.name, self.breaker.phase());

        match &outcome {
            Ok(resp) => {
                self.breaker.record(resp.status < 500).await;
            }
            Err(err) => {
                // 4xx responses (InvalidInput/Unauthorized/.../PaymentFailed,
                // Conflict, Gone) are client errors, not breaker failures
                // (spec invariant 4). Only transport failures and 5xx
                // downstream errors, both of which map to Internal or
                // ServiceUnavailable, count against the breaker.
                let is_breaker_failure =
                    matches!(err.code, ErrorCode::Internal | ErrorCode::ServiceUnavailable);
                self.breaker.record(!is_breaker_failure).await;
            }
        }
        outcome
    }

    async fn attempt_with_retries(
        &self,
        ctx: &RequestContext,
        request: reqwest::Request,
    ) -> Result<RawResponse, RuntimeError> {
        let mut attempt: u32 = 0;
        let mut last_error: Option<RuntimeError> = None;

        loop {
            attempt += 1;
            if let Some(remaining) = ctx.remaining() {
                if remaining.is_zero() {
                    return Err(RuntimeError::service_unavailable(
                        "request canceled: deadline exceeded",
                    ));
                }
            }

            let cloned = request.try_clone();
            let send_result = match cloned {
                Some(req) => self.inner.execute(req).await,
                None => self.inner.execute(shallow_clone(&request)).await,
            };

            match send_result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers = response
                        .headers()
                        .iter()
                        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                        .collect();
                    let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

                    if (200..300).contains(&status) {
                        return Ok(RawResponse { status, body, headers });
                    }

                    if !is_retryable_status(status) {
                        return Err(error_mapping::map_downstream_error(status, &body));
                    }
                    if attempt > self.retry_policy.max_retries {
                        let mut err = error_mapping::map_downstream_error(status, &body);
                        err.message = format!("{} (after {attempt} attempts)", err.message);
                        return Err(err);
                    }
                    last_error = Some(error_mapping::map_downstream_error(status, &body));
                }
                Err(e) => {
                    if e.is_timeout() || e.is_connect() {
                        if attempt > self.retry_policy.max_retries {
                            return Err(RuntimeError::service_unavailable(format!(
                                "transport error after {attempt} attempts: {e}"
                            )));
                        }
                        last_error = Some(RuntimeError::service_unavailable(format!("{e}")));
                    } else {
                        return Err(RuntimeError::service_unavailable(format!("{e}")));
                    }
                }
            }

            let wait = self.retry_policy.backoff(attempt);
            let wait = match ctx.remaining() {
                Some(remaining) => wait.min(remaining),
                None => wait,
            };
            tokio::time::sleep(wait).await;
            if ctx.is_expired() {
                return Err(last_error.unwrap_or_else(|| {
                    RuntimeError::service_unavailable("request canceled: deadline exceeded")
                }));
            }
        }
    }
}

/// `reqwest::Request` bodies that are streams cannot be cloned; for the
/// runtime's JSON-bodied peer calls this path is unreachable in practice,
/// but we fail safe by re-issuing the same method/url/headers without body
/// rather than panicking.
fn shallow_clone(request: &reqwest::Request) -> reqwest::Request {
    reqwest::Request::new(request.method().clone(), request.url().clone())
}

static BREAKER_REGISTRY: Lazy<RwLock<HashMap<String, Arc<CircuitBreaker>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the process-wide breaker for `name`, creating it with `config`
/// on first use. Subsequent calls with a different `config` are ignored —
/// breakers are configured once, at first construction, the way the
/// teacher's `CircuitBreaker::new` is called once per route.
pub async fn named_breaker(name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
    if let Some(existing) = BREAKER_REGISTRY.read().await.get(name) {
        return existing.clone();
    }
    let mut guard = BREAKER_REGISTRY.write().await;
    guard
        .entry(name.to_string())
        .or_insert_with(|| CircuitBreaker::new(name, config))
        .clone()
}
