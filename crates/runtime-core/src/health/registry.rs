//! The probe registry (spec §3 "Health registration", §5 "reader-preferring
//! mutex — writes only at startup, reads on every probe").

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Critical,
    NonCritical,
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type ProbeFn = Arc<dyn Fn() -> ProbeFuture + Send + Sync>;

#[derive(Clone)]
struct Entry {
    criticality: Criticality,
    probe: ProbeFn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Up,
    Down(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessStatus {
    Up,
    Degraded,
    Down,
}

impl ReadinessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessStatus::Up => "up",
            ReadinessStatus::Degraded => "degraded",
            ReadinessStatus::Down => "down",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ReadinessStatus::Up | ReadinessStatus::Degraded => 200,
            ReadinessStatus::Down => 503,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessReport {
    pub status: ReadinessStatus,
    pub checks: HashMap<String, (ProbeOutcome, Criticality)>,
}

const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Registry of health probes. Names are unique; registering a duplicate
/// name panics at startup (a programmer error, not a runtime condition).
pub struct HealthRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a probe under `name` with explicit `criticality`. There is
    /// no `register`-as-`register_critical` alias (spec §9b) — criticality
    /// is always named at the call site.
    pub async fn register<F, Fut>(&self, name: impl Into<String>, criticality: Criticality, probe: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let name = name.into();
        let probe: ProbeFn = Arc::new(move || Box::pin(probe()));
        let mut entries = self.entries.write().await;
        if entries.contains_key(&name) {
            panic!("duplicate health probe registration: {name}");
        }
        entries.insert(name, Entry { criticality, probe });
    }

    /// Runs every registered probe under a bounded deadline and aggregates
    /// the result (spec §3 readiness invariants, §4.3).
    pub async fn readiness(&self) -> ReadinessReport {
        let snapshot: Vec<(String, Entry)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut checks = HashMap::new();
        let mut any_critical_down = false;
        let mut any_down = false;

        for (name, entry) in snapshot {
            let outcome = match tokio::time::timeout(PROBE_DEADLINE, (entry.probe)()).await {
                Ok(Ok(())) => ProbeOutcome::Up,
                Ok(Err(e)) => ProbeOutcome::Down(e),
                Err(_) => ProbeOutcome::Down("probe deadline exceeded".to_string()),
            };
            if matches!(outcome, ProbeOutcome::Down(_)) {
                any_down = true;
                if entry.criticality == Criticality::Critical {
                    any_critical_down = true;
                }
            }
            checks.insert(name, (outcome, entry.criticality));
        }

        let status = if any_critical_down {
            ReadinessStatus::Down
        } else if any_down {
            ReadinessStatus::Degraded
        } else {
            ReadinessStatus::Up
        };

        ReadinessReport { status, checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_passing_probes_yield_up() {
        let registry = HealthRegistry::new();
        registry
            .register("postgres", Criticality::Critical, || async { Ok(()) })
            .await;
        let report = registry.readiness().await;
        assert_eq!(report.status, ReadinessStatus::Up);
    }

    #[tokio::test]
    async fn non_critical_failure_yields_degraded_200() {
        let registry = HealthRegistry::new();
        registry
            .register("postgres", Criticality::Critical, || async { Ok(()) })
            .await;
        registry
            .register("kafka", Criticality::NonCritical, || async {
                Err("broker unreachable".to_string())
            })
            .await;
        let report = registry.readiness().await;
        assert_eq!(report.status, ReadinessStatus::Degraded);
        assert_eq!(report.status.http_status(), 200);
    }

    #[tokio::test]
    async fn critical_failure_yields_down_503() {
        let registry = HealthRegistry::new();
        registry
            .register("postgres", Criticality::Critical, || async {
                Err("connection refused".to_string())
            })
            .await;
        let report = registry.readiness().await;
        assert_eq!(report.status, ReadinessStatus::Down);
        assert_eq!(report.status.http_status(), 503);
    }

    #[tokio::test]
    #[should_panic(expected = "duplicate health probe registration")]
    async fn duplicate_registration_panics() {
        let registry = HealthRegistry::new();
        registry.register("x", Criticality::Critical, || async { Ok(()) }).await;
        registry.register("x", Criticality::Critical, || async { Ok(()) }).await;
    }
}
