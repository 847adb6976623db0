//! Application lifecycle (spec §4.5): composes the tracer, Postgres pool,
//! Kafka producer, health registry, and HTTP server into one `App`, with a
//! strict startup order and a strict, error-collecting shutdown order.
//!
//! Grounded in the teacher's `crates/kairos-gateway/src/main.rs` startup
//! sequencing (load config -> build services -> bind server -> run) and
//! `src/config/hot_reload.rs` for the signal-driven background task idiom
//! (`tokio::time::interval` loop that exits on a cancellation signal).

pub mod ticker;

use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::ServerHandle;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::health::{Criticality, HealthRegistry};
use crate::kafka::{EventProducer, ProducerConfig};
use crate::observability::{self, TracerGuard};
use ticker::HousekeepingTicker;

const HTTP_DRAIN_BUDGET: Duration = Duration::from_secs(5);
const TRACER_FLUSH_BUDGET: Duration = Duration::from_secs(3);
const CONSUMER_CLOSE_BUDGET: Duration = Duration::from_secs(2);
const PRODUCER_CLOSE_BUDGET: Duration = Duration::from_secs(2);

/// Everything started during bootstrap that shutdown must tear down, in
/// the strict order spec §4.5 "Shutdown order" specifies.
pub struct App {
    pub pg_pool: PgPool,
    pub kafka_producer: Arc<EventProducer>,
    pub health_registry: Arc<HealthRegistry>,
    tracer_guard: Option<TracerGuard>,
    server_handle: Option<ServerHandle>,
    consumer_shutdown: CancellationToken,
    consumer_tasks: Vec<JoinHandle<()>>,
    ticker_shutdown: CancellationToken,
    ticker_tasks: Vec<JoinHandle<()>>,
}

/// Every error collected during a lifecycle stage, joined rather than
/// short-circuited (spec §4.5, §8 invariant 9: "all five stages run even
/// if step 1 fails").
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl App {
    /// Runs the fixed startup sequence: tracer -> Postgres pool (+
    /// metrics) -> embedded migrations -> Kafka producer (retrying ping,
    /// non-fatal) -> critical/non-critical health probe registration.
    /// Router construction and server binding are left to the caller
    /// (`cart-service`'s `main.rs`), which owns its own routes; `App` only
    /// owns the shared runtime pieces plus the eventual `ServerHandle`.
    pub async fn bootstrap(
        service_name: &str,
        postgres_url: &str,
        db_max_conns: u32,
        kafka_brokers: &str,
        otlp_endpoint: Option<&str>,
        migrator: &sqlx::migrate::Migrator,
        metrics_registry: &prometheus::Registry,
    ) -> Result<Self, RuntimeError> {
        let tracer_guard = observability::init_tracing(service_name, otlp_endpoint)?;

        let pg_pool = PgPoolOptions::new()
            .max_connections(db_max_conns)
            .connect(postgres_url)
            .await
            .map_err(|e| RuntimeError::internal(format!("failed to open Postgres pool: {e}")))?;
        crate::http_client::register_metrics(metrics_registry).ok();
        crate::middleware::metrics::register_metrics(metrics_registry).ok();

        migrator
            .run(&pg_pool)
            .await
            .map_err(|e| RuntimeError::internal(format!("failed to run migrations: {e}")))?;

        let kafka_producer = Arc::new(EventProducer::new(&ProducerConfig {
            brokers: kafka_brokers.to_string(),
            client_id: service_name.to_string(),
            ..Default::default()
        })?);
        let kafka_degraded = !kafka_producer.ping_with_retry().await;

        let health_registry = Arc::new(HealthRegistry::new());
        {
            let pool = pg_pool.clone();
            health_registry
                .register("postgres", Criticality::Critical, move || {
                    let pool = pool.clone();
                    async move {
                        sqlx::query("SELECT 1")
                            .execute(&pool)
                            .await
                            .map(|_| ())
                            .map_err(|e| e.to_string())
                    }
                })
                .await;
        }
        {
            let producer = kafka_producer.clone();
            health_registry
                .register("kafka", Criticality::NonCritical, move || {
                    let producer = producer.clone();
                    async move { producer.ping().await.map_err(|e| e.to_string()) }
                })
                .await;
        }
        if kafka_degraded {
            tracing::warn!("starting in degraded mode: Kafka producer ping failed at startup");
        }

        Ok(Self {
            pg_pool,
            kafka_producer,
            health_registry,
            tracer_guard: Some(tracer_guard),
            server_handle: None,
            consumer_shutdown: CancellationToken::new(),
            consumer_tasks: Vec::new(),
            ticker_shutdown: CancellationToken::new(),
            ticker_tasks: Vec::new(),
        })
    }

    pub fn set_server_handle(&mut self, handle: ServerHandle) {
        self.server_handle = Some(handle);
    }

    /// Registers a long-running consumer loop under this app's shared
    /// shutdown token. Each consumer gets its own supervisor task.
    pub fn spawn_consumer<F>(&mut self, run: F)
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        self.consumer_tasks.push(run(self.consumer_shutdown.clone()));
    }

    /// Registers a housekeeping ticker (spec §4.5 "reservation-cleanup
    /// ticker... or similar"). A service with nothing to sweep registers
    /// zero tickers; the supervisor still runs for services that do.
    pub fn spawn_ticker(&mut self, ticker: Arc<dyn HousekeepingTicker>) {
        let shutdown = self.ticker_shutdown.clone();
        self.ticker_tasks.push(tokio::spawn(async move {
            ticker::run_ticker(ticker, shutdown).await;
        }));
    }

    /// Runs the strict shutdown order. Every stage runs regardless of
    /// earlier failures; all errors are collected and returned joined.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        if let Some(handle) = self.server_handle.take() {
            let drained = tokio::time::timeout(HTTP_DRAIN_BUDGET, handle.stop(true)).await;
            if drained.is_err() {
                report.errors.push("HTTP server drain exceeded its 5s budget".to_string());
            }
        }

        if let Some(guard) = self.tracer_guard.take() {
            let flushed = tokio::time::timeout(TRACER_FLUSH_BUDGET, async {
                guard.flush();
                guard.shutdown();
            })
            .await;
            if flushed.is_err() {
                report.errors.push("tracer flush exceeded its 3s budget".to_string());
            }
        }

        self.consumer_shutdown.cancel();
        self.ticker_shutdown.cancel();
        for task in self.consumer_tasks.drain(..) {
            if tokio::time::timeout(CONSUMER_CLOSE_BUDGET, task).await.is_err() {
                report.errors.push("a Kafka consumer did not close within its 2s budget".to_string());
            }
        }
        for task in self.ticker_tasks.drain(..) {
            let _ = tokio::time::timeout(CONSUMER_CLOSE_BUDGET, task).await;
        }

        if tokio::time::timeout(PRODUCER_CLOSE_BUDGET, self.kafka_producer.close())
            .await
            .is_err()
        {
            report.errors.push("Kafka producer did not close within its 2s budget".to_string());
        }

        self.pg_pool.close().await;

        if report.is_clean() {
            tracing::info!("shutdown completed cleanly");
        } else {
            tracing::warn!(errors = ?report.errors, "shutdown completed with errors");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_report_starts_clean() {
        let report = ShutdownReport::default();
        assert!(report.is_clean());
    }
}
