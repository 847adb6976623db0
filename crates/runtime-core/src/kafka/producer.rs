//! Keyed Kafka producer (spec §4.4 "Producer"). Writes are keyed by a
//! domain identifier so `rdkafka`'s partitioner preserves per-key ordering;
//! startup performs a retrying liveness ping that is non-fatal on failure
//! (the service enters degraded mode per spec §4.5/§7 "Fatality").

use std::time::Duration;

use rand::Rng;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;

use crate::error::RuntimeError;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub brokers: String,
    pub client_id: String,
    pub send_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "runtime-core".to_string(),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Envelope published for every domain event: an id, aggregate id,
/// timestamp, and payload (spec §6 "Kafka topics").
#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent<T: Serialize> {
    pub event_id: String,
    pub aggregate_id: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub payload: T,
}

pub struct EventProducer {
    inner: FutureProducer,
    send_timeout: Duration,
}

impl EventProducer {
    pub fn new(config: &ProducerConfig) -> Result<Self, RuntimeError> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "lz4")
            .create()
            .map_err(|e| RuntimeError::internal(format!("failed to create Kafka producer: {e}")))?;

        Ok(Self {
            inner,
            send_timeout: config.send_timeout,
        })
    }

    /// Publishes `event` to `topic`, keyed by `event.aggregate_id` so every
    /// event for the same aggregate lands on the same partition (spec §4.4
    /// "per-key ordering", §5 "within one Kafka partition, message
    /// processing is strictly serial").
    pub async fn publish<T: Serialize>(&self, topic: &str, event: &DomainEvent<T>) -> Result<(), RuntimeError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| RuntimeError::internal(format!("failed to serialize event: {e}")))?;
        let record = FutureRecord::to(topic).key(&event.aggregate_id).payload(&payload);

        self.inner
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| RuntimeError::service_unavailable(format!("Kafka publish failed: {e}")))?;
        Ok(())
    }

    /// Liveness check used by readiness and startup: `rdkafka`'s client
    /// metadata fetch with a short timeout doubles as a connectivity probe.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        let producer = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Duration::from_secs(2))
                .map(|_| ())
                .map_err(|e| RuntimeError::service_unavailable(format!("Kafka ping failed: {e}")))
        })
        .await
        .map_err(|e| RuntimeError::internal(format!("ping task panicked: {e}")))?
    }

    /// Startup ping with exponential backoff (1s, 2s, 4s base, ±25% jitter,
    /// 3 attempts total per spec §4.4). Failure here is logged and
    /// swallowed — the caller enters degraded mode rather than aborting
    /// startup.
    pub async fn ping_with_retry(&self) -> bool {
        let bases = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];
        for (attempt, base) in bases.iter().enumerate() {
            match self.ping().await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Kafka startup ping failed");
                    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
                    let wait = base.mul_f64(1.0 + jitter);
                    tokio::time::sleep(wait).await;
                }
            }
        }
        tracing::error!("Kafka producer degraded: all startup ping attempts failed");
        false
    }

    pub async fn close(&self) {
        let producer = self.inner.clone();
        let _ = tokio::task::spawn_blocking(move || {
            producer.flush(Duration::from_secs(2)).ok();
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_event_serializes_with_expected_shape() {
        let event = DomainEvent {
            event_id: "evt-1".to_string(),
            aggregate_id: "cart-1".to_string(),
            occurred_at: chrono::Utc::now(),
            payload: serde_json::json!({"version": 2}),
        };
        let bytes = serde_json::to_vec(&event).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event_id"], "evt-1");
        assert_eq!(value["aggregate_id"], "cart-1");
    }
}
