//! One consumer per topic, with an idempotency filter and DLQ diversion on
//! terminal handler failure (spec §4.4 "Consumer", "Failure semantics").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use tokio_util::sync::CancellationToken;

use super::idempotency::{IdempotencyKey, IdempotencyStore, IdempotentHandler};
use crate::error::RuntimeError;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    pub min_fetch_bytes: i32,
    pub max_fetch_bytes: i32,
    pub dlq_enabled: bool,
    pub max_handler_retries: u32,
}

impl ConsumerConfig {
    pub fn new(service: &str, topic: &str, brokers: &str) -> Self {
        Self {
            brokers: brokers.to_string(),
            group_id: format!("{service}-{topic}"),
            topic: topic.to_string(),
            min_fetch_bytes: 1,
            max_fetch_bytes: 1024 * 1024,
            dlq_enabled: true,
            max_handler_retries: 3,
        }
    }

    pub fn dlq_topic(&self) -> String {
        format!("{}.dlq", self.topic)
    }
}

/// The async handler invoked for every non-replayed message.
pub type MessageHandler =
    Arc<dyn Fn(MessagePayload) -> Pin<Box<dyn Future<Output = Result<(), RuntimeError>> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MessagePayload {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub event_id: Option<String>,
    pub bytes: Vec<u8>,
}

pub struct EventConsumer<S: IdempotencyStore> {
    config: ConsumerConfig,
    consumer: StreamConsumer,
    dlq_producer: FutureProducer,
    idempotency: IdempotentHandler<S>,
}

impl<S: IdempotencyStore + 'static> EventConsumer<S> {
    pub fn new(config: ConsumerConfig, idempotency_store: Arc<S>) -> Result<Self, RuntimeError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("fetch.min.bytes", config.min_fetch_bytes.to_string())
            .set("fetch.message.max.bytes", config.max_fetch_bytes.to_string())
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| RuntimeError::internal(format!("failed to create Kafka consumer: {e}")))?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| RuntimeError::internal(format!("failed to subscribe to {}: {e}", config.topic)))?;

        let dlq_producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .create()
            .map_err(|e| RuntimeError::internal(format!("failed to create DLQ producer: {e}")))?;

        Ok(Self {
            idempotency: IdempotentHandler::new(idempotency_store),
            config,
            consumer,
            dlq_producer,
        })
    }

    /// Runs until `shutdown` is triggered. Finishes processing the current
    /// message, then exits promptly (spec §5 "Kafka consumers finish the
    /// current message then exit").
    pub async fn run(&self, handler: MessageHandler, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(topic = %self.config.topic, "consumer loop shutting down");
                    return;
                }
                message = self.consumer.recv() => {
                    match message {
                        Ok(borrowed) => {
                            let payload = MessagePayload {
                                topic: borrowed.topic().to_string(),
                                partition: borrowed.partition(),
                                offset: borrowed.offset(),
                                key: borrowed.key().map(|k| String::from_utf8_lossy(k).to_string()),
                                event_id: extract_event_id(borrowed.payload()),
                                bytes: borrowed.payload().unwrap_or_default().to_vec(),
                            };
                            self.process_with_retry(&handler, payload).await;
                            if let Err(e) = self.consumer.commit_message(&borrowed, rdkafka::consumer::CommitMode::Async) {
                                tracing::error!(error = %e, "failed to commit Kafka offset");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(topic = %self.config.topic, error = %e, "Kafka fetch error, retrying");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    }

    async fn process_with_retry(&self, handler: &MessageHandler, payload: MessagePayload) {
        let key = IdempotencyKey::from_message(
            payload.event_id.as_deref(),
            &payload.topic,
            payload.partition,
            payload.offset,
        );

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let handler = handler.clone();
            let payload_clone = payload.clone();
            let result = self
                .idempotency
                .process(key.clone(), move || handler(payload_clone))
                .await;
            match result {
                Ok(()) => break Ok(()),
                Err(e) if attempt <= self.config.max_handler_retries => {
                    tracing::warn!(attempt, error = %e, "handler failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = outcome {
            tracing::error!(
                topic = %payload.topic,
                partition = payload.partition,
                offset = payload.offset,
                error = %e,
                "handler failed after bounded retries"
            );
            if self.config.dlq_enabled {
                self.send_to_dlq(&payload).await;
            } else {
                tracing::error!(
                    topic = %payload.topic,
                    "DLQ disabled, acknowledging failed message to avoid head-of-line blocking"
                );
            }
        }
    }

    async fn send_to_dlq(&self, payload: &MessagePayload) {
        let dlq_topic = self.config.dlq_topic();
        let record = FutureRecord::to(&dlq_topic)
            .payload(&payload.bytes)
            .key(payload.key.as_deref().unwrap_or(""));
        if let Err((e, _)) = self.dlq_producer.send(record, Timeout::After(Duration::from_secs(5))).await {
            tracing::error!(dlq_topic = %dlq_topic, error = %e, "failed to publish to DLQ");
        }
    }
}

fn extract_event_id(payload: Option<&[u8]>) -> Option<String> {
    let bytes = payload?;
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value.get("event_id")?.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_topic_suffixes_the_source_topic() {
        let config = ConsumerConfig::new("cart", "cart.updated", "localhost:9092");
        assert_eq!(config.dlq_topic(), "cart.updated.dlq");
        assert_eq!(config.group_id, "cart-cart.updated");
    }

    #[test]
    fn extracts_event_id_from_json_payload() {
        let payload = br#"{"event_id":"evt-7","aggregate_id":"cart-1"}"#;
        assert_eq!(extract_event_id(Some(payload)), Some("evt-7".to_string()));
        assert_eq!(extract_event_id(Some(b"not json")), None);
        assert_eq!(extract_event_id(None), None);
    }
}
