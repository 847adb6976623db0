//! Kafka producer/consumer core (spec §4.4): an idempotent-delivery
//! wrapper around `rdkafka`'s `FutureProducer`/`StreamConsumer`, grounded
//! in the `other_examples/` Kafka files the pack retrieved (no Kafka code
//! exists in the teacher) — see DESIGN.md.

pub mod consumer;
pub mod idempotency;
pub mod producer;

pub use consumer::{ConsumerConfig, EventConsumer, MessageHandler, MessagePayload};
pub use idempotency::{IdempotencyKey, IdempotencyStore, IdempotentHandler, InMemoryIdempotencyStore};
pub use producer::{DomainEvent, EventProducer, ProducerConfig};
