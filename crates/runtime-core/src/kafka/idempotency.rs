//! Idempotency filter wrapping a Kafka message handler (spec §4.4, §3
//! "Idempotency record"). Keyed by business event id when present, else
//! `topic|partition|offset` (spec §9 "Idempotency strategy").
//!
//! The in-memory store below is the default `Store` impl; a Redis-backed
//! or table-backed store can implement the same trait without changing
//! callers, following the teacher's `services/metrics_store.rs`
//! `RwLock<HashMap<..>>`-behind-a-typed-API shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::RuntimeError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A processed message's observable identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    /// Prefers the business event id; falls back to the Kafka coordinate,
    /// which Kafka guarantees never reuses an offset within a partition.
    pub fn from_message(event_id: Option<&str>, topic: &str, partition: i32, offset: i64) -> Self {
        match event_id {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self(format!("{topic}|{partition}|{offset}")),
        }
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn contains(&self, key: &IdempotencyKey) -> bool;
    async fn record(&self, key: IdempotencyKey, ttl: Duration);
}

/// Default `HashMap<key, expiry>`-backed store behind a `tokio::sync::Mutex`.
/// Expired entries are swept lazily on `contains`/`record` rather than on a
/// background ticker, since the consumer loop already calls both on every
/// message.
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn sweep(entries: &mut HashMap<String, Instant>) {
        let now = Instant::now();
        entries.retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn contains(&self, key: &IdempotencyKey) -> bool {
        let mut entries = self.entries.lock().await;
        Self::sweep(&mut entries);
        entries.contains_key(&key.0)
    }

    async fn record(&self, key: IdempotencyKey, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        Self::sweep(&mut entries);
        entries.insert(key.0, Instant::now() + ttl);
    }
}

/// Wraps an async handler `F` with the idempotency filter: a replayed key
/// within TTL is acknowledged without invoking `handler` again.
pub struct IdempotentHandler<S> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: IdempotencyStore> IdempotentHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, ttl: DEFAULT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Runs `handler` unless `key` was already observed within TTL. On
    /// success the key is recorded; on failure it is left unrecorded so a
    /// retry can still invoke the handler.
    pub async fn process<F, Fut>(&self, key: IdempotencyKey, handler: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), RuntimeError>>,
    {
        if self.store.contains(&key).await {
            tracing::debug!(key = %key.0, "skipping already-processed message");
            return Ok(());
        }
        handler().await?;
        self.store.record(key, self.ttl).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn replaying_an_observed_key_does_not_reinvoke_handler() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let filter = IdempotentHandler::new(store);
        let calls = Arc::new(AtomicU32::new(0));

        let key = IdempotencyKey::from_message(Some("evt-1"), "cart.updated", 0, 5);
        for _ in 0..3 {
            let calls = calls.clone();
            filter
                .process(key.clone(), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_handler_leaves_key_unrecorded_for_retry() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let filter = IdempotentHandler::new(store);
        let key = IdempotencyKey::from_message(None, "cart.updated", 0, 1);

        let first = filter
            .process(key.clone(), || async { Err(RuntimeError::internal("boom")) })
            .await;
        assert!(first.is_err());

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        filter
            .process(key, || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn key_prefers_business_event_id_over_kafka_coordinate() {
        let key = IdempotencyKey::from_message(Some("evt-42"), "t", 0, 0);
        assert_eq!(key.0, "evt-42");
        let key = IdempotencyKey::from_message(None, "t", 2, 17);
        assert_eq!(key.0, "t|2|17");
    }
}
