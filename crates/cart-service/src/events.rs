//! `cart.updated` / `cart.cleared` event publication (spec §4.6, §6 "Kafka
//! topics"). Publish failures are logged and swallowed: the write to
//! Postgres already committed, and losing an event must never roll back or
//! fail the customer-facing request (spec §4.4 "producer publish failure is
//! non-fatal to the caller").

use uuid::Uuid;

use runtime_core::kafka::producer::{DomainEvent, EventProducer};

use crate::domain::Cart;

pub const TOPIC_CART_UPDATED: &str = "cart.updated";
pub const TOPIC_CART_CLEARED: &str = "cart.cleared";

#[derive(Debug, serde::Serialize)]
struct CartSnapshot {
    user_id: Uuid,
    items: Vec<crate::domain::CartItem>,
    currency: String,
    version: i64,
}

impl From<&Cart> for CartSnapshot {
    fn from(cart: &Cart) -> Self {
        Self {
            user_id: cart.user_id,
            items: cart.items.clone(),
            currency: cart.currency.clone(),
            version: cart.version,
        }
    }
}

pub async fn publish_cart_updated(producer: &EventProducer, cart: &Cart) {
    publish(producer, TOPIC_CART_UPDATED, cart).await;
}

pub async fn publish_cart_cleared(producer: &EventProducer, cart: &Cart) {
    publish(producer, TOPIC_CART_CLEARED, cart).await;
}

async fn publish(producer: &EventProducer, topic: &str, cart: &Cart) {
    let event = DomainEvent {
        event_id: Uuid::new_v4().to_string(),
        aggregate_id: cart.user_id.to_string(),
        occurred_at: chrono::Utc::now(),
        payload: CartSnapshot::from(cart),
    };
    if let Err(e) = producer.publish(topic, &event).await {
        tracing::warn!(topic, cart_id = %cart.user_id, error = %e, "failed to publish cart event");
    }
}
