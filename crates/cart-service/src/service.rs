//! Cart business logic: the read-modify-`save_if_version` loop that turns
//! the domain model's pure mutations into committed, event-published state
//! changes (spec §4.6, §3 invariant vi "optimistic locking"). A lost race
//! surfaces as `Conflict` to the caller rather than being retried
//! in-process.

use std::sync::Arc;

use uuid::Uuid;

use runtime_core::error::RuntimeError;
use runtime_core::kafka::producer::EventProducer;

use crate::domain::{Cart, ItemError};
use crate::events::{publish_cart_cleared, publish_cart_updated};
use crate::repository::CartStore;

pub struct CartService<R: CartStore> {
    repository: Arc<R>,
    producer: Arc<EventProducer>,
}

impl<R: CartStore> CartService<R> {
    pub fn new(repository: Arc<R>, producer: Arc<EventProducer>) -> Self {
        Self { repository, producer }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Cart, RuntimeError> {
        self.repository.get(user_id).await
    }

    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        name: String,
        sku: String,
        unit_price_cents: i64,
        quantity: i32,
        image_url: Option<String>,
    ) -> Result<Cart, RuntimeError> {
        self.mutate(user_id, move |cart| {
            cart.add_item(product_id, variant_id, name, sku, unit_price_cents, quantity, image_url)
        })
        .await
    }

    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<Cart, RuntimeError> {
        self.mutate(user_id, |cart| cart.update_quantity(product_id, variant_id, quantity))
            .await
    }

    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid, variant_id: Uuid) -> Result<Cart, RuntimeError> {
        self.mutate(user_id, |cart| cart.remove_item(product_id, variant_id)).await
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<Cart, RuntimeError> {
        let cart = self
            .mutate(user_id, |cart| {
                cart.clear();
                Ok(())
            })
            .await?;
        publish_cart_cleared(&self.producer, &cart).await;
        Ok(cart)
    }

    /// Loads the cart, applies `mutation`, and commits with a single
    /// `save_if_version` attempt. A lost race surfaces as `Conflict`
    /// directly rather than retrying in-process: the caller is expected to
    /// retry (spec §4.6 "If `applied==false` the mutation fails with
    /// `Conflict`"; invariant 5 / E3 require exactly one 200 and one 409
    /// out of two concurrent callers racing the same version, which an
    /// automatic in-process retry would violate by letting both succeed).
    async fn mutate(
        &self,
        user_id: Uuid,
        mutation: impl FnOnce(&mut Cart) -> Result<(), ItemError>,
    ) -> Result<Cart, RuntimeError> {
        let mut cart = self.repository.get(user_id).await?;
        let expected_version = cart.version;
        mutation(&mut cart).map_err(map_item_error)?;

        if self.repository.save_if_version(&cart, expected_version).await? {
            publish_cart_updated(&self.producer, &cart).await;
            return Ok(cart);
        }
        Err(RuntimeError::conflict(
            "cart was modified concurrently, please retry",
        ))
    }
}

fn map_item_error(err: ItemError) -> RuntimeError {
    match err {
        ItemError::QuantityOutOfRange => RuntimeError::invalid_input("quantity must be between 1 and 100"),
        ItemError::PriceOutOfRange => RuntimeError::invalid_input("unit price is out of the allowed range"),
        ItemError::TooManyItems => RuntimeError::invalid_input("cart already holds the maximum number of line items"),
        ItemError::ItemNotFound => RuntimeError::not_found("cart item not found"),
    }
}
