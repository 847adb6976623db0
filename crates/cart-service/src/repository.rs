//! Postgres-backed cart repository implementing the read-modify-
//! `SaveIfVersion` optimistic-concurrency loop (spec §4.6, §3 invariant vi).
//!
//! Items are stored as a JSONB column rather than a child table: the cart
//! aggregate is always read and written whole, and `version` is the single
//! compare-and-swap point, matching the generic CAS idiom `DESIGN.md`
//! grounds on the pack's event-sourced outbox example.

use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{Cart, CartItem};
use runtime_core::error::RuntimeError;

/// The read-modify-`save_if_version` abstraction [`crate::service::CartService`]
/// is generic over, so the optimistic-locking race it governs (spec §4.6,
/// §3 invariant vi) can be exercised against an in-memory fake in tests
/// without a live Postgres instance.
pub trait CartStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Cart, RuntimeError>;
    async fn save_if_version(&self, cart: &Cart, expected_version: i64) -> Result<bool, RuntimeError>;
}

pub struct CartRepository {
    pool: PgPool,
}

impl CartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CartStore for CartRepository {
    /// Returns the persisted cart, or a synthesized empty one (`version`
    /// `0`) if the user has no row yet (spec §4.6 "`Get` returns the
    /// user's cart or a synthesized empty one").
    async fn get(&self, user_id: Uuid) -> Result<Cart, RuntimeError> {
        let row = sqlx::query(
            "SELECT user_id, items, currency, version, created_at, updated_at, expires_at \
             FROM carts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::internal(format!("failed to load cart: {e}")))?;

        match row {
            Some(row) => {
                let items: serde_json::Value = row.try_get("items").map_err(db_err)?;
                let items: Vec<CartItem> =
                    serde_json::from_value(items).map_err(|e| RuntimeError::internal(format!("corrupt cart items: {e}")))?;
                Ok(Cart {
                    user_id: row.try_get("user_id").map_err(db_err)?,
                    items,
                    currency: row.try_get("currency").map_err(db_err)?,
                    version: row.try_get("version").map_err(db_err)?,
                    created_at: row.try_get("created_at").map_err(db_err)?,
                    updated_at: row.try_get("updated_at").map_err(db_err)?,
                    expires_at: row.try_get("expires_at").map_err(db_err)?,
                })
            }
            None => Ok(Cart::empty(user_id, "USD")),
        }
    }

    /// Commits `cart` iff the stored version still equals `expected_version`.
    /// `expected_version == 0` means "no row exists yet" and is handled as
    /// an insert; any other mismatch is a lost race and returns `false`
    /// without applying the write (spec §4.6 "the repository returns
    /// `(applied, err)`").
    async fn save_if_version(&self, cart: &Cart, expected_version: i64) -> Result<bool, RuntimeError> {
        let items = serde_json::to_value(&cart.items)
            .map_err(|e| RuntimeError::internal(format!("failed to serialize cart items: {e}")))?;
        let now = Utc::now();

        if expected_version == 0 {
            let result = sqlx::query(
                "INSERT INTO carts (user_id, items, currency, version, created_at, updated_at, expires_at) \
                 VALUES ($1, $2, $3, 1, $4, $4, $5) \
                 ON CONFLICT (user_id) DO NOTHING",
            )
            .bind(cart.user_id)
            .bind(&items)
            .bind(&cart.currency)
            .bind(now)
            .bind(cart.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::internal(format!("failed to insert cart: {e}")))?;
            return Ok(result.rows_affected() == 1);
        }

        let result = sqlx::query(
            "UPDATE carts SET items = $1, currency = $2, version = version + 1, \
             updated_at = $3, expires_at = $4 \
             WHERE user_id = $5 AND version = $6",
        )
        .bind(&items)
        .bind(&cart.currency)
        .bind(now)
        .bind(cart.expires_at)
        .bind(cart.user_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::internal(format!("failed to update cart: {e}")))?;

        Ok(result.rows_affected() == 1)
    }
}

fn db_err(e: sqlx::Error) -> RuntimeError {
    RuntimeError::internal(format!("failed to decode cart row: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_empty_cart_has_version_zero() {
        let cart = Cart::empty(Uuid::new_v4(), "USD");
        assert_eq!(cart.version, 0);
        assert!(cart.items.is_empty());
    }
}
