//! Cart domain model (spec §3 "Cart (reference)", §4.6). Pure data and
//! invariant-preserving mutation methods; persistence and event
//! publication live in [`crate::repository`] and [`crate::service`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_QUANTITY_PER_ITEM: i32 = 100;
pub const MAX_ITEMS_PER_CART: usize = 50;
pub const MAX_PRICE_CENTS: i64 = 10_000_000;
const CART_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub name: String,
    pub sku: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: Uuid,
    pub items: Vec<CartItem>,
    pub currency: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemError {
    QuantityOutOfRange,
    PriceOutOfRange,
    TooManyItems,
    ItemNotFound,
}

impl Cart {
    /// A synthesized empty cart for a user with no persisted row yet.
    /// `version` is `0`, meaning "not yet persisted" to the repository
    /// (spec §4.6 "`Get(userId)` returns the user's cart or a synthesized
    /// empty one").
    pub fn empty(user_id: Uuid, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            items: Vec::new(),
            currency: currency.into(),
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(CART_TTL_DAYS),
        }
    }

    fn refresh_timestamps(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.expires_at = now + chrono::Duration::days(CART_TTL_DAYS);
    }

    fn find_line(&self, product_id: Uuid, variant_id: Uuid) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.product_id == product_id && i.variant_id == variant_id)
    }

    /// Adds `quantity` units of `(product_id, variant_id)`. A duplicate
    /// key merges and accumulates quantity rather than creating a second
    /// line (spec §3 invariant i).
    pub fn add_item(
        &mut self,
        product_id: Uuid,
        variant_id: Uuid,
        name: String,
        sku: String,
        unit_price_cents: i64,
        quantity: i32,
        image_url: Option<String>,
    ) -> Result<(), ItemError> {
        if !(0..=MAX_PRICE_CENTS).contains(&unit_price_cents) {
            return Err(ItemError::PriceOutOfRange);
        }
        if let Some(idx) = self.find_line(product_id, variant_id) {
            let merged = self.items[idx].quantity + quantity;
            if merged < 1 || merged > MAX_QUANTITY_PER_ITEM {
                return Err(ItemError::QuantityOutOfRange);
            }
            self.items[idx].quantity = merged;
        } else {
            if !(1..=MAX_QUANTITY_PER_ITEM).contains(&quantity) {
                return Err(ItemError::QuantityOutOfRange);
            }
            if self.items.len() >= MAX_ITEMS_PER_CART {
                return Err(ItemError::TooManyItems);
            }
            self.items.push(CartItem {
                product_id,
                variant_id,
                name,
                sku,
                unit_price_cents,
                quantity,
                image_url,
            });
        }
        self.refresh_timestamps();
        Ok(())
    }

    /// Sets the line's quantity. `0` removes the line (spec §3 invariant v).
    pub fn update_quantity(&mut self, product_id: Uuid, variant_id: Uuid, quantity: i32) -> Result<(), ItemError> {
        let idx = self
            .find_line(product_id, variant_id)
            .ok_or(ItemError::ItemNotFound)?;
        if quantity == 0 {
            self.items.remove(idx);
        } else {
            if quantity > MAX_QUANTITY_PER_ITEM {
                return Err(ItemError::QuantityOutOfRange);
            }
            self.items[idx].quantity = quantity;
        }
        self.refresh_timestamps();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid, variant_id: Uuid) -> Result<(), ItemError> {
        let idx = self
            .find_line(product_id, variant_id)
            .ok_or(ItemError::ItemNotFound)?;
        self.items.remove(idx);
        self.refresh_timestamps();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.refresh_timestamps();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart() -> Cart {
        Cart::empty(Uuid::new_v4(), "USD")
    }

    #[test]
    fn adding_duplicate_key_merges_quantity() {
        let mut cart = cart();
        let (p, v) = (Uuid::new_v4(), Uuid::new_v4());
        cart.add_item(p, v, "Shirt".into(), "SKU-1".into(), 2000, 1, None).unwrap();
        cart.add_item(p, v, "Shirt".into(), "SKU-1".into(), 2000, 2, None).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
    }

    #[test]
    fn quantity_above_max_is_rejected() {
        let mut cart = cart();
        let (p, v) = (Uuid::new_v4(), Uuid::new_v4());
        let err = cart
            .add_item(p, v, "Shirt".into(), "SKU-1".into(), 2000, 101, None)
            .unwrap_err();
        assert_eq!(err, ItemError::QuantityOutOfRange);
    }

    #[test]
    fn price_above_max_is_rejected() {
        let mut cart = cart();
        let err = cart
            .add_item(Uuid::new_v4(), Uuid::new_v4(), "x".into(), "y".into(), MAX_PRICE_CENTS + 1, 1, None)
            .unwrap_err();
        assert_eq!(err, ItemError::PriceOutOfRange);
    }

    #[test]
    fn more_than_max_items_is_rejected() {
        let mut cart = cart();
        for _ in 0..MAX_ITEMS_PER_CART {
            cart.add_item(Uuid::new_v4(), Uuid::new_v4(), "x".into(), "y".into(), 100, 1, None)
                .unwrap();
        }
        let err = cart
            .add_item(Uuid::new_v4(), Uuid::new_v4(), "x".into(), "y".into(), 100, 1, None)
            .unwrap_err();
        assert_eq!(err, ItemError::TooManyItems);
    }

    #[test]
    fn setting_quantity_to_zero_removes_the_line() {
        let mut cart = cart();
        let (p, v) = (Uuid::new_v4(), Uuid::new_v4());
        cart.add_item(p, v, "x".into(), "y".into(), 100, 1, None).unwrap();
        cart.update_quantity(p, v, 0).unwrap();
        assert!(cart.items.is_empty());
    }

    #[test]
    fn updating_missing_line_is_not_found() {
        let mut cart = cart();
        let err = cart.update_quantity(Uuid::new_v4(), Uuid::new_v4(), 1).unwrap_err();
        assert_eq!(err, ItemError::ItemNotFound);
    }

    #[test]
    fn clear_empties_all_lines() {
        let mut cart = cart();
        cart.add_item(Uuid::new_v4(), Uuid::new_v4(), "x".into(), "y".into(), 100, 1, None)
            .unwrap();
        cart.clear();
        assert!(cart.items.is_empty());
    }
}
