//! Shopper carts and the ephemeral store that holds them.
//!
//! A cart is advisory: it never holds stock. Availability shown through a cart can be
//! stale by the time checkout runs; the Stock Locking Gate has the final word.

use crate::error::Result;
use crate::types::{ProductId, SessionId, TenantId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// One line of a cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product
    pub product_id: ProductId,
    /// Display name captured when the line was added
    pub product_name: String,
    /// Units the shopper intends to buy
    pub quantity: u32,
    /// Unit price in minor currency units
    pub unit_price: u64,
}

impl CartItem {
    /// Create a cart line
    #[must_use]
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: u64,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Quantity times unit price
    #[must_use]
    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(u64::from(self.quantity))
    }
}

/// A shopper's draft of intended purchases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Shopper session
    pub session_id: SessionId,
    /// Lines in insertion order
    pub items: Vec<CartItem>,
    /// Last write (drives the store TTL)
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Create an empty cart
    #[must_use]
    pub const fn new(tenant_id: TenantId, session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            session_id,
            items: Vec::new(),
            updated_at: now,
        }
    }

    /// Find the line for a product
    #[must_use]
    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Find the line for a product, mutably
    pub fn item_mut(&mut self, product_id: ProductId) -> Option<&mut CartItem> {
        self.items
            .iter_mut()
            .find(|item| item.product_id == product_id)
    }

    /// Remove the line for a product. Returns whether a line was removed.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.product_id != product_id);
        self.items.len() != before
    }

    /// Whether the cart has no lines
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of all line totals
    #[must_use]
    pub fn subtotal(&self) -> u64 {
        self.items.iter().map(CartItem::line_total).sum()
    }
}

/// Why a cart line was dropped during re-validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Product no longer exists or was archived
    ProductUnavailable,
    /// Product exists but nothing is available
    OutOfStock,
}

/// A correction applied to a cart when it was re-validated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartAdjustment {
    /// Line was dropped
    Removed {
        /// Dropped product
        product_id: ProductId,
        /// Why
        reason: RemovalReason,
    },
    /// Line quantity was clamped down to availability
    Clamped {
        /// Clamped product
        product_id: ProductId,
        /// Quantity before clamping
        requested: u32,
        /// Quantity after clamping
        available: u32,
    },
}

/// A re-validated cart plus the corrections applied to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    /// The cart after corrections
    pub cart: Cart,
    /// Corrections applied on this read
    pub adjustments: Vec<CartAdjustment>,
}

impl CartView {
    /// Whether the cart was auto-corrected on this read
    #[must_use]
    pub fn was_adjusted(&self) -> bool {
        !self.adjustments.is_empty()
    }
}

/// TTL-capable key-value store for carts, keyed by `(tenant_id, session_id)`.
pub trait CartStore: Send + Sync {
    /// Load a cart. Expired or missing carts yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or the payload is corrupt.
    fn load(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Option<Cart>>> + Send;

    /// Store a cart, replacing any previous one and resetting its TTL.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn save(&self, cart: &Cart, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Delete a cart. Deleting a missing cart is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn delete(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<()>> + Send;
}
