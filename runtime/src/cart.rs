//! Cart Manager.
//!
//! Carts live in the ephemeral store and never hold stock. Every read re-validates each
//! line against current availability: lines for vanished products or products with no
//! stock left are dropped, and over-sized lines are clamped. Availability here is an
//! unlocked advisory read; the locking gate re-checks everything at checkout.

use std::sync::Arc;
use std::time::Duration;
use stockhold_core::{
    Cart, CartAdjustment, CartItem, CartStore, CartView, CheckoutLine, Clock, InventoryError,
    InventoryStore, ProductId, RemovalReason, Result, SessionId, TenantId,
};

use crate::config::{InventoryConfig, to_chrono};
use crate::metrics;

/// Reads and edits shopper carts.
pub struct CartManager<C, S> {
    carts: Arc<C>,
    inventory: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<C: CartStore, S: InventoryStore> CartManager<C, S> {
    /// Create a cart manager. Carts are kept for `config.cart_ttl` after their last write.
    #[must_use]
    pub fn new(
        carts: Arc<C>,
        inventory: Arc<S>,
        clock: Arc<dyn Clock>,
        config: &InventoryConfig,
    ) -> Self {
        Self {
            carts,
            inventory,
            clock,
            ttl: config.cart_ttl,
        }
    }

    /// Load and re-validate a cart.
    ///
    /// A missing or expired cart reads as empty. Corrections are persisted so the
    /// shopper sees them once.
    ///
    /// # Errors
    ///
    /// Propagates cart store and inventory read failures.
    pub async fn get(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<CartView> {
        let Some(cart) = self.carts.load(tenant_id, session_id).await? else {
            return Ok(CartView {
                cart: Cart::new(tenant_id, session_id.clone(), self.clock.now()),
                adjustments: Vec::new(),
            });
        };

        let view = self.revalidate(cart).await?;
        if view.was_adjusted() {
            self.save(&view.cart).await?;
            tracing::info!(
                tenant_id = %tenant_id,
                session_id = %session_id,
                adjustments = view.adjustments.len(),
                "Cart adjusted to current availability"
            );
        }
        Ok(view)
    }

    /// Add units of a product, merging with an existing line.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidQuantity`]: zero quantity
    /// - [`InventoryError::ProductNotFound`]: product missing or archived
    /// - [`InventoryError::InsufficientStock`]: the merged line exceeds availability
    pub async fn add_item(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
        item: CartItem,
    ) -> Result<CartView> {
        if item.quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id: item.product_id,
                quantity: 0,
            });
        }

        let mut cart = self.load_or_new(tenant_id, session_id).await?;
        let existing = cart.item(item.product_id).map_or(0, |line| line.quantity);
        let requested = existing.saturating_add(item.quantity);
        self.ensure_available(tenant_id, item.product_id, requested)
            .await?;

        match cart.item_mut(item.product_id) {
            Some(line) => {
                line.quantity = requested;
                line.product_name = item.product_name;
                line.unit_price = item.unit_price;
            }
            None => cart.items.push(item),
        }
        self.store_edit(cart).await
    }

    /// Set the quantity of an existing line. Zero removes the line.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::CartItemNotFound`]: no line for this product
    /// - [`InventoryError::ProductNotFound`]: product missing or archived
    /// - [`InventoryError::InsufficientStock`]: quantity exceeds availability
    pub async fn update_item(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartView> {
        let mut cart = self.load_or_new(tenant_id, session_id).await?;
        if cart.item(product_id).is_none() {
            return Err(InventoryError::CartItemNotFound { product_id });
        }

        if quantity == 0 {
            cart.remove(product_id);
        } else {
            self.ensure_available(tenant_id, product_id, quantity).await?;
            if let Some(line) = cart.item_mut(product_id) {
                line.quantity = quantity;
            }
        }
        self.store_edit(cart).await
    }

    /// Remove a line. Removing an absent line is not an error.
    ///
    /// # Errors
    ///
    /// Propagates cart store failures.
    pub async fn remove_item(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
        product_id: ProductId,
    ) -> Result<CartView> {
        let mut cart = self.load_or_new(tenant_id, session_id).await?;
        cart.remove(product_id);
        self.store_edit(cart).await
    }

    /// Delete the cart.
    ///
    /// # Errors
    ///
    /// Propagates cart store failures.
    pub async fn clear(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<()> {
        self.carts.delete(tenant_id, session_id).await?;
        tracing::debug!(tenant_id = %tenant_id, session_id = %session_id, "Cart cleared");
        Ok(())
    }

    /// Re-validated lines ready to hand to checkout.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::EmptyCart`] if nothing is left after re-validation.
    pub async fn checkout_lines(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
    ) -> Result<Vec<CheckoutLine>> {
        let view = self.get(tenant_id, session_id).await?;
        if view.cart.is_empty() {
            return Err(InventoryError::EmptyCart);
        }
        Ok(view
            .cart
            .items
            .iter()
            .map(|item| CheckoutLine::new(item.product_id, item.quantity))
            .collect())
    }

    async fn load_or_new(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<Cart> {
        Ok(self
            .carts
            .load(tenant_id, session_id)
            .await?
            .unwrap_or_else(|| Cart::new(tenant_id, session_id.clone(), self.clock.now())))
    }

    /// Advisory availability; `None` when the product is missing or archived.
    async fn availability(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<u32>> {
        let Some(product) = self
            .inventory
            .product(tenant_id, product_id)
            .await?
            .filter(|product| !product.archived)
        else {
            return Ok(None);
        };
        let active = self.inventory.active_quantity(tenant_id, product_id).await?;
        Ok(Some(product.available(active)))
    }

    async fn ensure_available(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        requested: u32,
    ) -> Result<()> {
        let available = self
            .availability(tenant_id, product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound { product_id })?;
        if requested > available {
            return Err(InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            });
        }
        Ok(())
    }

    async fn revalidate(&self, mut cart: Cart) -> Result<CartView> {
        let mut adjustments = Vec::new();
        let mut kept = Vec::with_capacity(cart.items.len());

        for mut item in std::mem::take(&mut cart.items) {
            match self.availability(cart.tenant_id, item.product_id).await? {
                None => {
                    metrics::record_cart_adjustment("removed");
                    adjustments.push(CartAdjustment::Removed {
                        product_id: item.product_id,
                        reason: RemovalReason::ProductUnavailable,
                    });
                }
                Some(0) => {
                    metrics::record_cart_adjustment("removed");
                    adjustments.push(CartAdjustment::Removed {
                        product_id: item.product_id,
                        reason: RemovalReason::OutOfStock,
                    });
                }
                Some(available) if available < item.quantity => {
                    metrics::record_cart_adjustment("clamped");
                    adjustments.push(CartAdjustment::Clamped {
                        product_id: item.product_id,
                        requested: item.quantity,
                        available,
                    });
                    item.quantity = available;
                    kept.push(item);
                }
                Some(_) => kept.push(item),
            }
        }

        cart.items = kept;
        if !adjustments.is_empty() {
            cart.updated_at = self.clock.now();
        }
        Ok(CartView { cart, adjustments })
    }

    async fn store_edit(&self, mut cart: Cart) -> Result<CartView> {
        cart.updated_at = self.clock.now();
        let view = self.revalidate(cart).await?;
        self.save(&view.cart).await?;
        Ok(view)
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        self.carts.save(cart, to_chrono(self.ttl)?).await
    }
}

impl<C, S> std::fmt::Debug for CartManager<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
