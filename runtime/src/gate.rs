//! Stock Locking Gate.
//!
//! The gate serializes every availability decision for a product behind that product's
//! row lock. Checkout takes the lock, computes
//!
//! ```text
//! available = stock_quantity - sum(quantity of active holds)
//! ```
//!
//! and either lets the caller insert holds while the lock is still held, or rejects with
//! the computed `available`. Multi-product requests lock rows in ascending product id
//! order so two checkouts touching overlapping products can never wait on each other in
//! a cycle.

use std::collections::{BTreeMap, BTreeSet};
use stockhold_core::{
    CheckoutLine, InventoryError, InventoryTransaction, ProductId, ProductStock, Result, TenantId,
};

/// Outcome of a successful availability check for one product.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StockCheck {
    /// Product that was locked and checked
    pub product_id: ProductId,
    /// Units requested (after merging duplicate lines)
    pub requested: u32,
    /// Units available before this request
    pub available: u32,
}

/// Locks product rows and decides availability under the lock.
#[derive(Clone, Copy, Debug, Default)]
pub struct StockLockingGate;

impl StockLockingGate {
    /// Create a gate
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Merge duplicate product lines and sort by product id.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::EmptyCart`]: no lines at all
    /// - [`InventoryError::InvalidQuantity`]: a zero-quantity line, or the merged quantity
    ///   overflows
    pub fn canonicalize(lines: &[CheckoutLine]) -> Result<Vec<CheckoutLine>> {
        if lines.is_empty() {
            return Err(InventoryError::EmptyCart);
        }
        let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(InventoryError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: 0,
                });
            }
            let total = merged.entry(line.product_id).or_insert(0);
            *total = total
                .checked_add(line.quantity)
                .ok_or(InventoryError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                })?;
        }
        Ok(merged
            .into_iter()
            .map(|(product_id, quantity)| CheckoutLine::new(product_id, quantity))
            .collect())
    }

    /// Lock every requested product and verify each has enough available stock.
    ///
    /// Locks are taken in ascending product id order and stay held by `tx` until it
    /// commits or rolls back. On success the caller may insert holds knowing nobody else
    /// can change availability for these products in the meantime.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidQuantity`]: a line has zero quantity
    /// - [`InventoryError::ProductNotFound`]: product missing or archived
    /// - [`InventoryError::InsufficientStock`]: carries the `available` computed under the lock
    /// - [`InventoryError::LockTimeout`]: a row lock was not granted in time
    pub async fn check<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        tenant_id: TenantId,
        lines: &[CheckoutLine],
    ) -> Result<Vec<StockCheck>> {
        let lines = Self::canonicalize(lines)?;
        let mut checks = Vec::with_capacity(lines.len());

        for line in &lines {
            let product = tx
                .lock_product(tenant_id, line.product_id)
                .await?
                .filter(|product| !product.archived)
                .ok_or(InventoryError::ProductNotFound {
                    product_id: line.product_id,
                })?;

            let active = tx.active_quantity(tenant_id, line.product_id).await?;
            let available = product.available(active);

            if available < line.quantity {
                tracing::debug!(
                    product_id = %line.product_id,
                    requested = line.quantity,
                    available,
                    "Insufficient stock"
                );
                return Err(InventoryError::InsufficientStock {
                    product_id: line.product_id,
                    requested: line.quantity,
                    available,
                });
            }

            checks.push(StockCheck {
                product_id: line.product_id,
                requested: line.quantity,
                available,
            });
        }

        Ok(checks)
    }

    /// Lock a set of product rows in ascending `(product_id, tenant_id)` order.
    ///
    /// Archived products are still returned: holds taken before archiving must remain
    /// convertible.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ProductNotFound`] if a row is missing, or
    /// [`InventoryError::LockTimeout`] if a lock was not granted in time.
    pub async fn lock_products<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        products: impl IntoIterator<Item = (TenantId, ProductId)>,
    ) -> Result<Vec<ProductStock>> {
        let ordered: BTreeSet<(ProductId, TenantId)> = products
            .into_iter()
            .map(|(tenant_id, product_id)| (product_id, tenant_id))
            .collect();

        let mut rows = Vec::with_capacity(ordered.len());
        for (product_id, tenant_id) in ordered {
            let row = tx
                .lock_product(tenant_id, product_id)
                .await?
                .ok_or(InventoryError::ProductNotFound { product_id })?;
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stockhold_core::InventoryStore;
    use stockhold_testing::InMemoryInventoryStore;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn canonicalize_merges_and_sorts() {
        let mut ids = [ProductId::new(), ProductId::new()];
        ids.sort();
        let lines = [
            CheckoutLine::new(ids[1], 2),
            CheckoutLine::new(ids[0], 1),
            CheckoutLine::new(ids[1], 3),
        ];

        let merged = StockLockingGate::canonicalize(&lines).unwrap();

        assert_eq!(
            merged,
            vec![CheckoutLine::new(ids[0], 1), CheckoutLine::new(ids[1], 5)]
        );
    }

    #[test]
    fn canonicalize_rejects_zero_quantity() {
        let product_id = ProductId::new();
        let err = StockLockingGate::canonicalize(&[CheckoutLine::new(product_id, 0)]).unwrap_err();
        assert_eq!(
            err,
            InventoryError::InvalidQuantity {
                product_id,
                quantity: 0
            }
        );
    }

    #[test]
    fn canonicalize_rejects_empty_request() {
        assert_eq!(
            StockLockingGate::canonicalize(&[]).unwrap_err(),
            InventoryError::EmptyCart
        );
    }

    #[tokio::test]
    async fn check_reports_available_under_lock() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();
        store.seed_product(tenant, product, 5);

        let mut tx = store.begin(TIMEOUT).await.unwrap();
        let err = StockLockingGate::new()
            .check(&mut tx, tenant, &[CheckoutLine::new(product, 6)])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                product_id: product,
                requested: 6,
                available: 5
            }
        );
    }

    #[tokio::test]
    async fn check_rejects_archived_product() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();
        store.seed_product(tenant, product, 5);
        store.archive_product(tenant, product);

        let mut tx = store.begin(TIMEOUT).await.unwrap();
        let err = StockLockingGate::new()
            .check(&mut tx, tenant, &[CheckoutLine::new(product, 1)])
            .await
            .unwrap_err();

        assert_eq!(err, InventoryError::ProductNotFound { product_id: product });
    }

    #[tokio::test]
    async fn locks_are_held_until_transaction_ends() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();
        store.seed_product(tenant, product, 5);
        let gate = StockLockingGate::new();

        let mut first = store.begin(TIMEOUT).await.unwrap();
        gate.check(&mut first, tenant, &[CheckoutLine::new(product, 1)])
            .await
            .unwrap();

        let mut second = store.begin(Duration::from_millis(20)).await.unwrap();
        let err = gate
            .check(&mut second, tenant, &[CheckoutLine::new(product, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::LockTimeout(_)));

        drop(first);
        let mut third = store.begin(TIMEOUT).await.unwrap();
        assert!(
            gate.check(&mut third, tenant, &[CheckoutLine::new(product, 1)])
                .await
                .is_ok()
        );
    }
}
