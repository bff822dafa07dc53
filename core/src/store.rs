//! Storage seam for stock rows and reservations.
//!
//! The engine's correctness rests on two storage guarantees, both expressed here:
//!
//! 1. [`InventoryTransaction::lock_product`] takes an exclusive row lock that is held
//!    until the transaction ends, and waits no longer than the transaction's lock
//!    timeout before failing with [`InventoryError::LockTimeout`].
//! 2. [`InventoryTransaction::transition`] is a single conditional update
//!    `WHERE status = 'active'` that reports whether it changed the row.
//!
//! Dropping a transaction without calling [`InventoryTransaction::commit`] rolls it back.
//!
//! [`InventoryError::LockTimeout`]: crate::error::InventoryError::LockTimeout

use crate::error::Result;
use crate::types::{
    OrderId, ProductId, ProductStock, Reservation, ReservationId, ReservationStatus, TenantId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Transactional access to product stock and reservations.
pub trait InventoryStore: Send + Sync {
    /// Transaction handle produced by [`InventoryStore::begin`].
    type Transaction: InventoryTransaction;

    /// Begin a transaction whose lock waits are bounded by `lock_timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction cannot be started.
    fn begin(
        &self,
        lock_timeout: Duration,
    ) -> impl Future<Output = Result<Self::Transaction>> + Send;

    /// Read a product's committed stock row without locking.
    ///
    /// Advisory only: never use the result to gate a reservation.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<ProductStock>>> + Send;

    /// Sum of committed active hold quantities for a product, without locking.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn active_quantity(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> impl Future<Output = Result<u32>> + Send;

    /// Read one reservation outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn reservation(
        &self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send;

    /// Active reservations whose `expires_at` is strictly before `now`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Reservation>>> + Send;
}

/// One open transaction against the inventory store.
pub trait InventoryTransaction: Send {
    /// Lock a product's stock row exclusively and return it.
    ///
    /// Returns `Ok(None)` if the product does not exist for the tenant.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock cannot be acquired in time.
    fn lock_product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<ProductStock>>> + Send;

    /// Sum of active hold quantities for a product, as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn active_quantity(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> impl Future<Output = Result<u32>> + Send;

    /// The active reservation for `(order_id, product_id)`, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn active_reservation(
        &mut self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send;

    /// Insert a new reservation.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateReservation` if an active hold for the same order and
    /// product already exists.
    fn insert_reservation(
        &mut self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read one reservation as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send;

    /// Every reservation of an order, any status, ordered by `(product_id, id)`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn reservations_for_order(
        &mut self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Vec<Reservation>>> + Send;

    /// Conditionally move a reservation from `active` to `to`, stamping `at`.
    ///
    /// Returns `true` only if this call changed the row. A missing reservation or one
    /// that is already terminal yields `false`.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the row is locked by another transaction for longer
    /// than the lock timeout.
    fn transition(
        &mut self,
        reservation_id: ReservationId,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Decrement stock by `quantity` only if `stock_quantity >= quantity`.
    ///
    /// Returns `true` if the row was decremented.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the row lock cannot be acquired in time.
    fn decrement_stock(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Commit every change and release all locks.
    ///
    /// # Errors
    ///
    /// Returns error if the commit fails; nothing is persisted in that case.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Discard every change and release all locks.
    ///
    /// # Errors
    ///
    /// Returns error if the rollback could not be sent.
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}
