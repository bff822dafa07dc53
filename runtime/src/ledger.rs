//! Reservation Ledger.
//!
//! Owns the lifecycle of holds inside a caller's transaction. Every state change is a
//! single conditional update guarded on `status = 'active'`, so concurrent callers
//! racing on the same hold see exactly one winner.

use std::sync::Arc;
use std::time::Duration;
use stockhold_core::{
    Clock, InventoryError, InventoryTransaction, OrderId, ProductId, Reservation, ReservationId,
    ReservationStatus, Result, TenantId,
};

use crate::config::to_chrono;

/// Creates, queries and transitions reservations.
#[derive(Clone)]
pub struct ReservationLedger {
    clock: Arc<dyn Clock>,
}

impl ReservationLedger {
    /// Create a ledger stamping times from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Insert a new active hold expiring `ttl` from now.
    ///
    /// Callers must already hold the product lock through the gate.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidQuantity`]: zero quantity
    /// - [`InventoryError::DuplicateReservation`]: the order already has an active hold
    ///   on this product
    pub async fn create<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        tenant_id: TenantId,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        ttl: Duration,
    ) -> Result<Reservation> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id,
                quantity,
            });
        }
        if tx.active_reservation(order_id, product_id).await?.is_some() {
            return Err(InventoryError::DuplicateReservation {
                order_id,
                product_id,
            });
        }

        let reservation = Reservation::new(
            tenant_id,
            order_id,
            product_id,
            quantity,
            self.clock.now(),
            to_chrono(ttl)?,
        );
        tx.insert_reservation(&reservation).await?;

        tracing::debug!(
            reservation_id = %reservation.id,
            order_id = %order_id,
            product_id = %product_id,
            quantity,
            expires_at = %reservation.expires_at,
            "Reservation created"
        );
        Ok(reservation)
    }

    /// Units currently held by active reservations for a product.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn total_active_quantity<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<u32> {
        tx.active_quantity(tenant_id, product_id).await
    }

    /// Move an active hold to a terminal status.
    ///
    /// Returns `false` when the hold was not active (already terminal or missing).
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidTransition`] if `to` is `Active`, or
    /// [`InventoryError::LockTimeout`] if the row is locked by a concurrent transition.
    pub async fn transition<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        reservation_id: ReservationId,
        to: ReservationStatus,
    ) -> Result<bool> {
        if !to.is_terminal() {
            return Err(InventoryError::InvalidTransition { reservation_id, to });
        }
        let changed = tx.transition(reservation_id, to, self.clock.now()).await?;
        if changed {
            tracing::debug!(reservation_id = %reservation_id, status = %to, "Reservation transitioned");
        }
        Ok(changed)
    }

    /// Like [`transition`](Self::transition) but explains a lost race.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::AlreadyTerminal`]: the hold had already left `active`
    /// - [`InventoryError::ReservationNotFound`]: no such hold
    pub async fn transition_or_terminal<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        reservation_id: ReservationId,
        to: ReservationStatus,
    ) -> Result<Reservation> {
        let changed = self.transition(tx, reservation_id, to).await?;
        let current = self.get(tx, reservation_id).await?;
        if changed {
            Ok(current)
        } else {
            Err(InventoryError::AlreadyTerminal {
                reservation_id,
                status: current.status,
            })
        }
    }

    /// All holds of an order, any status, ordered by product id.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn find_by_order<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>> {
        tx.reservations_for_order(order_id).await
    }

    /// Fetch one hold.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ReservationNotFound`] if it does not exist.
    pub async fn get<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        reservation_id: ReservationId,
    ) -> Result<Reservation> {
        tx.reservation(reservation_id)
            .await?
            .ok_or(InventoryError::ReservationNotFound { reservation_id })
    }
}

impl std::fmt::Debug for ReservationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationLedger").finish_non_exhaustive()
    }
}
