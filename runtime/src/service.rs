//! Inventory service: the operations exposed to order and payment flows.
//!
//! ```text
//! checkout(order, lines) ──► gate.check (locks, ascending ids) ──► ledger.create × N ──► commit
//! convert(order)          ──► ConversionCoordinator
//! release(order)          ──► ledger.transition(active → released) × N ──► commit
//! available(product)      ──► unlocked advisory read
//! ```

use std::sync::Arc;
use std::time::Instant;
use stockhold_core::{
    CheckoutLine, Clock, InventoryError, InventoryStore, InventoryTransaction, OrderId, ProductId,
    ReconciliationSink, Reservation, ReservationStatus, Result, TenantId,
};

use crate::config::InventoryConfig;
use crate::conversion::{ConversionCoordinator, ConversionReport};
use crate::gate::StockLockingGate;
use crate::ledger::ReservationLedger;
use crate::metrics;

/// What an explicit cancellation did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Holds moved to `released` by this call
    pub released: Vec<Reservation>,
    /// Holds that were already terminal (benign)
    pub already_terminal: usize,
}

/// Entry point wiring the gate, ledger and coordinator to one store.
pub struct InventoryService<S> {
    store: Arc<S>,
    gate: StockLockingGate,
    ledger: ReservationLedger,
    coordinator: ConversionCoordinator,
    config: InventoryConfig,
}

impl<S: InventoryStore> InventoryService<S> {
    /// Create a service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ReconciliationSink>,
        config: InventoryConfig,
    ) -> Self {
        Self {
            store,
            gate: StockLockingGate::new(),
            ledger: ReservationLedger::new(Arc::clone(&clock)),
            coordinator: ConversionCoordinator::new(clock, sink, config.lock_timeout),
            config,
        }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Reserve every line of an order, all or nothing.
    ///
    /// Duplicate product lines are merged. Product rows are locked in ascending id
    /// order and stay locked until the holds are committed.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InsufficientStock`]: carries the `available` seen under the lock
    /// - [`InventoryError::ProductNotFound`]: product missing or archived
    /// - [`InventoryError::DuplicateReservation`]: the order already holds one of the products
    /// - [`InventoryError::InvalidQuantity`]: a line has zero quantity
    /// - [`InventoryError::EmptyCart`]: no lines
    /// - [`InventoryError::LockTimeout`]: retryable; nothing was reserved
    pub async fn checkout(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        lines: &[CheckoutLine],
    ) -> Result<Vec<Reservation>> {
        let started = Instant::now();
        let mut tx = self.store.begin(self.config.lock_timeout).await?;

        let outcome = self.reserve(&mut tx, tenant_id, order_id, lines).await;
        let outcome = match outcome {
            Ok(reservations) => tx.commit().await.map(|()| reservations),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after rejected checkout failed");
                }
                Err(err)
            }
        };
        metrics::record_checkout_duration(started.elapsed());

        match &outcome {
            Ok(reservations) => {
                metrics::record_reservations(ReservationStatus::Active.as_str(), reservations.len());
                tracing::info!(
                    tenant_id = %tenant_id,
                    order_id = %order_id,
                    holds = reservations.len(),
                    "Checkout reserved stock"
                );
            }
            Err(err) => {
                metrics::record_checkout_rejected(err.kind());
                match err {
                    InventoryError::LockTimeout(reason) => {
                        metrics::record_lock_timeout();
                        tracing::warn!(order_id = %order_id, reason = %reason, "Checkout timed out waiting for stock lock");
                    }
                    InventoryError::InsufficientStock {
                        product_id,
                        requested,
                        available,
                    } => {
                        tracing::info!(
                            order_id = %order_id,
                            product_id = %product_id,
                            requested,
                            available,
                            "Checkout rejected: insufficient stock"
                        );
                    }
                    other => {
                        tracing::warn!(order_id = %order_id, error = %other, "Checkout rejected");
                    }
                }
            }
        }
        outcome
    }

    async fn reserve(
        &self,
        tx: &mut S::Transaction,
        tenant_id: TenantId,
        order_id: OrderId,
        lines: &[CheckoutLine],
    ) -> Result<Vec<Reservation>> {
        let checks = self.gate.check(tx, tenant_id, lines).await?;
        let mut reservations = Vec::with_capacity(checks.len());
        for check in checks {
            let reservation = self
                .ledger
                .create(
                    tx,
                    tenant_id,
                    order_id,
                    check.product_id,
                    check.requested,
                    self.config.reservation_ttl,
                )
                .await?;
            reservations.push(reservation);
        }
        Ok(reservations)
    }

    /// Convert the holds of a settled order into permanent stock consumption.
    ///
    /// Safe to call more than once for the same order.
    ///
    /// # Errors
    ///
    /// See [`ConversionCoordinator::convert`].
    pub async fn convert(&self, order_id: OrderId) -> Result<ConversionReport> {
        self.coordinator.convert(self.store.as_ref(), order_id).await
    }

    /// Release every active hold of an order (explicit cancellation).
    ///
    /// Holds that are already terminal are counted and left alone.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::LockTimeout`] if a hold's row is busy, or a storage
    /// failure. Nothing is released on error.
    pub async fn release(&self, order_id: OrderId) -> Result<ReleaseReport> {
        let mut tx = self.store.begin(self.config.lock_timeout).await?;

        let outcome = self.release_in(&mut tx, order_id).await;
        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after failed release failed");
                }
                if matches!(err, InventoryError::LockTimeout(_)) {
                    metrics::record_lock_timeout();
                }
                return Err(err);
            }
        };
        tx.commit().await?;

        if !report.released.is_empty() {
            metrics::record_reservations(ReservationStatus::Released.as_str(), report.released.len());
        }
        tracing::info!(
            order_id = %order_id,
            released = report.released.len(),
            already_terminal = report.already_terminal,
            "Order holds released"
        );
        Ok(report)
    }

    async fn release_in(
        &self,
        tx: &mut S::Transaction,
        order_id: OrderId,
    ) -> Result<ReleaseReport> {
        let mut report = ReleaseReport::default();
        for reservation in self.ledger.find_by_order(tx, order_id).await? {
            if !reservation.is_active() {
                report.already_terminal += 1;
                continue;
            }
            match self
                .ledger
                .transition_or_terminal(tx, reservation.id, ReservationStatus::Released)
                .await
            {
                Ok(released) => report.released.push(released),
                Err(InventoryError::AlreadyTerminal { .. }) => report.already_terminal += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Advisory availability for display. Takes no locks and may be stale.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ProductNotFound`] if the product is missing or archived.
    pub async fn available(&self, tenant_id: TenantId, product_id: ProductId) -> Result<u32> {
        let product = self
            .store
            .product(tenant_id, product_id)
            .await?
            .filter(|product| !product.archived)
            .ok_or(InventoryError::ProductNotFound { product_id })?;
        let active = self.store.active_quantity(tenant_id, product_id).await?;
        Ok(product.available(active))
    }
}

impl<S> std::fmt::Debug for InventoryService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
