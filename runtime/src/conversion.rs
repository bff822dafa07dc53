//! Conversion Coordinator.
//!
//! Turns a settled payment into permanent stock consumption. Within one transaction it
//!
//! 1. locks the product rows of every active hold of the order (ascending product id),
//! 2. moves each hold `active -> converted` with a conditional update,
//! 3. decrements stock only for holds whose update actually changed a row.
//!
//! Payment settlement is delivered at least once, so a second call for the same order
//! finds the holds already `converted` and does nothing. Holds that expired or were
//! released before the payment settled cannot be honoured; they are reported as
//! [`ReconciliationFault`]s and escalated to the configured
//! [`ReconciliationSink`] after the transaction commits.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use stockhold_core::{
    Clock, FaultKind, InventoryError, InventoryStore, InventoryTransaction, OrderId,
    ReconciliationFault, ReconciliationSink, Reservation, ReservationStatus, Result,
};

use crate::gate::StockLockingGate;
use crate::ledger::ReservationLedger;
use crate::metrics;

/// What a single `convert` call did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionReport {
    /// Order that settled
    pub order_id: OrderId,
    /// Holds converted by this call (stock was decremented for each)
    pub converted: Vec<Reservation>,
    /// Holds found already converted (duplicate delivery)
    pub already_converted: usize,
    /// Holds that could not be converted
    pub faults: Vec<ReconciliationFault>,
}

impl ConversionReport {
    fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            converted: Vec::new(),
            already_converted: 0,
            faults: Vec::new(),
        }
    }

    /// Whether this call changed nothing and found nothing wrong.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.converted.is_empty() && self.faults.is_empty()
    }

    /// Total units permanently removed from stock by this call.
    #[must_use]
    pub fn units_converted(&self) -> u64 {
        self.converted.iter().map(|r| u64::from(r.quantity)).sum()
    }

    /// Surface faults as an error for callers that treat them as failures.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Reconciliation`] if any fault was detected.
    pub fn into_result(self) -> Result<Self> {
        if self.faults.is_empty() {
            Ok(self)
        } else {
            Err(InventoryError::Reconciliation {
                order_id: self.order_id,
                faults: self.faults,
            })
        }
    }
}

/// Converts holds for settled orders.
#[derive(Clone)]
pub struct ConversionCoordinator {
    gate: StockLockingGate,
    ledger: ReservationLedger,
    sink: Arc<dyn ReconciliationSink>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl ConversionCoordinator {
    /// Create a coordinator escalating faults to `sink`.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ReconciliationSink>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            gate: StockLockingGate::new(),
            ledger: ReservationLedger::new(Arc::clone(&clock)),
            sink,
            clock,
            lock_timeout,
        }
    }

    /// Convert every active hold of `order_id` in one transaction.
    ///
    /// Faults are escalated only after the transaction committed, so a rolled-back
    /// attempt never produces a review entry.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::StockUnderflow`]: a guarded decrement failed; nothing was applied
    /// - [`InventoryError::LockTimeout`]: a row lock was not granted in time
    /// - [`InventoryError::Storage`]: the store failed
    pub async fn convert<S: InventoryStore>(
        &self,
        store: &S,
        order_id: OrderId,
    ) -> Result<ConversionReport> {
        let mut tx = store.begin(self.lock_timeout).await?;

        let report = match self.convert_in(&mut tx, order_id).await {
            Ok(report) => report,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after failed conversion failed");
                }
                if matches!(err, InventoryError::LockTimeout(_)) {
                    metrics::record_lock_timeout();
                }
                tracing::warn!(order_id = %order_id, error = %err, "Conversion aborted");
                return Err(err);
            }
        };
        tx.commit().await?;

        if !report.converted.is_empty() {
            metrics::record_reservations(ReservationStatus::Converted.as_str(), report.converted.len());
            tracing::info!(
                order_id = %order_id,
                holds = report.converted.len(),
                units = report.units_converted(),
                "Order converted"
            );
        } else if report.already_converted > 0 && report.faults.is_empty() {
            tracing::debug!(order_id = %order_id, "Order already converted, ignoring duplicate settlement");
        }

        self.escalate(&report.faults).await;
        Ok(report)
    }

    async fn convert_in<T: InventoryTransaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
    ) -> Result<ConversionReport> {
        let mut report = ConversionReport::new(order_id);
        let detected_at = self.clock.now();

        let reservations = self.ledger.find_by_order(tx, order_id).await?;
        if reservations.is_empty() {
            report
                .faults
                .push(ReconciliationFault::missing_hold(order_id, detected_at));
            return Ok(report);
        }

        // Product locks first, in canonical order, so conversion never interleaves
        // with a checkout holding the same rows in a different order.
        self.gate
            .lock_products(
                tx,
                reservations
                    .iter()
                    .filter(|r| r.is_active())
                    .map(|r| (r.tenant_id, r.product_id)),
            )
            .await?;

        for reservation in reservations {
            match reservation.status {
                ReservationStatus::Converted => report.already_converted += 1,
                ReservationStatus::Expired | ReservationStatus::Released => {
                    report.faults.push(Self::fault(
                        &reservation,
                        FaultKind::HoldNotActive,
                        Some(reservation.status),
                        detected_at,
                    ));
                }
                ReservationStatus::Active => {
                    if self
                        .ledger
                        .transition(tx, reservation.id, ReservationStatus::Converted)
                        .await?
                    {
                        if !tx
                            .decrement_stock(
                                reservation.tenant_id,
                                reservation.product_id,
                                reservation.quantity,
                            )
                            .await?
                        {
                            tracing::error!(
                                order_id = %order_id,
                                product_id = %reservation.product_id,
                                quantity = reservation.quantity,
                                "Stock guard failed during conversion"
                            );
                            return Err(InventoryError::StockUnderflow {
                                product_id: reservation.product_id,
                                requested: reservation.quantity,
                            });
                        }
                        report.converted.push(self.ledger.get(tx, reservation.id).await?);
                    } else {
                        // Another transaction moved the hold after we read it.
                        let observed = tx.reservation(reservation.id).await?.map(|r| r.status);
                        if observed == Some(ReservationStatus::Converted) {
                            report.already_converted += 1;
                        } else {
                            report.faults.push(Self::fault(
                                &reservation,
                                FaultKind::LostRace,
                                observed,
                                detected_at,
                            ));
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    fn fault(
        reservation: &Reservation,
        kind: FaultKind,
        observed: Option<ReservationStatus>,
        detected_at: chrono::DateTime<chrono::Utc>,
    ) -> ReconciliationFault {
        ReconciliationFault::for_hold(
            reservation.order_id,
            reservation.id,
            reservation.product_id,
            reservation.quantity,
            kind,
            observed,
            detected_at,
        )
    }

    async fn escalate(&self, faults: &[ReconciliationFault]) {
        for fault in faults {
            metrics::record_reconciliation_fault(fault.kind.as_str());
            tracing::error!(
                order_id = %fault.order_id,
                reservation_id = ?fault.reservation_id,
                product_id = ?fault.product_id,
                quantity = fault.quantity,
                kind = %fault.kind,
                observed = ?fault.observed_status,
                "Payment settled for a hold that could not be converted"
            );
            if let Err(e) = self.sink.escalate(fault).await {
                tracing::error!(
                    order_id = %fault.order_id,
                    error = %e,
                    "Failed to escalate reconciliation fault"
                );
            }
        }
    }
}

impl std::fmt::Debug for ConversionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionCoordinator")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

/// Sink that only logs faults. Useful when no review queue is wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReconciliationSink;

impl ReconciliationSink for TracingReconciliationSink {
    fn escalate<'a>(&'a self, fault: &'a ReconciliationFault) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::warn!(
                order_id = %fault.order_id,
                kind = %fault.kind,
                "Reconciliation fault requires manual review"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use stockhold_core::{ProductId, TenantId};
    use stockhold_testing::{InMemoryInventoryStore, RecordingReconciliationSink, test_clock};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn coordinator(sink: &RecordingReconciliationSink) -> ConversionCoordinator {
        ConversionCoordinator::new(Arc::new(test_clock()), Arc::new(sink.clone()), TIMEOUT)
    }

    #[tokio::test]
    async fn order_without_holds_is_missing_hold_fault() {
        let store = InMemoryInventoryStore::new();
        let sink = RecordingReconciliationSink::new();
        let order = OrderId::new();

        let report = coordinator(&sink).convert(&store, order).await.unwrap();

        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].kind, FaultKind::MissingHold);
        assert_eq!(sink.faults(), report.faults);
        assert!(matches!(
            report.into_result(),
            Err(InventoryError::Reconciliation { order_id, .. }) if order_id == order
        ));
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_conversion() {
        let store = InMemoryInventoryStore::new();
        let sink = RecordingReconciliationSink::new();
        sink.set_failing(true);

        let report = coordinator(&sink).convert(&store, OrderId::new()).await.unwrap();

        assert_eq!(report.faults.len(), 1);
    }

    #[tokio::test]
    async fn converts_and_decrements() {
        let store = InMemoryInventoryStore::new();
        let sink = RecordingReconciliationSink::new();
        let (tenant, product, order) = (TenantId::new(), ProductId::new(), OrderId::new());
        store.seed_product(tenant, product, 10);
        store.seed_reservation(Reservation::new(
            tenant,
            order,
            product,
            4,
            test_clock().now(),
            chrono::Duration::minutes(15),
        ));

        let report = coordinator(&sink).convert(&store, order).await.unwrap();

        assert_eq!(report.units_converted(), 4);
        assert_eq!(report.converted[0].status, ReservationStatus::Converted);
        assert_eq!(store.stock(tenant, product), Some(6));
        assert!(sink.faults().is_empty());
    }
}
