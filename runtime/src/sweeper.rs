//! Reclamation Sweeper.
//!
//! Periodically returns the stock of abandoned checkouts to the pool by moving overdue
//! holds `active -> expired`. Only the instance holding the sweeper lease runs a pass;
//! the lease is renewed once half of it has elapsed and released when the pass ends. Each hold is
//! expired in its own short transaction so a slow row never blocks the whole batch, and
//! the conditional update means a hold converted concurrently is simply skipped.

use std::sync::Arc;
use stockhold_core::{
    Clock, InventoryError, InventoryStore, InventoryTransaction, LeaseGrant, ReservationId,
    ReservationStatus, Result, SweepLease,
};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::config::{InventoryConfig, SweepConfig, to_chrono};
use crate::ledger::ReservationLedger;
use crate::metrics;

/// Outcome of one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Whether this instance held the lease and swept
    pub leader: bool,
    /// Holds moved to `expired`
    pub expired: usize,
    /// Overdue holds that were already terminal when we reached them
    pub already_terminal: usize,
    /// Holds skipped because their row was locked past the lock timeout
    pub lock_timeouts: usize,
    /// Batches processed
    pub batches: usize,
    /// Whether the lease was lost mid-pass
    pub lease_lost: bool,
}

/// Background job expiring overdue reservations.
pub struct ReclamationSweeper<S> {
    store: Arc<S>,
    ledger: ReservationLedger,
    lease: Arc<dyn SweepLease>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    lock_timeout: std::time::Duration,
}

impl<S: InventoryStore> ReclamationSweeper<S> {
    /// Create a sweeper.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        lease: Arc<dyn SweepLease>,
        clock: Arc<dyn Clock>,
        config: &InventoryConfig,
    ) -> Self {
        Self {
            store,
            ledger: ReservationLedger::new(Arc::clone(&clock)),
            lease,
            clock,
            config: config.sweep.clone(),
            lock_timeout: config.lock_timeout,
        }
    }

    /// Run a single pass if this instance can take the lease.
    ///
    /// Returns a report with `leader == false` when another instance holds the lease.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure. Lock timeouts on individual holds are
    /// counted, not returned; those holds are picked up by the next pass.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let Some(mut grant) = self
            .lease
            .try_acquire(
                &self.config.lease_name,
                &self.config.holder,
                self.config.lease_duration,
            )
            .await?
        else {
            tracing::debug!(lease = %self.config.lease_name, "Sweeper lease held elsewhere, skipping pass");
            metrics::record_sweeper_run("skipped");
            return Ok(SweepReport::default());
        };

        let result = self.sweep_batches(&mut grant).await;

        if let Err(e) = self.lease.release(&grant).await {
            tracing::warn!(lease = %grant.name, error = %e, "Failed to release sweeper lease");
        }

        match &result {
            Ok(report) => {
                metrics::record_sweeper_run("swept");
                if report.expired > 0 {
                    metrics::record_reservations(ReservationStatus::Expired.as_str(), report.expired);
                }
                tracing::info!(
                    expired = report.expired,
                    already_terminal = report.already_terminal,
                    lock_timeouts = report.lock_timeouts,
                    batches = report.batches,
                    "Sweep pass complete"
                );
            }
            Err(e) => {
                metrics::record_sweeper_run("failed");
                tracing::error!(error = %e, "Sweep pass failed");
            }
        }
        result
    }

    async fn sweep_batches(&self, grant: &mut LeaseGrant) -> Result<SweepReport> {
        let mut report = SweepReport {
            leader: true,
            ..SweepReport::default()
        };

        loop {
            let now = self.clock.now();
            let batch = self.store.find_overdue(now, self.config.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            let full = batch.len() >= self.config.batch_size;

            let mut progressed = false;
            for reservation in &batch {
                if !self.keep_lease(grant).await? {
                    tracing::warn!(lease = %grant.name, "Sweeper lease lost, stopping pass");
                    report.lease_lost = true;
                    return Ok(report);
                }
                match self.expire(reservation.id).await {
                    Ok(true) => {
                        report.expired += 1;
                        progressed = true;
                        tracing::debug!(
                            reservation_id = %reservation.id,
                            order_id = %reservation.order_id,
                            product_id = %reservation.product_id,
                            quantity = reservation.quantity,
                            "Reservation expired"
                        );
                    }
                    Ok(false) => {
                        report.already_terminal += 1;
                        progressed = true;
                    }
                    Err(InventoryError::LockTimeout(reason)) => {
                        report.lock_timeouts += 1;
                        metrics::record_lock_timeout();
                        tracing::warn!(
                            reservation_id = %reservation.id,
                            reason = %reason,
                            "Reservation row busy, leaving it for the next pass"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            // A short batch means the backlog is drained; a batch of only busy rows
            // would be fetched again unchanged.
            if !full || !progressed {
                break;
            }
        }

        Ok(report)
    }

    /// Renew the lease once half of it has elapsed. Returns `false` if it was lost.
    async fn keep_lease(&self, grant: &mut LeaseGrant) -> Result<bool> {
        let half = to_chrono(self.config.lease_duration)? / 2;
        if self.clock.now() < grant.expires_at - half {
            return Ok(true);
        }

        match self.lease.renew(grant, self.config.lease_duration).await? {
            Some(renewed) => {
                tracing::debug!(lease = %renewed.name, expires_at = %renewed.expires_at, "Sweeper lease renewed");
                *grant = renewed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire(&self, reservation_id: ReservationId) -> Result<bool> {
        let mut tx = self.store.begin(self.lock_timeout).await?;
        match self
            .ledger
            .transition(&mut tx, reservation_id, ReservationStatus::Expired)
            .await
        {
            Ok(changed) => {
                tx.commit().await?;
                Ok(changed)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after failed expiry failed");
                }
                Err(e)
            }
        }
    }

    /// Sweep every `interval` until `shutdown` fires.
    ///
    /// Pass failures are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            holder = %self.config.holder,
            "Reclamation sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are already logged and counted by sweep_once.
                    let _ = self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Reclamation sweeper shutting down");
                    break;
                }
            }
        }
    }
}

impl<S> std::fmt::Debug for ReclamationSweeper<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclamationSweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
