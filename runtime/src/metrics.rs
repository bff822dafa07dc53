//! Prometheus metrics for the reservation engine.
//!
//! Covers checkout outcomes, lock contention, conversions, reconciliation faults,
//! sweeper passes and cart corrections.
//!
//! # Example
//!
//! ```rust,no_run
//! use stockhold_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Register metric descriptions and start the HTTP exporter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder that is
    /// already installed is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install() {
            Ok(()) => {
                self.started = true;
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Whether this server installed the exporter.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "stockhold_reservations_total",
        "Reservation lifecycle transitions by resulting status"
    );
    describe_counter!(
        "stockhold_checkout_rejections_total",
        "Checkouts rejected, by reason"
    );
    describe_counter!(
        "stockhold_lock_timeouts_total",
        "Row-lock waits that exceeded the lock timeout"
    );
    describe_counter!(
        "stockhold_reconciliation_faults_total",
        "Settled payments whose holds could not be converted, by fault kind"
    );
    describe_counter!(
        "stockhold_sweeper_runs_total",
        "Sweeper passes by outcome (swept, skipped, failed)"
    );
    describe_counter!(
        "stockhold_cart_adjustments_total",
        "Cart lines clamped or dropped during re-validation"
    );
    describe_histogram!(
        "stockhold_checkout_duration_seconds",
        "Time from transaction start to commit or rollback of a checkout"
    );
}

/// Record holds moving into `status` (`active` for newly created holds).
pub fn record_reservations(status: &'static str, count: usize) {
    counter!("stockhold_reservations_total", "status" => status).increment(count as u64);
}

/// Record a rejected checkout.
pub fn record_checkout_rejected(reason: &'static str) {
    counter!("stockhold_checkout_rejections_total", "reason" => reason).increment(1);
}

/// Record a lock wait that timed out.
pub fn record_lock_timeout() {
    counter!("stockhold_lock_timeouts_total").increment(1);
}

/// Record an escalated reconciliation fault.
pub fn record_reconciliation_fault(kind: &'static str) {
    counter!("stockhold_reconciliation_faults_total", "kind" => kind).increment(1);
}

/// Record a sweeper pass.
pub fn record_sweeper_run(outcome: &'static str) {
    counter!("stockhold_sweeper_runs_total", "outcome" => outcome).increment(1);
}

/// Record a cart correction.
pub fn record_cart_adjustment(kind: &'static str) {
    counter!("stockhold_cart_adjustments_total", "kind" => kind).increment(1);
}

/// Record checkout latency.
pub fn record_checkout_duration(duration: Duration) {
    histogram!("stockhold_checkout_duration_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        register_metrics();
        record_reservations("active", 3);
        record_checkout_rejected("insufficient_stock");
        record_lock_timeout();
        record_reconciliation_fault("lost_race");
        record_sweeper_run("swept");
        record_cart_adjustment("clamped");
        record_checkout_duration(Duration::from_millis(12));
    }

    #[test]
    fn server_starts_unstarted() {
        let server = MetricsServer::new(([127, 0, 0, 1], 0).into());
        assert!(!server.is_started());
    }
}
