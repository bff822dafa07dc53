//! Engine configuration.
//!
//! Every knob has a production default; deployments override individual values with
//! the `with_*` methods (the worker binary maps environment variables onto them).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use stockhold_core::{InventoryError, Result};

/// Tunables for the reservation engine.
///
/// # Default Values
///
/// - `reservation_ttl`: 15 minutes
/// - `lock_timeout`: 2 seconds
/// - `cart_ttl`: 24 hours
/// - `sweep`: see [`SweepConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// How long a checkout hold is honoured before the sweeper reclaims it
    pub reservation_ttl: Duration,
    /// Upper bound on any single row-lock wait
    pub lock_timeout: Duration,
    /// Idle lifetime of a cart in the ephemeral store
    pub cart_ttl: Duration,
    /// Reclamation sweeper settings
    pub sweep: SweepConfig,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(15 * 60),
            lock_timeout: Duration::from_secs(2),
            cart_ttl: Duration::from_secs(24 * 60 * 60),
            sweep: SweepConfig::default(),
        }
    }
}

impl InventoryConfig {
    /// Set the reservation TTL.
    #[must_use]
    pub const fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Set the row-lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the cart TTL.
    #[must_use]
    pub const fn with_cart_ttl(mut self, ttl: Duration) -> Self {
        self.cart_ttl = ttl;
        self
    }

    /// Replace the sweeper settings.
    #[must_use]
    pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }
}

/// Reclamation sweeper settings.
///
/// # Default Values
///
/// - `interval`: 60 seconds
/// - `batch_size`: 500
/// - `lease_duration`: 30 seconds
/// - `lease_name`: `reservation-sweeper`
/// - `holder`: `stockhold-worker`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Time between sweep passes
    pub interval: Duration,
    /// Overdue reservations fetched per batch
    pub batch_size: usize,
    /// Lease lifetime; renewed once half of it has elapsed
    pub lease_duration: Duration,
    /// Lease key shared by every sweeper instance
    pub lease_name: String,
    /// Identity of this instance (must be unique per process)
    pub holder: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 500,
            lease_duration: Duration::from_secs(30),
            lease_name: "reservation-sweeper".to_string(),
            holder: "stockhold-worker".to_string(),
        }
    }
}

impl SweepConfig {
    /// Set the interval between passes.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the batch size. Zero is bumped to one.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 { 1 } else { batch_size };
        self
    }

    /// Set the lease lifetime.
    #[must_use]
    pub const fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Set this instance's lease identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }
}

/// Convert a configured duration into a `chrono` offset for timestamp arithmetic.
///
/// # Errors
///
/// Returns [`InventoryError::Storage`] if the duration does not fit.
pub fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| InventoryError::Storage(format!("duration out of range: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_settings() {
        let config = InventoryConfig::default();
        assert_eq!(config.reservation_ttl, Duration::from_secs(900));
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.sweep.batch_size, 500);
        assert_eq!(config.sweep.interval, Duration::from_secs(60));
    }

    #[test]
    fn zero_batch_size_is_bumped() {
        let sweep = SweepConfig::default().with_batch_size(0);
        assert_eq!(sweep.batch_size, 1);
    }

    #[test]
    fn converts_to_chrono() {
        let ttl = to_chrono(Duration::from_secs(90)).unwrap();
        assert_eq!(ttl, chrono::Duration::seconds(90));
    }

    #[test]
    fn survives_json_roundtrip() {
        let config = InventoryConfig::default()
            .with_lock_timeout(Duration::from_millis(250))
            .with_sweep(SweepConfig::default().with_holder("worker-7"));

        let json = serde_json::to_string(&config).unwrap();
        let parsed: InventoryConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, config);
    }
}
