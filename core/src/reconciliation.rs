//! Reconciliation faults: payment settled, but the hold it expected was gone.
//!
//! A fault means a unit may already have been resold to someone else. It is never
//! swallowed: the Conversion Coordinator hands every fault to a
//! [`ReconciliationSink`] (alerting, manual-review queue) after its transaction commits.

use crate::error::{InventoryError, Result};
use crate::types::{OrderId, ProductId, ReservationId, ReservationStatus};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a settled payment could not be matched to an active hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The hold was already expired or released when conversion read it
    HoldNotActive,
    /// The hold was active when read, but another path won the conditional update
    LostRace,
    /// The order has no holds at all
    MissingHold,
}

impl FaultKind {
    /// Convert kind to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HoldNotActive => "hold_not_active",
            Self::LostRace => "lost_race",
            Self::MissingHold => "missing_hold",
        }
    }

    /// Parse kind from database string.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the string doesn't match a known kind.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hold_not_active" => Ok(Self::HoldNotActive),
            "lost_race" => Ok(Self::LostRace),
            "missing_hold" => Ok(Self::MissingHold),
            _ => Err(InventoryError::Storage(format!("Invalid fault kind: {s}"))),
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected mismatch between a payment settlement and the hold state it expected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationFault {
    /// Order whose payment settled
    pub order_id: OrderId,
    /// Hold that could not be converted (`None` for [`FaultKind::MissingHold`])
    pub reservation_id: Option<ReservationId>,
    /// Product of the hold
    pub product_id: Option<ProductId>,
    /// Units the hold covered
    pub quantity: u32,
    /// Classification
    pub kind: FaultKind,
    /// Status found instead of `active`
    pub observed_status: Option<ReservationStatus>,
    /// When the coordinator detected the fault
    pub detected_at: DateTime<Utc>,
}

impl ReconciliationFault {
    /// Fault for a specific hold that was not (or no longer) active.
    #[must_use]
    pub fn for_hold(
        order_id: OrderId,
        reservation_id: ReservationId,
        product_id: ProductId,
        quantity: u32,
        kind: FaultKind,
        observed_status: Option<ReservationStatus>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            reservation_id: Some(reservation_id),
            product_id: Some(product_id),
            quantity,
            kind,
            observed_status,
            detected_at,
        }
    }

    /// Fault for an order that settled without any hold.
    #[must_use]
    pub const fn missing_hold(order_id: OrderId, detected_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            reservation_id: None,
            product_id: None,
            quantity: 0,
            kind: FaultKind::MissingHold,
            observed_status: None,
            detected_at,
        }
    }
}

/// Destination for reconciliation faults (alert, manual-review queue, ...).
///
/// Returns `BoxFuture` instead of async fn so the sink stays dyn-compatible and can be
/// shared as `Arc<dyn ReconciliationSink>`.
pub trait ReconciliationSink: Send + Sync {
    /// Escalate a fault beyond the engine.
    ///
    /// Must tolerate the same fault being escalated more than once: settlement signals
    /// are delivered at least once.
    ///
    /// # Errors
    ///
    /// Returns error if the fault could not be recorded.
    fn escalate<'a>(&'a self, fault: &'a ReconciliationFault) -> BoxFuture<'a, Result<()>>;
}
