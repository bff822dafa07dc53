//! Domain types for the reservation engine.
//!
//! Identifiers, the [`Reservation`] record and its status machine, product stock rows
//! and checkout lines.

use crate::error::{InventoryError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a tenant (merchant)
    TenantId
);

uuid_id!(
    /// Unique identifier for a product.
    ///
    /// Ordering is significant: multi-row locks are always taken in ascending
    /// `ProductId` order.
    ProductId
);

uuid_id!(
    /// Unique identifier for an order
    OrderId
);

uuid_id!(
    /// Unique identifier for a reservation (hold)
    ReservationId
);

/// Shopper session identifier (opaque, issued by the HTTP layer)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Status of a reservation.
///
/// `Active` is the only non-terminal status. A reservation leaves it at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Hold counts against availability
    Active,
    /// Payment settled; stock was decremented
    Converted,
    /// Hold timed out and was reclaimed by the sweeper
    Expired,
    /// Hold was cancelled explicitly before expiry
    Released,
}

impl ReservationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Converted => "converted",
            Self::Expired => "expired",
            Self::Released => "released",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "converted" => Ok(Self::Converted),
            "expired" => Ok(Self::Expired),
            "released" => Ok(Self::Released),
            _ => Err(InventoryError::Storage(format!(
                "Invalid reservation status: {s}"
            ))),
        }
    }

    /// Whether the status can never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded hold on a quantity of one product for one order.
///
/// Reservations are never deleted; the table is an append-mostly history of holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Tenant owning the product
    pub tenant_id: TenantId,
    /// Order the hold belongs to
    pub order_id: OrderId,
    /// Product being held
    pub product_id: ProductId,
    /// Units held (always positive)
    pub quantity: u32,
    /// Current status
    pub status: ReservationStatus,
    /// When the hold was created
    pub created_at: DateTime<Utc>,
    /// When the hold stops being honoured
    pub expires_at: DateTime<Utc>,
    /// When the hold left `active` (any terminal transition)
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Build a new active reservation expiring `ttl` after `created_at`.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            tenant_id,
            order_id,
            product_id,
            quantity,
            status: ReservationStatus::Active,
            created_at,
            expires_at: created_at + ttl,
            released_at: None,
        }
    }

    /// Whether the hold currently counts against availability.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, ReservationStatus::Active)
    }

    /// Whether the hold is still active but past its expiry at `now`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at < now
    }
}

// ============================================================================
// Stock
// ============================================================================

/// A product's authoritative stock row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    /// Product identifier
    pub id: ProductId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Units physically in stock
    pub stock_quantity: u32,
    /// Archived products cannot be reserved
    pub archived: bool,
}

impl ProductStock {
    /// Create a live (non-archived) stock row.
    #[must_use]
    pub const fn new(tenant_id: TenantId, id: ProductId, stock_quantity: u32) -> Self {
        Self {
            id,
            tenant_id,
            stock_quantity,
            archived: false,
        }
    }

    /// Stock minus the given sum of active holds, floored at zero.
    #[must_use]
    pub const fn available(&self, active_quantity: u32) -> u32 {
        self.stock_quantity.saturating_sub(active_quantity)
    }
}

/// One `(product, quantity)` pair requested by a checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    /// Product to hold
    pub product_id: ProductId,
    /// Units to hold
    pub quantity: u32,
}

impl CheckoutLine {
    /// Create a checkout line
    #[must_use]
    pub const fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}
