//! Error taxonomy for the reservation engine.

use crate::reconciliation::ReconciliationFault;
use crate::types::{OrderId, ProductId, ReservationId, ReservationStatus};
use thiserror::Error;

/// Result type alias for reservation engine operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Every failure mode of the reservation engine.
///
/// `InsufficientStock` and `DuplicateReservation` are expected, caller-handled outcomes.
/// `LockTimeout` is retryable by the caller; the engine never retries internally.
/// `Reconciliation` is a business-risk event that must reach an operator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    // ═══════════════════════════════════════════════════════════
    // Caller-handled outcomes
    // ═══════════════════════════════════════════════════════════

    /// Product does not exist for this tenant, or is archived.
    #[error("Product not found: {product_id}")]
    ProductNotFound {
        /// Product that was requested
        product_id: ProductId,
    },

    /// Not enough unreserved stock for the request.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Product that was requested
        product_id: ProductId,
        /// Units requested
        requested: u32,
        /// Units available when the check ran
        available: u32,
    },

    /// An active hold already exists for this order and product.
    #[error("Active reservation already exists for order {order_id} and product {product_id}")]
    DuplicateReservation {
        /// Owning order
        order_id: OrderId,
        /// Held product
        product_id: ProductId,
    },

    /// Quantity must be positive.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity {
        /// Product that was requested
        product_id: ProductId,
        /// Rejected quantity
        quantity: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Reservation state machine
    // ═══════════════════════════════════════════════════════════

    /// Reservation does not exist.
    #[error("Reservation not found: {reservation_id}")]
    ReservationNotFound {
        /// Requested reservation
        reservation_id: ReservationId,
    },

    /// Reservation already left `active`; the transition was not applied.
    #[error("Reservation {reservation_id} is already {status}")]
    AlreadyTerminal {
        /// Reservation that was targeted
        reservation_id: ReservationId,
        /// Status observed instead of `active`
        status: ReservationStatus,
    },

    /// Attempted transition to a non-terminal status.
    #[error("Invalid transition to {to} for reservation {reservation_id}")]
    InvalidTransition {
        /// Reservation that was targeted
        reservation_id: ReservationId,
        /// Requested target status
        to: ReservationStatus,
    },

    /// Stock guard failed during conversion; the whole conversion was aborted.
    #[error("Stock underflow on product {product_id}: cannot remove {requested} units")]
    StockUnderflow {
        /// Product whose stock was insufficient
        product_id: ProductId,
        /// Units the conversion tried to remove
        requested: u32,
    },

    /// Payment settled for holds that were no longer active.
    #[error("Reconciliation fault for order {order_id}: {} hold(s) not converted", .faults.len())]
    Reconciliation {
        /// Order whose settlement could not be fully honoured
        order_id: OrderId,
        /// Individual faults
        faults: Vec<ReconciliationFault>,
    },

    // ═══════════════════════════════════════════════════════════
    // Cart
    // ═══════════════════════════════════════════════════════════

    /// Cart has no line for this product.
    #[error("Cart has no item for product {product_id}")]
    CartItemNotFound {
        /// Product that was targeted
        product_id: ProductId,
    },

    /// Checkout requested for an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// A row lock could not be acquired within the lock timeout.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Database or cache failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl InventoryError {
    /// Whether the caller may retry the same request with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::Storage(_))
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProductNotFound { .. } => "product_not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::DuplicateReservation { .. } => "duplicate_reservation",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::ReservationNotFound { .. } => "reservation_not_found",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::StockUnderflow { .. } => "stock_underflow",
            Self::Reconciliation { .. } => "reconciliation_fault",
            Self::CartItemNotFound { .. } => "cart_item_not_found",
            Self::EmptyCart => "empty_cart",
            Self::LockTimeout(_) => "lock_timeout",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
        }
    }
}
