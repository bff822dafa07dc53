//! # Stockhold Core
//!
//! Domain types and seams for the inventory reservation engine.
//!
//! The engine guarantees that concurrent checkouts never sell more units of a product
//! than exist, while abandoned checkouts release their holds automatically. This crate
//! holds everything the components agree on:
//!
//! - **Types**: identifiers, [`Reservation`] and its status machine, carts
//! - **Errors**: the [`InventoryError`] taxonomy shared by every component
//! - **Environment**: the [`Clock`] abstraction used for hold expiry
//! - **Seams**: storage, cart store, sweeper lease and reconciliation sink traits
//!
//! Implementations live in sibling crates (`stockhold-postgres`, `stockhold-redis`,
//! `stockhold-testing`); the components that drive them live in `stockhold-runtime`.
//!
//! ## Reservation lifecycle
//!
//! ```text
//!                 ┌──────────► converted   (payment settled)
//!                 │
//! checkout ──► active ───────► expired     (sweeper, expires_at < now)
//!                 │
//!                 └──────────► released    (explicit cancellation)
//! ```
//!
//! Every arrow is a conditional update `WHERE status = 'active'`; a terminal status is
//! never left again.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cart;
pub mod environment;
pub mod error;
pub mod lease;
pub mod reconciliation;
pub mod store;
pub mod types;

pub use cart::{Cart, CartAdjustment, CartItem, CartStore, CartView, RemovalReason};
pub use environment::{Clock, SystemClock};
pub use error::{InventoryError, Result};
pub use lease::{LeaseGrant, SweepLease};
pub use reconciliation::{FaultKind, ReconciliationFault, ReconciliationSink};
pub use store::{InventoryStore, InventoryTransaction};
pub use types::*;
