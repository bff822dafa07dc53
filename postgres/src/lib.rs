//! `PostgreSQL` storage for Stockhold.
//!
//! - [`PostgresInventoryStore`]: stock rows and reservations with `SELECT ... FOR UPDATE`
//!   locking and a per-transaction `lock_timeout`
//! - [`PostgresSweepLease`]: fenced leader lease for the reclamation sweeper
//! - [`PostgresReviewQueue`]: manual-review queue receiving reconciliation faults
//!
//! Schema lives in `migrations/` and is applied with [`PostgresInventoryStore::migrate`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod lease;
mod review_queue;
mod store;

pub use lease::PostgresSweepLease;
pub use review_queue::{PostgresReviewQueue, ReviewEntry, ReviewStatus};
pub use store::{PostgresInventoryStore, PostgresTransaction};
