//! # Stockhold Testing
//!
//! Testing utilities for the Stockhold reservation engine.
//!
//! This crate provides:
//! - [`InMemoryInventoryStore`]: a transactional store with real row-lock semantics
//!   (exclusive per-row locks held until commit, bounded lock waits, rollback on drop)
//! - [`InMemoryCartStore`]: TTL cart store driven by an injectable clock
//! - [`InMemorySweepLease`]: leader-election lease
//! - [`RecordingReconciliationSink`]: captures escalated faults
//! - [`FixedClock`] and [`ManualClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use stockhold_core::{ProductId, TenantId};
//! use stockhold_testing::InMemoryInventoryStore;
//!
//! let store = InMemoryInventoryStore::new();
//! let tenant = TenantId::new();
//! let product = ProductId::new();
//! store.seed_product(tenant, product, 5);
//! assert_eq!(store.stock(tenant, product), Some(5));
//! ```

pub mod mocks;

// Re-export commonly used items
pub use mocks::{
    FixedClock, InMemoryCartStore, InMemoryInventoryStore, InMemorySweepLease,
    InMemoryTransaction, ManualClock, RecordingReconciliationSink, test_clock,
};
