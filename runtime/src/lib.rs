//! # Stockhold Runtime
//!
//! The reservation engine. Every component works inside a transaction of an
//! [`InventoryStore`](stockhold_core::InventoryStore) and relies only on its row locks for
//! mutual exclusion:
//!
//! - [`gate::StockLockingGate`]: locks product rows (ascending id) and decides availability
//! - [`ledger::ReservationLedger`]: creates holds and moves them to terminal states
//! - [`cart::CartManager`]: advisory carts, re-validated on every read
//! - [`conversion::ConversionCoordinator`]: settles payments into stock decrements
//! - [`sweeper::ReclamationSweeper`]: expires overdue holds under a lease
//! - [`service::InventoryService`]: the checkout / convert / release / available surface
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use stockhold_core::{CheckoutLine, OrderId, ProductId, SystemClock, TenantId};
//! use stockhold_runtime::{InventoryConfig, InventoryService, TracingReconciliationSink};
//! use stockhold_testing::InMemoryInventoryStore;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryInventoryStore::new());
//! let (tenant, product) = (TenantId::new(), ProductId::new());
//! store.seed_product(tenant, product, 5);
//!
//! let service = InventoryService::new(
//!     store,
//!     Arc::new(SystemClock),
//!     Arc::new(TracingReconciliationSink),
//!     InventoryConfig::default(),
//! );
//!
//! let holds = service
//!     .checkout(tenant, OrderId::new(), &[CheckoutLine::new(product, 3)])
//!     .await
//!     .unwrap();
//! assert_eq!(holds.len(), 1);
//! assert_eq!(service.available(tenant, product).await.unwrap(), 2);
//! # });
//! ```

pub mod cart;
pub mod config;
pub mod conversion;
pub mod gate;
pub mod ledger;
pub mod metrics;
pub mod retry;
pub mod service;
pub mod sweeper;

pub use cart::CartManager;
pub use config::{InventoryConfig, SweepConfig};
pub use conversion::{ConversionCoordinator, ConversionReport, TracingReconciliationSink};
pub use gate::{StockCheck, StockLockingGate};
pub use ledger::ReservationLedger;
pub use retry::{RetryPolicy, retry_checkout};
pub use service::{InventoryService, ReleaseReport};
pub use sweeper::{ReclamationSweeper, SweepReport};
