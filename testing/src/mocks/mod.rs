//! Mock implementations of the engine's environment and storage traits.

mod cart;
mod clock;
mod inventory;
mod lease;
mod sink;

pub use cart::InMemoryCartStore;
pub use clock::{FixedClock, ManualClock, test_clock};
pub use inventory::{InMemoryInventoryStore, InMemoryTransaction};
pub use lease::InMemorySweepLease;
pub use sink::RecordingReconciliationSink;
