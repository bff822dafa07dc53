//! Mock reconciliation sink for testing.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use stockhold_core::{InventoryError, ReconciliationFault, ReconciliationSink, Result};

/// Sink that records every escalated fault.
#[derive(Clone, Debug, Default)]
pub struct RecordingReconciliationSink {
    faults: Arc<Mutex<Vec<ReconciliationFault>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingReconciliationSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Faults escalated so far, in order.
    #[must_use]
    pub fn faults(&self) -> Vec<ReconciliationFault> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every subsequent escalation fail (simulates an unreachable review queue).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ReconciliationSink for RecordingReconciliationSink {
    fn escalate<'a>(&'a self, fault: &'a ReconciliationFault) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(InventoryError::Storage("review queue unavailable".into()));
            }
            self.faults
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(fault.clone());
            Ok(())
        })
    }
}
