//! Lease used to elect a single active reclamation sweeper.
//!
//! A lease is a time-bounded exclusive claim on a named background job. At most one
//! holder owns an unexpired lease at any time; a crashed holder simply stops renewing
//! and the lease lapses after its duration.

use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Proof of lease ownership.
///
/// `token` increases every time the lease changes hands, so a stale holder cannot
/// renew or release a lease someone else has since acquired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    /// Lease name (one per background job)
    pub name: String,
    /// Instance that owns the lease
    pub holder: String,
    /// Fencing token
    pub token: i64,
    /// When the lease lapses unless renewed
    pub expires_at: DateTime<Utc>,
}

/// Leader-election lease store.
pub trait SweepLease: Send + Sync {
    /// Acquire `name` for `holder` if it is free, expired, or already held by `holder`.
    ///
    /// Returns `Ok(None)` when another holder owns an unexpired lease.
    ///
    /// # Errors
    ///
    /// Returns error if the lease store is unreachable.
    fn try_acquire<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseGrant>>>;

    /// Extend an owned lease. Returns `Ok(None)` if the lease was lost.
    ///
    /// # Errors
    ///
    /// Returns error if the lease store is unreachable.
    fn renew<'a>(
        &'a self,
        grant: &'a LeaseGrant,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseGrant>>>;

    /// Give up an owned lease so another instance can acquire it immediately.
    ///
    /// Releasing a lease that was already lost is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the lease store is unreachable.
    fn release<'a>(&'a self, grant: &'a LeaseGrant) -> BoxFuture<'a, Result<()>>;
}
