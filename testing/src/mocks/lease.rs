//! Mock sweeper lease for testing.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use stockhold_core::{Clock, InventoryError, LeaseGrant, Result, SweepLease};

fn lease_end(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .map(|d| now + d)
        .map_err(|e| InventoryError::Storage(format!("Invalid lease duration: {e}")))
}

/// Mock lease store.
///
/// Same acquisition rules as the Postgres lease table: a lease can be taken when it
/// is free, expired, or already owned by the caller, and every acquisition bumps the
/// fencing token.
#[derive(Clone)]
pub struct InMemorySweepLease {
    leases: Arc<Mutex<HashMap<String, LeaseGrant>>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySweepLease {
    /// Create a new mock lease store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Current owner of a lease, if it is unexpired (for testing).
    #[must_use]
    pub fn holder(&self, name: &str) -> Option<String> {
        let now = self.clock.now();
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .filter(|grant| grant.expires_at > now)
            .map(|grant| grant.holder.clone())
    }
}

impl SweepLease for InMemorySweepLease {
    fn try_acquire<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseGrant>>> {
        Box::pin(async move {
            let now = self.clock.now();
            let expires_at = lease_end(now, duration)?;
            let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);

            let token = match leases.get(name) {
                Some(current) if current.expires_at > now && current.holder != holder => {
                    return Ok(None);
                }
                Some(current) => current.token + 1,
                None => 1,
            };

            let grant = LeaseGrant {
                name: name.to_string(),
                holder: holder.to_string(),
                token,
                expires_at,
            };
            leases.insert(name.to_string(), grant.clone());
            Ok(Some(grant))
        })
    }

    fn renew<'a>(
        &'a self,
        grant: &'a LeaseGrant,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseGrant>>> {
        Box::pin(async move {
            let now = self.clock.now();
            let expires_at = lease_end(now, duration)?;
            let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);

            match leases.get_mut(&grant.name) {
                Some(current)
                    if current.holder == grant.holder
                        && current.token == grant.token
                        && current.expires_at > now =>
                {
                    current.expires_at = expires_at;
                    Ok(Some(current.clone()))
                }
                _ => Ok(None),
            }
        })
    }

    fn release<'a>(&'a self, grant: &'a LeaseGrant) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = leases.get_mut(&grant.name) {
                if current.holder == grant.holder && current.token == grant.token {
                    current.expires_at = DateTime::<Utc>::UNIX_EPOCH;
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ManualClock;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn only_one_holder_at_a_time() {
        let clock = ManualClock::default();
        let lease = InMemorySweepLease::new(Arc::new(clock.clone()));

        let a = lease.try_acquire("sweeper", "a", LEASE).await.unwrap();
        assert!(a.is_some());
        assert!(lease.try_acquire("sweeper", "b", LEASE).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(31));
        let b = lease.try_acquire("sweeper", "b", LEASE).await.unwrap().unwrap();
        assert_eq!(b.token, 2);

        // The old holder lost its lease and cannot renew it.
        assert!(lease.renew(&a.unwrap(), LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_frees_the_lease_immediately() {
        let clock = ManualClock::default();
        let lease = InMemorySweepLease::new(Arc::new(clock));

        let a = lease.try_acquire("sweeper", "a", LEASE).await.unwrap().unwrap();
        lease.release(&a).await.unwrap();
        assert_eq!(lease.holder("sweeper"), None);
        assert!(lease.try_acquire("sweeper", "b", LEASE).await.unwrap().is_some());
    }
}
