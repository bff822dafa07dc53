//! Mock cart store for testing.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use stockhold_core::{Cart, CartStore, Clock, Result, SessionId, TenantId};

type CartKey = (TenantId, SessionId);

/// Mock cart store.
///
/// Uses in-memory storage; entries lapse once the injected clock passes their TTL,
/// the way a Redis key would.
#[derive(Clone)]
pub struct InMemoryCartStore {
    carts: Arc<Mutex<HashMap<CartKey, (Cart, DateTime<Utc>)>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCartStore {
    /// Create a new mock cart store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            carts: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Get count of unexpired carts (for testing).
    #[must_use]
    pub fn cart_count(&self) -> usize {
        let now = self.clock.now();
        self.carts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }
}

impl CartStore for InMemoryCartStore {
    async fn load(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<Option<Cart>> {
        let now = self.clock.now();
        let key = (tenant_id, session_id.clone());
        let mut carts = self.carts.lock().unwrap_or_else(PoisonError::into_inner);

        match carts.get(&key) {
            Some((_, expires_at)) if *expires_at <= now => {
                carts.remove(&key);
                Ok(None)
            }
            Some((cart, _)) => Ok(Some(cart.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, cart: &Cart, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + ttl;
        self.carts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (cart.tenant_id, cart.session_id.clone()),
                (cart.clone(), expires_at),
            );
        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<()> {
        self.carts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(tenant_id, session_id.clone()));
        Ok(())
    }
}
