//! Redis-backed cart store.
//!
//! Carts are stored in Redis with:
//! - **Key**: `cart:{tenant_id}:{session_id}` → bincode-serialized [`Cart`]
//! - **TTL**: set on every write (`SET EX`), so an idle cart disappears on its own
//!
//! # Example
//!
//! ```no_run
//! use stockhold_redis::RedisCartStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCartStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use stockhold_core::cart::Cart;
use stockhold_core::{CartStore, InventoryError, Result, SessionId, TenantId};

/// Redis cart store with TTL-based expiration.
#[derive(Clone)]
pub struct RedisCartStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCartStore").finish_non_exhaustive()
    }
}

impl RedisCartStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            InventoryError::Storage(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            InventoryError::Storage(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }

    /// Redis key for a cart. Tenants never share a key space.
    fn cart_key(tenant_id: TenantId, session_id: &SessionId) -> String {
        format!("cart:{tenant_id}:{session_id}")
    }

    /// Remaining TTL of a stored cart, `None` if it is missing or has no expiry.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if Redis is unreachable.
    pub async fn ttl(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<Option<Duration>> {
        let mut conn = self.conn_manager.clone();
        let key = Self::cart_key(tenant_id, session_id);

        let ttl_seconds: i64 = conn
            .ttl(&key)
            .await
            .map_err(|e| InventoryError::Storage(format!("Failed to get cart TTL: {e}")))?;

        // -2: missing key, -1: no expiry
        Ok((ttl_seconds > 0).then(|| Duration::seconds(ttl_seconds)))
    }
}

impl CartStore for RedisCartStore {
    async fn load(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<Option<Cart>> {
        let mut conn = self.conn_manager.clone();
        let key = Self::cart_key(tenant_id, session_id);

        let bytes: Option<Vec<u8>> = conn
            .get(&key)
            .await
            .map_err(|e| InventoryError::Storage(format!("Failed to get cart from Redis: {e}")))?;

        bytes
            .map(|bytes| {
                bincode::deserialize(&bytes)
                    .map_err(|e| InventoryError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn save(&self, cart: &Cart, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::cart_key(cart.tenant_id, &cart.session_id);

        let bytes =
            bincode::serialize(cart).map_err(|e| InventoryError::Serialization(e.to_string()))?;

        // SET EX rejects 0
        let ttl_seconds = u64::try_from(ttl.num_seconds()).unwrap_or(0).max(1);

        let _: () = conn
            .set_ex(&key, bytes, ttl_seconds)
            .await
            .map_err(|e| InventoryError::Storage(format!("Failed to store cart: {e}")))?;

        tracing::debug!(
            tenant_id = %cart.tenant_id,
            session_id = %cart.session_id,
            items = cart.items.len(),
            ttl_seconds,
            "Stored cart in Redis"
        );

        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::cart_key(tenant_id, session_id);

        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| InventoryError::Storage(format!("Failed to delete cart from Redis: {e}")))?;

        tracing::debug!(%tenant_id, %session_id, "Deleted cart from Redis");
        Ok(())
    }
}
