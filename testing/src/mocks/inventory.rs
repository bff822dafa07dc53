//! In-memory inventory store with row-lock semantics.
//!
//! Mirrors what the Postgres store gives the engine under `READ COMMITTED`:
//!
//! - `lock_product` and `transition` take an exclusive per-row lock held until the
//!   transaction commits or is dropped; waits are bounded by the lock timeout
//! - reads inside a transaction see committed rows plus the transaction's own writes
//! - writes are buffered and applied atomically on commit; dropping the transaction
//!   discards them

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stockhold_core::{
    InventoryError, InventoryStore, InventoryTransaction, OrderId, ProductId, ProductStock,
    Reservation, ReservationId, ReservationStatus, Result, TenantId,
};
use tokio::sync::OwnedMutexGuard;

type ProductKey = (TenantId, ProductId);
type RowLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductKey, ProductStock>,
    reservations: HashMap<ReservationId, Reservation>,
}

#[derive(Debug, Default)]
struct RowLocks {
    products: HashMap<ProductKey, RowLock>,
    reservations: HashMap<ReservationId, RowLock>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<RowLocks>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn product_lock(&self, key: ProductKey) -> RowLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.products.entry(key).or_default())
    }

    fn reservation_lock(&self, id: ReservationId) -> RowLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.reservations.entry(id).or_default())
    }
}

fn sum_quantities<'a>(reservations: impl Iterator<Item = &'a Reservation>) -> u32 {
    reservations.fold(0u32, |total, r| total.saturating_add(r.quantity))
}

async fn acquire(lock: RowLock, timeout: Duration, row: String) -> Result<OwnedMutexGuard<()>> {
    tokio::time::timeout(timeout, lock.lock_owned())
        .await
        .map_err(|_| InventoryError::LockTimeout(format!("could not lock {row} within {timeout:?}")))
}

/// In-memory [`InventoryStore`] for tests.
///
/// Cloning is cheap; clones share the same tables and row locks.
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    shared: Arc<Shared>,
}

impl InMemoryInventoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a live product with the given stock.
    pub fn seed_product(&self, tenant_id: TenantId, product_id: ProductId, stock: u32) {
        self.shared.tables().products.insert(
            (tenant_id, product_id),
            ProductStock::new(tenant_id, product_id, stock),
        );
    }

    /// Mark a product as archived.
    pub fn archive_product(&self, tenant_id: TenantId, product_id: ProductId) {
        if let Some(product) = self
            .shared
            .tables()
            .products
            .get_mut(&(tenant_id, product_id))
        {
            product.archived = true;
        }
    }

    /// Committed stock of a product.
    #[must_use]
    pub fn stock(&self, tenant_id: TenantId, product_id: ProductId) -> Option<u32> {
        self.shared
            .tables()
            .products
            .get(&(tenant_id, product_id))
            .map(|p| p.stock_quantity)
    }

    /// Sum of committed active holds for a product.
    #[must_use]
    pub fn committed_active_quantity(&self, tenant_id: TenantId, product_id: ProductId) -> u32 {
        let tables = self.shared.tables();
        sum_quantities(tables.reservations.values().filter(|r| {
            r.is_active() && r.tenant_id == tenant_id && r.product_id == product_id
        }))
    }

    /// Every committed reservation for a product.
    #[must_use]
    pub fn reservations_for_product(&self, product_id: ProductId) -> Vec<Reservation> {
        let mut reservations: Vec<Reservation> = self
            .shared
            .tables()
            .reservations
            .values()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.created_at, r.id));
        reservations
    }

    /// Insert a committed reservation directly (bypasses the gate).
    pub fn seed_reservation(&self, reservation: Reservation) {
        self.shared
            .tables()
            .reservations
            .insert(reservation.id, reservation);
    }

    /// Take a product's row lock outside any transaction, simulating a competing
    /// transaction. The lock is held until the guard is dropped.
    pub async fn hold_product_lock(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> OwnedMutexGuard<()> {
        self.shared
            .product_lock((tenant_id, product_id))
            .lock_owned()
            .await
    }
}

impl InventoryStore for InMemoryInventoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self, lock_timeout: Duration) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            lock_timeout,
            product_guards: HashMap::new(),
            reservation_guards: HashMap::new(),
            inserted: Vec::new(),
            transitions: HashMap::new(),
            decrements: HashMap::new(),
        })
    }

    async fn product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>> {
        Ok(self
            .shared
            .tables()
            .products
            .get(&(tenant_id, product_id))
            .cloned())
    }

    async fn active_quantity(&self, tenant_id: TenantId, product_id: ProductId) -> Result<u32> {
        Ok(self.committed_active_quantity(tenant_id, product_id))
    }

    async fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.shared.tables().reservations.get(&reservation_id).cloned())
    }

    async fn find_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>> {
        let mut overdue: Vec<Reservation> = self
            .shared
            .tables()
            .reservations
            .values()
            .filter(|r| r.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|r| (r.expires_at, r.id));
        overdue.truncate(limit);
        Ok(overdue)
    }
}

/// Open transaction on an [`InMemoryInventoryStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    product_guards: HashMap<ProductKey, OwnedMutexGuard<()>>,
    reservation_guards: HashMap<ReservationId, OwnedMutexGuard<()>>,
    inserted: Vec<Reservation>,
    transitions: HashMap<ReservationId, (ReservationStatus, DateTime<Utc>)>,
    decrements: HashMap<ProductKey, u32>,
}

impl InMemoryTransaction {
    /// Apply this transaction's pending transition, if any.
    fn overlay(&self, mut reservation: Reservation) -> Reservation {
        if let Some((status, at)) = self.transitions.get(&reservation.id) {
            if reservation.is_active() {
                reservation.status = *status;
                reservation.released_at = Some(*at);
            }
        }
        reservation
    }

    /// Committed reservations plus this transaction's writes.
    fn snapshot(&self) -> Vec<Reservation> {
        let committed: Vec<Reservation> =
            self.shared.tables().reservations.values().cloned().collect();
        committed
            .into_iter()
            .chain(self.inserted.iter().cloned())
            .map(|r| self.overlay(r))
            .collect()
    }

    fn product_view(&self, key: ProductKey) -> Option<ProductStock> {
        let mut product = self.shared.tables().products.get(&key).cloned()?;
        let pending = self.decrements.get(&key).copied().unwrap_or(0);
        product.stock_quantity = product.stock_quantity.saturating_sub(pending);
        Some(product)
    }

    async fn ensure_product_lock(&mut self, key: ProductKey) -> Result<()> {
        if !self.product_guards.contains_key(&key) {
            let lock = self.shared.product_lock(key);
            let guard = acquire(lock, self.lock_timeout, format!("product {}", key.1)).await?;
            self.product_guards.insert(key, guard);
        }
        Ok(())
    }

    async fn ensure_reservation_lock(&mut self, id: ReservationId) -> Result<()> {
        if !self.reservation_guards.contains_key(&id) {
            let lock = self.shared.reservation_lock(id);
            let guard = acquire(lock, self.lock_timeout, format!("reservation {id}")).await?;
            self.reservation_guards.insert(id, guard);
        }
        Ok(())
    }
}

impl InventoryTransaction for InMemoryTransaction {
    async fn lock_product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>> {
        let key = (tenant_id, product_id);
        self.ensure_product_lock(key).await?;
        Ok(self.product_view(key))
    }

    async fn active_quantity(&mut self, tenant_id: TenantId, product_id: ProductId) -> Result<u32> {
        let snapshot = self.snapshot();
        Ok(sum_quantities(snapshot.iter().filter(|r| {
            r.is_active() && r.tenant_id == tenant_id && r.product_id == product_id
        })))
    }

    async fn active_reservation(
        &mut self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Option<Reservation>> {
        Ok(self
            .snapshot()
            .into_iter()
            .find(|r| r.is_active() && r.order_id == order_id && r.product_id == product_id))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let snapshot = self.snapshot();
        if snapshot.iter().any(|r| r.id == reservation.id) {
            return Err(InventoryError::Storage(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        if reservation.is_active()
            && snapshot.iter().any(|r| {
                r.is_active()
                    && r.order_id == reservation.order_id
                    && r.product_id == reservation.product_id
            })
        {
            return Err(InventoryError::DuplicateReservation {
                order_id: reservation.order_id,
                product_id: reservation.product_id,
            });
        }
        self.inserted.push(reservation.clone());
        Ok(())
    }

    async fn reservation(&mut self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self
            .snapshot()
            .into_iter()
            .find(|r| r.id == reservation_id))
    }

    async fn reservations_for_order(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let mut reservations: Vec<Reservation> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.order_id == order_id)
            .collect();
        reservations.sort_by_key(|r| (r.product_id, r.id));
        Ok(reservations)
    }

    async fn transition(
        &mut self,
        reservation_id: ReservationId,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.ensure_reservation_lock(reservation_id).await?;
        let current = self.snapshot().into_iter().find(|r| r.id == reservation_id);
        match current {
            Some(r) if r.is_active() => {
                self.transitions.insert(reservation_id, (to, at));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn decrement_stock(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let key = (tenant_id, product_id);
        self.ensure_product_lock(key).await?;
        match self.product_view(key) {
            Some(product) if product.stock_quantity >= quantity => {
                *self.decrements.entry(key).or_insert(0) += quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self) -> Result<()> {
        let inserted: Vec<Reservation> = self
            .inserted
            .iter()
            .cloned()
            .map(|r| self.overlay(r))
            .collect();

        let mut tables = self.shared.tables();
        for reservation in inserted {
            tables.reservations.insert(reservation.id, reservation);
        }
        for (id, (status, at)) in &self.transitions {
            if let Some(reservation) = tables.reservations.get_mut(id) {
                if reservation.is_active() {
                    reservation.status = *status;
                    reservation.released_at = Some(*at);
                }
            }
        }
        for (key, quantity) in &self.decrements {
            if let Some(product) = tables.products.get_mut(key) {
                product.stock_quantity = product.stock_quantity.saturating_sub(*quantity);
            }
        }
        drop(tables);
        // Row locks are released when `self` drops here.
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn hold(tenant: TenantId, product: ProductId, quantity: u32) -> Reservation {
        Reservation::new(
            tenant,
            OrderId::new(),
            product,
            quantity,
            Utc::now(),
            ChronoDuration::minutes(15),
        )
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryInventoryStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.seed_product(tenant, product, 10);

        let mut tx = store.begin(TIMEOUT).await.unwrap();
        tx.lock_product(tenant, product).await.unwrap();
        tx.insert_reservation(&hold(tenant, product, 4)).await.unwrap();

        assert_eq!(tx.active_quantity(tenant, product).await.unwrap(), 4);
        assert_eq!(store.committed_active_quantity(tenant, product), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.committed_active_quantity(tenant, product), 4);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_and_unlocks() {
        let store = InMemoryInventoryStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.seed_product(tenant, product, 10);

        {
            let mut tx = store.begin(TIMEOUT).await.unwrap();
            tx.lock_product(tenant, product).await.unwrap();
            tx.insert_reservation(&hold(tenant, product, 4)).await.unwrap();
            assert!(tx.decrement_stock(tenant, product, 4).await.unwrap());
        }

        assert_eq!(store.committed_active_quantity(tenant, product), 0);
        assert_eq!(store.stock(tenant, product), Some(10));

        let mut tx = store.begin(TIMEOUT).await.unwrap();
        assert!(tx.lock_product(tenant, product).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn competing_lock_times_out() {
        let store = InMemoryInventoryStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.seed_product(tenant, product, 1);

        let _held = store.hold_product_lock(tenant, product).await;
        let mut tx = store.begin(TIMEOUT).await.unwrap();
        let err = tx.lock_product(tenant, product).await.unwrap_err();
        assert!(matches!(err, InventoryError::LockTimeout(_)));
    }

    #[tokio::test]
    async fn conditional_transition_only_wins_once() {
        let store = InMemoryInventoryStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.seed_product(tenant, product, 5);
        let reservation = hold(tenant, product, 2);
        store.seed_reservation(reservation.clone());

        let mut first = store.begin(TIMEOUT).await.unwrap();
        assert!(
            first
                .transition(reservation.id, ReservationStatus::Converted, Utc::now())
                .await
                .unwrap()
        );

        // The row stays locked until `first` commits.
        let mut second = store.begin(TIMEOUT).await.unwrap();
        assert!(matches!(
            second
                .transition(reservation.id, ReservationStatus::Expired, Utc::now())
                .await,
            Err(InventoryError::LockTimeout(_))
        ));
        drop(second);

        first.commit().await.unwrap();

        let mut third = store.begin(TIMEOUT).await.unwrap();
        assert!(
            !third
                .transition(reservation.id, ReservationStatus::Expired, Utc::now())
                .await
                .unwrap()
        );
        let stored = store.reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Converted);
        assert!(stored.released_at.is_some());
    }

    #[tokio::test]
    async fn decrement_is_guarded() {
        let store = InMemoryInventoryStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.seed_product(tenant, product, 3);

        let mut tx = store.begin(TIMEOUT).await.unwrap();
        assert!(tx.decrement_stock(tenant, product, 2).await.unwrap());
        assert!(!tx.decrement_stock(tenant, product, 2).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.stock(tenant, product), Some(1));
    }

    #[tokio::test]
    async fn duplicate_active_hold_is_rejected() {
        let store = InMemoryInventoryStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.seed_product(tenant, product, 10);
        let first = hold(tenant, product, 1);
        let mut second = hold(tenant, product, 1);
        second.order_id = first.order_id;

        let mut tx = store.begin(TIMEOUT).await.unwrap();
        tx.insert_reservation(&first).await.unwrap();
        let err = tx.insert_reservation(&second).await.unwrap_err();
        assert!(matches!(err, InventoryError::DuplicateReservation { .. }));
    }

    #[tokio::test]
    async fn find_overdue_is_strict_and_ordered() {
        let store = InMemoryInventoryStore::new();
        let (tenant, product) = (TenantId::new(), ProductId::new());
        store.seed_product(tenant, product, 10);
        let now = Utc::now();

        let mut older = hold(tenant, product, 1);
        older.expires_at = now - ChronoDuration::minutes(2);
        let mut newer = hold(tenant, product, 1);
        newer.expires_at = now - ChronoDuration::minutes(1);
        let mut boundary = hold(tenant, product, 1);
        boundary.expires_at = now;
        for r in [&newer, &older, &boundary] {
            store.seed_reservation(r.clone());
        }

        let overdue = store.find_overdue(now, 10).await.unwrap();
        let ids: Vec<_> = overdue.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }
}
