//! `PostgreSQL` inventory store.
//!
//! Product rows are locked with `SELECT ... FOR UPDATE`; the lock is held until the
//! surrounding transaction commits or rolls back. Each transaction sets its own
//! `lock_timeout` so no caller waits on a row forever.
//!
//! Transaction flow for a checkout:
//! 1. `BEGIN` and `set_config('lock_timeout', ..., true)`
//! 2. `SELECT ... FOR UPDATE` on each product row, ascending id
//! 3. `SUM(quantity)` of active holds, compare with stock
//! 4. `INSERT` the holds
//! 5. `COMMIT` (releases the row locks)

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use stockhold_core::{
    InventoryError, InventoryStore, InventoryTransaction, OrderId, ProductId, ProductStock,
    Reservation, ReservationId, ReservationStatus, Result, TenantId,
};

const RESERVATION_COLUMNS: &str = "id, tenant_id, order_id, product_id, quantity, status, \
                                   created_at, expires_at, released_at";

/// Map a driver error, turning lock-wait failures into [`InventoryError::LockTimeout`].
///
/// `55P03` is `lock_not_available` (raised when `lock_timeout` elapses) and `40P01` is
/// `deadlock_detected`; both leave nothing applied and are safe to retry.
pub(crate) fn database_error(context: &str, e: &sqlx::Error) -> InventoryError {
    if let sqlx::Error::Database(db) = e {
        if matches!(db.code().as_deref(), Some("55P03" | "40P01")) {
            return InventoryError::LockTimeout(format!("{context}: {db}"));
        }
    }
    InventoryError::Storage(format!("{context}: {e}"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| InventoryError::Storage(format!("{column} out of range: {value}")))
}

fn to_i32(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| InventoryError::Storage(format!("{column} out of range: {value}")))
}

fn row_to_product(row: &PgRow) -> Result<ProductStock> {
    let stock: i32 = row
        .try_get("stock_quantity")
        .map_err(|e| database_error("Failed to decode product", &e))?;
    Ok(ProductStock {
        id: ProductId::from_uuid(
            row.try_get("id")
                .map_err(|e| database_error("Failed to decode product", &e))?,
        ),
        tenant_id: TenantId::from_uuid(
            row.try_get("tenant_id")
                .map_err(|e| database_error("Failed to decode product", &e))?,
        ),
        stock_quantity: to_u32(i64::from(stock), "stock_quantity")?,
        archived: row
            .try_get("archived")
            .map_err(|e| database_error("Failed to decode product", &e))?,
    })
}

fn row_to_reservation(row: &PgRow) -> Result<Reservation> {
    let decode = |e: sqlx::Error| database_error("Failed to decode reservation", &e);
    let quantity: i32 = row.try_get("quantity").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(decode)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode)?),
        quantity: to_u32(i64::from(quantity), "quantity")?,
        status: ReservationStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        released_at: row.try_get("released_at").map_err(decode)?,
    })
}

/// `PostgreSQL` [`InventoryStore`].
///
/// # Example
///
/// ```no_run
/// use stockhold_postgres::PostgresInventoryStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = sqlx::PgPool::connect("postgres://localhost/stockhold").await?;
/// let store = PostgresInventoryStore::new(pool);
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InventoryError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Create a product or overwrite its stock level.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn upsert_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        stock_quantity: u32,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO products (tenant_id, id, stock_quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, id)
            DO UPDATE SET stock_quantity = EXCLUDED.stock_quantity, updated_at = NOW()
            ",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.as_uuid())
        .bind(to_i32(stock_quantity, "stock_quantity")?)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to upsert product", &e))?;
        Ok(())
    }

    /// Archive a product. Archived products accept no new holds.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ProductNotFound`] if no row was updated.
    pub async fn archive_product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET archived = TRUE, updated_at = NOW() WHERE tenant_id = $1 AND id = $2",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to archive product", &e))?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::ProductNotFound { product_id });
        }
        Ok(())
    }
}

impl InventoryStore for PostgresInventoryStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self, lock_timeout: Duration) -> Result<PostgresTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("Failed to start transaction", &e))?;

        // `true` scopes the setting to this transaction.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", lock_timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await
            .map_err(|e| database_error("Failed to set lock timeout", &e))?;

        Ok(PostgresTransaction { tx })
    }

    async fn product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>> {
        sqlx::query(
            "SELECT tenant_id, id, stock_quantity, archived FROM products WHERE tenant_id = $1 AND id = $2",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to read product", &e))?
        .as_ref()
        .map(row_to_product)
        .transpose()
    }

    async fn active_quantity(&self, tenant_id: TenantId, product_id: ProductId) -> Result<u32> {
        let (total,): (i64,) = sqlx::query_as(
            r"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM reservations
            WHERE tenant_id = $1 AND product_id = $2 AND status = 'active'
            ",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("Failed to sum active holds", &e))?;
        to_u32(total, "active quantity")
    }

    async fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(*reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to read reservation", &e))?
        .as_ref()
        .map(row_to_reservation)
        .transpose()
    }

    async fn find_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE status = 'active' AND expires_at < $1
            ORDER BY expires_at ASC, id ASC
            LIMIT $2
            "
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to find overdue holds", &e))?;

        rows.iter().map(row_to_reservation).collect()
    }
}

/// Open transaction on [`PostgresInventoryStore`]. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

impl InventoryTransaction for PostgresTransaction {
    async fn lock_product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>> {
        sqlx::query(
            r"
            SELECT tenant_id, id, stock_quantity, archived
            FROM products
            WHERE tenant_id = $1 AND id = $2
            FOR UPDATE
            ",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| database_error("Failed to lock product", &e))?
        .as_ref()
        .map(row_to_product)
        .transpose()
    }

    async fn active_quantity(&mut self, tenant_id: TenantId, product_id: ProductId) -> Result<u32> {
        let (total,): (i64,) = sqlx::query_as(
            r"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM reservations
            WHERE tenant_id = $1 AND product_id = $2 AND status = 'active'
            ",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| database_error("Failed to sum active holds", &e))?;
        to_u32(total, "active quantity")
    }

    async fn active_reservation(
        &mut self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Option<Reservation>> {
        sqlx::query(&format!(
            r"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE order_id = $1 AND product_id = $2 AND status = 'active'
            "
        ))
        .bind(*order_id.as_uuid())
        .bind(*product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| database_error("Failed to read active hold", &e))?
        .as_ref()
        .map(row_to_reservation)
        .transpose()
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO reservations (
                id, tenant_id, order_id, product_id, quantity, status,
                created_at, expires_at, released_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(*reservation.id.as_uuid())
        .bind(*reservation.tenant_id.as_uuid())
        .bind(*reservation.order_id.as_uuid())
        .bind(*reservation.product_id.as_uuid())
        .bind(to_i32(reservation.quantity, "quantity")?)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.released_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                InventoryError::DuplicateReservation {
                    order_id: reservation.order_id,
                    product_id: reservation.product_id,
                }
            } else {
                database_error("Failed to insert reservation", &e)
            }
        })?;
        Ok(())
    }

    async fn reservation(&mut self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(*reservation_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| database_error("Failed to read reservation", &e))?
        .as_ref()
        .map(row_to_reservation)
        .transpose()
    }

    async fn reservations_for_order(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE order_id = $1
            ORDER BY product_id ASC, id ASC
            "
        ))
        .bind(*order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| database_error("Failed to read order holds", &e))?;

        rows.iter().map(row_to_reservation).collect()
    }

    async fn transition(
        &mut self,
        reservation_id: ReservationId,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE reservations
            SET status = $2, released_at = $3
            WHERE id = $1 AND status = 'active'
            ",
        )
        .bind(*reservation_id.as_uuid())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| database_error("Failed to transition reservation", &e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn decrement_stock(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE products
            SET stock_quantity = stock_quantity - $3, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND stock_quantity >= $3
            ",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.as_uuid())
        .bind(to_i32(quantity, "quantity")?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| database_error("Failed to decrement stock", &e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| database_error("Failed to commit transaction", &e))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| database_error("Failed to roll back transaction", &e))
    }
}
