//! Manual-review queue for reconciliation faults.
//!
//! Every payment that settled against a hold that was no longer active lands here for a
//! human to refund or fulfil by hand. Settlement is delivered at least once, so the
//! same fault may be escalated several times; a unique index on
//! `(order_id, reservation_id)` collapses duplicates into one entry.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};
use stockhold_core::{
    FaultKind, InventoryError, OrderId, ProductId, ReconciliationFault, ReconciliationSink,
    ReservationId, ReservationStatus, Result,
};

use crate::store::database_error;

/// Review status of a queued fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    /// Waiting for someone to look at it
    Pending,
    /// Someone is on it
    Investigating,
    /// Refunded or fulfilled
    Resolved,
    /// Not actionable (e.g. test order)
    Dismissed,
}

impl ReviewStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "investigating" => Ok(Self::Investigating),
            "resolved" => Ok(Self::Resolved),
            "dismissed" => Ok(Self::Dismissed),
            _ => Err(InventoryError::Storage(format!("Invalid review status: {s}"))),
        }
    }
}

/// A queued fault plus its review trail.
#[derive(Debug, Clone)]
pub struct ReviewEntry {
    /// Queue entry id
    pub id: i64,
    /// The fault as detected
    pub fault: ReconciliationFault,
    /// Review status
    pub status: ReviewStatus,
    /// When the fault was first queued
    pub created_at: DateTime<Utc>,
    /// When review finished
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who finished the review
    pub resolved_by: Option<String>,
    /// What was done
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed [`ReconciliationSink`].
///
/// # Example
///
/// ```no_run
/// use stockhold_postgres::{PostgresReviewQueue, ReviewStatus};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = PostgresReviewQueue::new(pool);
///
/// let pending = queue.list_pending(100).await?;
/// println!("Faults awaiting review: {}", pending.len());
///
/// queue.update_status(pending[0].id, ReviewStatus::Investigating).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresReviewQueue {
    pool: PgPool,
}

impl PostgresReviewQueue {
    /// Create a queue over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Queue a fault. Returns `None` when the same fault was already queued.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the insert fails.
    pub async fn record(&self, fault: &ReconciliationFault) -> Result<Option<i64>> {
        let quantity = i32::try_from(fault.quantity)
            .map_err(|_| InventoryError::Storage(format!("quantity out of range: {}", fault.quantity)))?;

        let id: Option<(i64,)> = sqlx::query_as(
            r"
            INSERT INTO reconciliation_faults (
                order_id, reservation_id, product_id, quantity,
                kind, observed_status, detected_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            RETURNING id
            ",
        )
        .bind(*fault.order_id.as_uuid())
        .bind(fault.reservation_id.map(|id| *id.as_uuid()))
        .bind(fault.product_id.map(|id| *id.as_uuid()))
        .bind(quantity)
        .bind(fault.kind.as_str())
        .bind(fault.observed_status.map(|s| s.as_str()))
        .bind(fault.detected_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to queue reconciliation fault", &e))?;

        match id {
            Some((id,)) => {
                tracing::warn!(
                    review_id = id,
                    order_id = %fault.order_id,
                    kind = %fault.kind,
                    "Reconciliation fault queued for review"
                );
                metrics::counter!("stockhold_review_queue_added_total", "kind" => fault.kind.as_str())
                    .increment(1);
                Ok(Some(id))
            }
            None => {
                tracing::debug!(order_id = %fault.order_id, "Reconciliation fault already queued");
                Ok(None)
            }
        }
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<ReviewEntry>> {
        self.list_by_status(ReviewStatus::Pending, limit).await
    }

    /// Entries with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the query fails.
    pub async fn list_by_status(&self, status: ReviewStatus, limit: usize) -> Result<Vec<ReviewEntry>> {
        let rows = sqlx::query(
            r"
            SELECT
                id, order_id, reservation_id, product_id, quantity, kind,
                observed_status, detected_at, status, created_at,
                resolved_at, resolved_by, resolution_notes
            FROM reconciliation_faults
            WHERE status = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to list review entries", &e))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Move an entry to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the update fails.
    pub async fn update_status(&self, id: i64, status: ReviewStatus) -> Result<()> {
        sqlx::query("UPDATE reconciliation_faults SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("Failed to update review status", &e))?;

        tracing::info!(review_id = id, status = status.as_str(), "Review entry status updated");
        Ok(())
    }

    /// Close an entry as resolved.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: Option<&str>) -> Result<()> {
        self.close(id, ReviewStatus::Resolved, resolved_by, notes).await?;
        metrics::counter!("stockhold_review_queue_resolved_total").increment(1);
        Ok(())
    }

    /// Close an entry as not actionable.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the update fails.
    pub async fn mark_dismissed(&self, id: i64, dismissed_by: &str, reason: &str) -> Result<()> {
        self.close(id, ReviewStatus::Dismissed, dismissed_by, Some(reason))
            .await
    }

    async fn close(
        &self,
        id: i64,
        status: ReviewStatus,
        by: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE reconciliation_faults
            SET status = $1,
                resolved_at = NOW(),
                resolved_by = $2,
                resolution_notes = $3
            WHERE id = $4
            ",
        )
        .bind(status.as_str())
        .bind(by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to close review entry", &e))?;

        tracing::info!(review_id = id, status = status.as_str(), by, "Review entry closed");
        Ok(())
    }

    /// Number of entries awaiting review.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reconciliation_faults WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| database_error("Failed to count review entries", &e))?;
        Ok(count)
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<ReviewEntry> {
        let decode = |e: sqlx::Error| database_error("Failed to decode review entry", &e);

        let quantity: i32 = row.try_get("quantity").map_err(decode)?;
        let kind: String = row.try_get("kind").map_err(decode)?;
        let observed: Option<String> = row.try_get("observed_status").map_err(decode)?;
        let status: String = row.try_get("status").map_err(decode)?;
        let reservation_id: Option<uuid::Uuid> = row.try_get("reservation_id").map_err(decode)?;
        let product_id: Option<uuid::Uuid> = row.try_get("product_id").map_err(decode)?;

        Ok(ReviewEntry {
            id: row.try_get("id").map_err(decode)?,
            fault: ReconciliationFault {
                order_id: OrderId::from_uuid(row.try_get("order_id").map_err(decode)?),
                reservation_id: reservation_id.map(ReservationId::from_uuid),
                product_id: product_id.map(ProductId::from_uuid),
                quantity: u32::try_from(quantity).map_err(|_| {
                    InventoryError::Storage(format!("quantity out of range: {quantity}"))
                })?,
                kind: FaultKind::parse(&kind)?,
                observed_status: observed
                    .as_deref()
                    .map(ReservationStatus::parse)
                    .transpose()?,
                detected_at: row.try_get("detected_at").map_err(decode)?,
            },
            status: ReviewStatus::parse(&status)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            resolved_at: row.try_get("resolved_at").map_err(decode)?,
            resolved_by: row.try_get("resolved_by").map_err(decode)?,
            resolution_notes: row.try_get("resolution_notes").map_err(decode)?,
        })
    }
}

impl ReconciliationSink for PostgresReviewQueue {
    fn escalate<'a>(&'a self, fault: &'a ReconciliationFault) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(fault).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn review_status_roundtrip() {
        for status in [
            ReviewStatus::Pending,
            ReviewStatus::Investigating,
            ReviewStatus::Resolved,
            ReviewStatus::Dismissed,
        ] {
            let parsed = ReviewStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn review_status_invalid() {
        assert!(ReviewStatus::parse("escalated").is_err());
    }
}
