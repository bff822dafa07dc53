//! Sweeper lease on `PostgreSQL`.
//!
//! Acquisition is a single upsert that only overwrites a row whose lease has expired
//! or that the caller already holds. The `token` grows on every acquisition, so a
//! holder that stalled past its lease cannot renew over a newer holder.
//! Expiry uses the database clock, which every instance shares.

use futures::future::BoxFuture;
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::time::Duration;
use stockhold_core::{LeaseGrant, Result, SweepLease};

use crate::store::database_error;

fn row_to_grant(row: &PgRow) -> Result<LeaseGrant> {
    let decode = |e: sqlx::Error| database_error("Failed to decode lease", &e);
    Ok(LeaseGrant {
        name: row.try_get("name").map_err(decode)?,
        holder: row.try_get("holder").map_err(decode)?,
        token: row.try_get("token").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
    })
}

/// `PostgreSQL` [`SweepLease`] backed by the `sweeper_leases` table.
#[derive(Clone, Debug)]
pub struct PostgresSweepLease {
    pool: PgPool,
}

impl PostgresSweepLease {
    /// Create a lease store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SweepLease for PostgresSweepLease {
    fn try_acquire<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseGrant>>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO sweeper_leases (name, holder, token, expires_at)
                VALUES ($1, $2, 1, NOW() + make_interval(secs => $3))
                ON CONFLICT (name) DO UPDATE
                SET holder = EXCLUDED.holder,
                    token = sweeper_leases.token + 1,
                    expires_at = EXCLUDED.expires_at
                WHERE sweeper_leases.expires_at <= NOW()
                   OR sweeper_leases.holder = EXCLUDED.holder
                RETURNING name, holder, token, expires_at
                ",
            )
            .bind(name)
            .bind(holder)
            .bind(duration.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to acquire lease", &e))?;

            let grant = row.as_ref().map(row_to_grant).transpose()?;
            if let Some(grant) = &grant {
                tracing::debug!(lease = name, holder, token = grant.token, "Lease acquired");
            }
            Ok(grant)
        })
    }

    fn renew<'a>(
        &'a self,
        grant: &'a LeaseGrant,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseGrant>>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                UPDATE sweeper_leases
                SET expires_at = NOW() + make_interval(secs => $4)
                WHERE name = $1 AND holder = $2 AND token = $3 AND expires_at > NOW()
                RETURNING name, holder, token, expires_at
                ",
            )
            .bind(&grant.name)
            .bind(&grant.holder)
            .bind(grant.token)
            .bind(duration.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to renew lease", &e))?;

            row.as_ref().map(row_to_grant).transpose()
        })
    }

    fn release<'a>(&'a self, grant: &'a LeaseGrant) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                r"
                UPDATE sweeper_leases
                SET expires_at = to_timestamp(0)
                WHERE name = $1 AND holder = $2 AND token = $3
                ",
            )
            .bind(&grant.name)
            .bind(&grant.holder)
            .bind(grant.token)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("Failed to release lease", &e))?;
            Ok(())
        })
    }
}
