//! The derived tag index: tables, reconciliation and rebuild.

pub mod bulk;
pub mod incremental;
pub mod list;
pub mod site_cache;
pub mod tables;

pub use bulk::BulkRegenerator;
pub use incremental::{IncrementalIndexer, ReconcilePlan};
pub use site_cache::CategorySiteTagCache;

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};

/// Application-wide advisory lock key guarding the index tables.
const INDEX_LOCK_KEY: i64 = 0x6d65_7263_6174_6167;

/// Guard serializing bulk regeneration against incremental writers.
///
/// The lock is a transaction-scoped Postgres advisory lock: the bulk
/// regenerator takes it exclusively for a whole run, each incremental
/// reconciliation takes it shared. Dropping the guard rolls the carrier
/// transaction back, which releases the lock even on early error paths.
pub struct IndexLock {
    tx: Transaction<'static, Postgres>,
}

impl IndexLock {
    /// Acquire the lock exclusively, blocking until granted.
    pub async fn exclusive(pool: &PgPool) -> Result<Self> {
        let mut tx = pool.begin().await.context("failed to start lock transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(INDEX_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .context("failed to acquire exclusive index lock")?;

        Ok(Self { tx })
    }

    /// Acquire the lock shared, blocking until granted.
    pub async fn shared(pool: &PgPool) -> Result<Self> {
        let mut tx = pool.begin().await.context("failed to start lock transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock_shared($1)")
            .bind(INDEX_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .context("failed to acquire shared index lock")?;

        Ok(Self { tx })
    }

    /// Release the lock.
    pub async fn release(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to release index lock")?;

        Ok(())
    }
}

impl std::fmt::Debug for IndexLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexLock").finish()
    }
}
