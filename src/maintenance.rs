//! Maintenance & eviction controller: bootstrap, probabilistic automatic
//! soft-clean, explicit clears, and vacuum.
//!
//! Grounded in `database/migrations.rs`'s `MigrationManager` (bootstrap
//! runs once, up front, and is idempotent) and `database/cache.rs`'s
//! background eviction task (fire-and-forget, logged-not-propagated
//! failures). The probabilistic trigger itself has no direct analogue in
//! either source — it replaces a shared insertion counter because it
//! needs no shared mutable state across callers.

use crate::engine::StorageEngine;
use crate::log::{Level, Log};
use crate::model::ReadMode;
use rand::Rng;
use std::sync::Arc;

/// Runs bootstrap, clears, and vacuum against a shared [`StorageEngine`].
pub struct Maintenance {
    engine: Arc<StorageEngine>,
    log: Arc<dyn Log>,
}

impl Maintenance {
    pub fn new(engine: Arc<StorageEngine>, log: Arc<dyn Log>) -> Self {
        Self { engine, log }
    }

    /// Bring the schema up to date, then run one soft clear to drop any
    /// rows that expired while the cache was unopened.
    pub async fn bootstrap(&self, now: i64) -> crate::error::Result<()> {
        self.engine.bootstrap().await?;
        self.soft_clear(now).await?;
        Ok(())
    }

    /// Remove only rows past expiry, in the given (or every) partition.
    pub async fn soft_clear(&self, now: i64) -> crate::error::Result<i64> {
        let removed = self
            .engine
            .delete_many(None, ReadMode::ConsiderExpiryDate, now)
            .await?;
        Ok(removed as i64)
    }

    /// Remove every row in scope, expired or not.
    pub async fn hard_clear(&self, partition: Option<&str>, now: i64) -> crate::error::Result<i64> {
        let removed = self
            .engine
            .delete_many(partition, ReadMode::IgnoreExpiryDate, now)
            .await?;
        Ok(removed as i64)
    }

    /// Remove only expired rows in the given (or every) partition.
    pub async fn soft_clear_scoped(
        &self,
        partition: Option<&str>,
        now: i64,
    ) -> crate::error::Result<i64> {
        let removed = self
            .engine
            .delete_many(partition, ReadMode::ConsiderExpiryDate, now)
            .await?;
        Ok(removed as i64)
    }

    /// Soft clear, then incremental vacuum, then a full `VACUUM` outside
    /// any transaction.
    pub async fn vacuum(&self, now: i64) -> crate::error::Result<()> {
        self.soft_clear(now).await?;
        self.engine.incremental_vacuum().await?;
        self.engine.full_vacuum().await?;
        Ok(())
    }

    /// Roll the dice; if they land below `chances_of_auto_cleanup`, run a
    /// soft clear. Called after every successful add. Failures here are
    /// logged and swallowed — a cleanup miss must never fail the write
    /// that triggered it.
    pub async fn maybe_auto_clean(&self, now: i64, chances_of_auto_cleanup: f64) {
        let roll: f64 = rand::thread_rng().gen();
        if roll >= chances_of_auto_cleanup {
            return;
        }
        if let Err(e) = self.soft_clear(now).await {
            self.log
                .log(Level::Warn, &format!("automatic soft clean failed: {e}"));
        }
    }
}
