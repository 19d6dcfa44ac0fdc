//! Connection pool: a bounded `sqlx` SQLite pool configured with the
//! pragmas the cache semantics require.
//!
//! Grounded in `database/connection_pool.rs`'s `ConnectionPool::new`
//! pragma sequence, extended with the foreign-key/recursive-trigger and
//! page-count pragmas the cascade and size-cap requirements add on top
//! of the original performance-only pragma set.

use crate::config::CacheSettings;
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// A bounded pool of configured, schema-ready SQLite connections.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: SqlitePool,
}

impl ConnectionPool {
    /// Open (or create) the database at `settings.cache_uri` and configure
    /// every pooled connection identically.
    pub async fn open(settings: &CacheSettings) -> Result<Self> {
        let connect_options = if settings.cache_uri.contains(":memory:") {
            SqliteConnectOptions::from_str(&settings.cache_uri)?
        } else {
            SqliteConnectOptions::from_str(&settings.cache_uri)?.create_if_missing(true)
        };

        let connect_options = connect_options
            .busy_timeout(settings.command_timeout)
            .pragma("journal_mode", journal_mode(settings))
            .pragma("foreign_keys", "ON")
            .pragma("recursive_triggers", "ON")
            .pragma("synchronous", "OFF")
            .pragma("temp_store", "MEMORY")
            .pragma("page_size", settings.page_size.to_string())
            .pragma("max_page_count", settings.max_page_count().to_string());

        // `sqlite::memory:` hands each new connection an independent,
        // unshared database — pooling more than one would silently
        // fragment the cache across connections. Single-connection is the
        // only size that keeps in-memory semantics coherent.
        let (min_connections, max_connections) = if settings.cache_uri.contains(":memory:") {
            (1, 1)
        } else {
            (settings.min_connections, settings.max_connections)
        };

        let pool = SqlitePoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    /// Access the underlying `sqlx` pool. The storage engine is the only
    /// consumer of this; callers never see it.
    pub(crate) fn inner(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn journal_mode(settings: &CacheSettings) -> &'static str {
    if settings.cache_uri.contains(":memory:") {
        "MEMORY"
    } else {
        "WAL"
    }
}
