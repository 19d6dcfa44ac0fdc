//! Storage engine: the row-level protocol over the SQL store.
//!
//! Owns the ten logical statements that make up the row-level protocol and
//! the schema bootstrap. Grounded in `database/migrations.rs` for the
//! create-if-missing schema pattern and `database/connection_pool.rs` for
//! the query/fetch/execute wrapping style.

use crate::config::{CacheSettings, MAX_PARENT_KEYS};
use crate::error::{KvError, Result};
use crate::model::{fingerprint, truncate, DbCacheItem, ReadMode};
use crate::pool::ConnectionPool;
use sqlx::Row;

const TABLE: &str = "cache_item";

/// The storage engine: every method is one logical statement (or, for
/// `get`, a small fixed sequence of them) against the underlying table.
pub struct StorageEngine {
    pool: ConnectionPool,
}

impl StorageEngine {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Verify the schema exists with the expected shape; create it (table +
    /// indexes + foreign keys) if not.
    pub async fn bootstrap(&self) -> Result<()> {
        let columns: Vec<String> = sqlx::query(&format!("PRAGMA table_info({TABLE})"))
            .fetch_all(self.pool.inner())
            .await?
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        let expected = expected_columns();
        let has_schema = expected.iter().all(|c| columns.iter().any(|x| x == c));

        if !has_schema {
            self.create_schema().await?;
        }
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        let mut parent_cols = String::new();
        let mut parent_checks = String::new();
        for i in 0..MAX_PARENT_KEYS {
            parent_cols.push_str(&format!(
                ", parent_key_{i} TEXT, parent_hash_{i} INTEGER REFERENCES {TABLE}(hash) ON DELETE CASCADE"
            ));
            parent_checks.push_str(&format!(
                ", CHECK (parent_hash_{i} IS NULL OR parent_hash_{i} != hash)"
            ));
        }

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                hash INTEGER PRIMARY KEY,
                partition TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                compressed INTEGER NOT NULL,
                utc_creation INTEGER NOT NULL,
                utc_expiry INTEGER NOT NULL,
                interval INTEGER NOT NULL
                {parent_cols}
                , UNIQUE(partition, key)
                {parent_checks}
            )"
        );
        sqlx::query(&create_table).execute(self.pool.inner()).await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{TABLE}_expiry ON {TABLE}(utc_expiry)"
        ))
        .execute(self.pool.inner())
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{TABLE}_partition_expiry ON {TABLE}(partition, utc_expiry)"
        ))
        .execute(self.pool.inner())
        .await?;

        Ok(())
    }

    /// `upsert` — insert or overwrite by `hash`, within a transaction.
    pub async fn upsert(&self, item: &DbCacheItem) -> Result<()> {
        let mut tx = self.pool.inner().begin().await?;

        let mut cols: Vec<String> = vec![
            "hash", "partition", "key", "value", "compressed", "utc_creation", "utc_expiry",
            "interval",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        for i in 0..MAX_PARENT_KEYS {
            cols.push(format!("parent_key_{i}"));
            cols.push(format!("parent_hash_{i}"));
        }
        let placeholders = vec!["?"; cols.len()].join(", ");

        let update_clause: Vec<String> = cols
            .iter()
            .filter(|c| c.as_str() != "hash")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();

        let sql = format!(
            "INSERT INTO {TABLE} ({}) VALUES ({}) ON CONFLICT(hash) DO UPDATE SET {}",
            cols.join(", "),
            placeholders,
            update_clause.join(", ")
        );

        let mut q = sqlx::query(&sql)
            .bind(item.hash)
            .bind(&item.partition)
            .bind(&item.key)
            .bind(&item.value)
            .bind(item.compressed)
            .bind(item.utc_creation)
            .bind(item.utc_expiry)
            .bind(item.interval);

        for i in 0..MAX_PARENT_KEYS {
            match item.parent_keys.get(i) {
                Some(pk) => {
                    let hash = fingerprint(&item.partition, pk);
                    q = q.bind(Some(pk.clone())).bind(Some(hash));
                }
                None => {
                    q = q.bind(None::<String>).bind(None::<i64>);
                }
            }
        }

        q.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// `contains` — 1 if a row exists with `utc_expiry >= utc_now`.
    pub async fn contains(&self, hash: i64, now: i64) -> Result<bool> {
        let row = sqlx::query(&format!(
            "SELECT 1 FROM {TABLE} WHERE hash = ? AND utc_expiry >= ?"
        ))
        .bind(hash)
        .bind(now)
        .fetch_optional(self.pool.inner())
        .await?;
        Ok(row.is_some())
    }

    /// `count` — row count respecting the partition and expiry filters.
    pub async fn count(&self, partition: Option<&str>, mode: ReadMode, now: i64) -> Result<i64> {
        let where_clause = scope_clause(partition, mode);
        let sql = format!("SELECT COUNT(*) as n FROM {TABLE} {where_clause}");
        let mut q = sqlx::query(&sql);
        if let Some(p) = partition {
            q = q.bind(p);
        }
        if !mode.ignore_expiry() {
            q = q.bind(now);
        }
        let row = q.fetch_one(self.pool.inner()).await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// `peek_value` — `(value, compressed, utc_expiry, interval)` for one row.
    pub async fn peek_value(
        &self,
        hash: i64,
        mode: ReadMode,
        now: i64,
    ) -> Result<Option<(Vec<u8>, bool, i64, i64)>> {
        let sql = format!(
            "SELECT value, compressed, utc_expiry, interval FROM {TABLE} WHERE hash = ?{}",
            expiry_filter(mode)
        );
        let mut q = sqlx::query(&sql).bind(hash);
        if !mode.ignore_expiry() {
            q = q.bind(now);
        }
        let row = q.fetch_optional(self.pool.inner()).await?;
        Ok(row.map(|r| {
            (
                r.get::<Vec<u8>, _>("value"),
                r.get::<bool, _>("compressed"),
                r.get::<i64, _>("utc_expiry"),
                r.get::<i64, _>("interval"),
            )
        }))
    }

    /// `peek_item` — the full row for one hash.
    pub async fn peek_item(
        &self,
        hash: i64,
        mode: ReadMode,
        now: i64,
    ) -> Result<Option<DbCacheItem>> {
        let sql = format!("SELECT * FROM {TABLE} WHERE hash = ?{}", expiry_filter(mode));
        let mut q = sqlx::query(&sql).bind(hash);
        if !mode.ignore_expiry() {
            q = q.bind(now);
        }
        let row = q.fetch_optional(self.pool.inner()).await?;
        Ok(row.map(row_to_item))
    }

    /// `peek_items` — rows matching the partition/expiry filters.
    pub async fn peek_items(
        &self,
        partition: Option<&str>,
        mode: ReadMode,
        now: i64,
    ) -> Result<Vec<DbCacheItem>> {
        let where_clause = scope_clause(partition, mode);
        let sql = format!("SELECT * FROM {TABLE} {where_clause}");
        let mut q = sqlx::query(&sql);
        if let Some(p) = partition {
            q = q.bind(p);
        }
        if !mode.ignore_expiry() {
            q = q.bind(now);
        }
        let rows = q.fetch_all(self.pool.inner()).await?;
        Ok(rows.into_iter().map(row_to_item).collect())
    }

    /// `update_expiry` — used by the sliding/static refresh path in `get`.
    pub async fn update_expiry(&self, hash: i64, utc_expiry: i64) -> Result<()> {
        sqlx::query(&format!("UPDATE {TABLE} SET utc_expiry = ? WHERE hash = ?"))
            .bind(utc_expiry)
            .bind(hash)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// `delete_one` — removes one row; cascades to dependents via the FK.
    pub async fn delete_one(&self, hash: i64) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {TABLE} WHERE hash = ?"))
            .bind(hash)
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected())
    }

    /// `delete_many` — removes matching rows; cascades to dependents.
    pub async fn delete_many(&self, partition: Option<&str>, mode: ReadMode, now: i64) -> Result<u64> {
        let where_clause = scope_clause(partition, mode);
        let sql = format!("DELETE FROM {TABLE} {where_clause}");
        let mut q = sqlx::query(&sql);
        if let Some(p) = partition {
            q = q.bind(p);
        }
        if !mode.ignore_expiry() {
            q = q.bind(now);
        }
        let result = q.execute(self.pool.inner()).await?;
        Ok(result.rows_affected())
    }

    /// `incremental_vacuum` — reclaims free pages without exclusive access.
    pub async fn incremental_vacuum(&self) -> Result<()> {
        sqlx::query("PRAGMA incremental_vacuum")
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Full `VACUUM`, outside any transaction.
    pub async fn full_vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(self.pool.inner()).await?;
        Ok(())
    }

    /// Approximate on-disk size in KiB, via `page_count * page_size`.
    pub async fn cache_size_in_kb(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query("PRAGMA page_count")
            .fetch_one(self.pool.inner())
            .await?
            .get(0);
        let page_size: i64 = sqlx::query("PRAGMA page_size")
            .fetch_one(self.pool.inner())
            .await?
            .get(0);
        Ok((page_count * page_size) / 1024)
    }

    /// Get protocol (sliding refresh): lookup, lazy-delete if stale, bump
    /// expiry if refreshing, return raw bytes for the codec to decode
    /// outside this function's scope.
    pub async fn get_value(&self, hash: i64, now: i64) -> Result<Option<(Vec<u8>, bool)>> {
        let Some((value, compressed, utc_expiry, interval)) =
            self.peek_value(hash, ReadMode::IgnoreExpiryDate, now).await?
        else {
            return Ok(None);
        };

        if utc_expiry < now {
            self.delete_one(hash).await?;
            return Ok(None);
        }

        if interval > 0 {
            self.update_expiry(hash, now + interval).await?;
        }

        Ok(Some((value, compressed)))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

fn expected_columns() -> Vec<&'static str> {
    vec![
        "partition",
        "key",
        "value",
        "utc_creation",
        "utc_expiry",
        "interval",
        "parent_key_0",
        "parent_hash_0",
    ]
}

fn expiry_filter(mode: ReadMode) -> &'static str {
    if mode.ignore_expiry() {
        ""
    } else {
        " AND utc_expiry >= ?"
    }
}

fn scope_clause(partition: Option<&str>, mode: ReadMode) -> String {
    let mut clauses = Vec::new();
    if partition.is_some() {
        clauses.push("partition = ?".to_string());
    }
    if !mode.ignore_expiry() {
        clauses.push("utc_expiry >= ?".to_string());
    }
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> DbCacheItem {
    let mut parent_keys = Vec::new();
    for i in 0..MAX_PARENT_KEYS {
        if let Ok(Some(pk)) = row.try_get::<Option<String>, _>(format!("parent_key_{i}").as_str()) {
            parent_keys.push(pk);
        }
    }
    DbCacheItem {
        hash: row.get("hash"),
        partition: row.get("partition"),
        key: row.get("key"),
        value: row.get("value"),
        compressed: row.get("compressed"),
        utc_creation: row.get("utc_creation"),
        utc_expiry: row.get("utc_expiry"),
        interval: row.get("interval"),
        parent_keys,
    }
}

/// Build the persisted row for an add operation, truncating partition/key
/// before both hashing and persisting so the two stay in agreement.
pub fn build_item(
    partition: &str,
    key: &str,
    value: Vec<u8>,
    compressed: bool,
    utc_creation: i64,
    utc_expiry: i64,
    interval: i64,
    parent_keys: Vec<String>,
    settings: &CacheSettings,
) -> Result<DbCacheItem> {
    let partition = truncate(partition, settings.max_partition_name_length);
    let key = truncate(key, settings.max_key_name_length);
    if partition.is_empty() {
        return Err(KvError::InvalidArgument("partition must not be empty".to_string()));
    }
    if key.is_empty() {
        return Err(KvError::InvalidArgument("key must not be empty".to_string()));
    }
    let hash = fingerprint(&partition, &key);
    Ok(DbCacheItem {
        hash,
        partition,
        key,
        value,
        compressed,
        utc_creation,
        utc_expiry,
        interval,
        parent_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ConnectionPool;

    async fn engine() -> StorageEngine {
        let settings = CacheSettings::default();
        let pool = ConnectionPool::open(&settings).await.unwrap();
        let engine = StorageEngine::new(pool);
        engine.bootstrap().await.unwrap();
        engine
    }

    fn item(partition: &str, key: &str, now: i64, expiry: i64, interval: i64) -> DbCacheItem {
        build_item(
            partition,
            key,
            b"value".to_vec(),
            false,
            now,
            expiry,
            interval,
            Vec::new(),
            &CacheSettings::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn bootstrap_creates_schema_idempotently() {
        let e = engine().await;
        e.bootstrap().await.unwrap();
        assert_eq!(e.count(None, ReadMode::IgnoreExpiryDate, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_then_contains() {
        let e = engine().await;
        let row = item("p", "k", 0, 100, 0);
        e.upsert(&row).await.unwrap();
        assert!(e.contains(row.hash, 0).await.unwrap());
        assert!(!e.contains(row.hash, 200).await.unwrap());
    }

    #[tokio::test]
    async fn upsert_is_an_overwrite_by_hash() {
        let e = engine().await;
        let mut row = item("p", "k", 0, 100, 0);
        e.upsert(&row).await.unwrap();
        row.value = b"new-value".to_vec();
        e.upsert(&row).await.unwrap();

        let peeked = e
            .peek_value(row.hash, ReadMode::IgnoreExpiryDate, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peeked.0, b"new-value");
        assert_eq!(e.count(None, ReadMode::IgnoreExpiryDate, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_value_lazily_deletes_expired_rows() {
        let e = engine().await;
        let row = item("p", "k", 0, 10, 0);
        e.upsert(&row).await.unwrap();

        assert!(e.get_value(row.hash, 20).await.unwrap().is_none());
        assert_eq!(e.count(None, ReadMode::IgnoreExpiryDate, 20).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_value_bumps_expiry_for_refreshing_items() {
        let e = engine().await;
        let row = item("p", "k", 0, 10, 10);
        e.upsert(&row).await.unwrap();

        e.get_value(row.hash, 5).await.unwrap();
        let refreshed = e.peek_item(row.hash, ReadMode::IgnoreExpiryDate, 5).await.unwrap().unwrap();
        assert_eq!(refreshed.utc_expiry, 15);
    }

    #[tokio::test]
    async fn parent_removal_cascades_to_children() {
        let e = engine().await;
        let parent = item("p", "parent", 0, 1000, 0);
        e.upsert(&parent).await.unwrap();

        let mut child = item("p", "child", 0, 1000, 0);
        child.parent_keys = vec!["parent".to_string()];
        e.upsert(&child).await.unwrap();

        assert!(e.contains(child.hash, 0).await.unwrap());
        e.delete_one(parent.hash).await.unwrap();
        assert!(!e.contains(child.hash, 0).await.unwrap());
    }

    #[tokio::test]
    async fn delete_many_scoped_to_partition() {
        let e = engine().await;
        e.upsert(&item("p1", "a", 0, 1000, 0)).await.unwrap();
        e.upsert(&item("p2", "b", 0, 1000, 0)).await.unwrap();

        let removed = e
            .delete_many(Some("p1"), ReadMode::IgnoreExpiryDate, 0)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(e.count(Some("p2"), ReadMode::IgnoreExpiryDate, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn vacuum_pragmas_do_not_error_on_empty_store() {
        let e = engine().await;
        e.incremental_vacuum().await.unwrap();
        e.full_vacuum().await.unwrap();
        assert!(e.cache_size_in_kb().await.unwrap() >= 0);
    }
}
