//! Cache configuration.
//!
//! Collects every externally tunable knob in one settings struct, plus
//! the pool-sizing knobs the connection pool needs (grounded in
//! `database::connection_pool::DatabaseConfig`).

use std::time::Duration;

/// Maximum number of parent keys an item may declare. Fixed by schema.
pub const MAX_PARENT_KEYS: usize = 5;

/// Tunable settings for a [`crate::facade::Cache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Partition used when the caller omits one.
    pub default_partition: String,

    /// Lifetime, in days, of "static" items.
    pub static_interval_in_days: u32,

    /// Hard upper bound on on-disk size; backs `max_page_count`.
    pub max_cache_size_mb: u32,

    /// Caps journal growth; informs the auto-checkpoint page count.
    pub max_journal_size_mb: u32,

    /// Probability (0.0..=1.0) that a successful add triggers a soft clean.
    pub chances_of_auto_cleanup: f64,

    /// Byte threshold above which values are compressed.
    pub min_value_length_for_compression: usize,

    /// Truncation length for partition names, applied before hashing.
    pub max_partition_name_length: usize,

    /// Truncation length for key names, applied before hashing.
    pub max_key_name_length: usize,

    /// Data-source locator: a `sqlite:` URI (e.g. `sqlite:///path/to/file.db`),
    /// or `sqlite::memory:` for an ephemeral in-memory store.
    pub cache_uri: String,

    /// Minimum number of pooled connections.
    pub min_connections: u32,

    /// Maximum number of pooled connections.
    pub max_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,

    /// SQLite page size in bytes.
    pub page_size: u32,

    /// Command timeout enforced per connection.
    pub command_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_partition: "default".to_string(),
            static_interval_in_days: 30,
            max_cache_size_mb: 512,
            max_journal_size_mb: 64,
            chances_of_auto_cleanup: 0.01,
            min_value_length_for_compression: 4 * 1024,
            max_partition_name_length: 255,
            max_key_name_length: 255,
            cache_uri: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
            page_size: 4096,
            command_timeout: Duration::from_secs(180),
        }
    }
}

impl CacheSettings {
    /// `max_cache_size_mb` expressed in SQLite pages, for `PRAGMA max_page_count`.
    pub fn max_page_count(&self) -> i64 {
        let bytes = self.max_cache_size_mb as i64 * 1024 * 1024;
        bytes / self.page_size as i64
    }

    /// Static lifetime expressed in seconds.
    pub fn static_interval_secs(&self) -> i64 {
        self.static_interval_in_days as i64 * 86_400
    }

    /// Whether `cache_uri` differs in a way that requires rebuilding the pool.
    pub fn data_source_changed(&self, other: &CacheSettings) -> bool {
        self.cache_uri != other.cache_uri
    }
}
