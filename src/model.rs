//! The cache's data model: identity, lifetime classes, and the persisted
//! row shape.

use crate::config::MAX_PARENT_KEYS;
use crate::error::{KvError, Result};

/// Fingerprint a truncated partition+key pair into the 64-bit row identity.
///
/// `(hash32(partition) << 32) | hash32(key)`. The 32-bit halves are FNV-1a;
/// the collision risk this accepts at scale is made safe by the
/// primary-key-on-hash constraint (a collision surfaces as a write error,
/// not silent corruption).
pub fn fingerprint(partition: &str, key: &str) -> i64 {
    let hi = hash32(partition) as u64;
    let lo = hash32(key) as u64;
    ((hi << 32) | lo) as i64
}

fn hash32(s: &str) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut h = OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u32;
        h = h.wrapping_mul(PRIME);
    }
    h
}

/// Truncate a string to at most `max_len` characters (not bytes). Applied
/// identically before both hashing and persisting a name.
pub fn truncate(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}

/// A single parent-key reference: `(partition, key)` within the same
/// partition as the dependent item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentKey(pub String);

/// Collection of parent keys attached to an add operation, capped at
/// [`MAX_PARENT_KEYS`].
#[derive(Debug, Clone, Default)]
pub struct ParentKeys(Vec<ParentKey>);

impl ParentKeys {
    /// Validate and wrap a caller-supplied parent key list.
    pub fn new(keys: Vec<String>) -> Result<Self> {
        if keys.len() > MAX_PARENT_KEYS {
            return Err(KvError::InvalidArgument(format!(
                "at most {MAX_PARENT_KEYS} parent keys are allowed, got {}",
                keys.len()
            )));
        }
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            if k.is_empty() {
                return Err(KvError::InvalidArgument(
                    "parent key must not be empty".to_string(),
                ));
            }
            out.push(ParentKey(k));
        }
        Ok(Self(out))
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_slice(&self) -> &[ParentKey] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lifetime class at the façade boundary. Lowered to `(utc_expiry, interval)`
/// at the storage-engine boundary, so the persisted row never has to
/// conflate `interval == null` with "timed".
#[derive(Debug, Clone, Copy)]
pub enum Lifetime {
    /// Fixed absolute expiry; reads never extend it.
    Timed {
        /// Absolute expiry, seconds since epoch.
        utc_expiry: i64,
    },
    /// Expiry pushed forward by `interval` seconds on every successful read.
    Sliding {
        /// Refresh interval, in seconds. Must be `> 0`.
        interval: i64,
    },
    /// A sliding item whose interval is `settings.static_interval_in_days`.
    Static,
}

impl Lifetime {
    /// Lower this lifetime into the `(utc_expiry, interval)` pair the
    /// storage engine persists, given the current time and the configured
    /// static interval.
    pub fn lower(self, now: i64, static_interval_secs: i64) -> Result<(i64, i64)> {
        match self {
            Lifetime::Timed { utc_expiry } => {
                if utc_expiry < now {
                    return Err(KvError::InvalidArgument(
                        "utc_expiry must not be before the current time".to_string(),
                    ));
                }
                Ok((utc_expiry, 0))
            }
            Lifetime::Sliding { interval } => {
                if interval <= 0 {
                    return Err(KvError::InvalidArgument(
                        "sliding interval must be greater than zero".to_string(),
                    ));
                }
                Ok((now + interval, interval))
            }
            Lifetime::Static => Ok((now + static_interval_secs, static_interval_secs)),
        }
    }
}

/// Read-mode for `count`/`clear`: whether expired-but-present rows count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Only rows with `utc_expiry >= now` are considered.
    ConsiderExpiryDate,
    /// All rows in scope are considered, regardless of expiry.
    IgnoreExpiryDate,
}

impl ReadMode {
    pub fn ignore_expiry(self) -> bool {
        matches!(self, ReadMode::IgnoreExpiryDate)
    }
}

/// The raw, persisted row shape — a decoded `value` is only materialized on
/// a successful read. A single layered representation, rather than a
/// separate public/private `CacheItem`/`DbCacheItem` split.
#[derive(Debug, Clone)]
pub struct DbCacheItem {
    pub hash: i64,
    pub partition: String,
    pub key: String,
    pub value: Vec<u8>,
    pub compressed: bool,
    pub utc_creation: i64,
    pub utc_expiry: i64,
    pub interval: i64,
    pub parent_keys: Vec<String>,
}

/// A fully decoded cache entry, returned by `get_item`/`peek_item`.
#[derive(Debug, Clone)]
pub struct CacheItem<T> {
    pub partition: String,
    pub key: String,
    pub value: T,
    pub utc_creation: i64,
    pub utc_expiry: i64,
    pub interval: i64,
    pub parent_keys: Vec<String>,
}

impl<T> CacheItem<T> {
    /// `true` for sliding/static items (`interval > 0`).
    pub fn is_refreshing(&self) -> bool {
        self.interval > 0
    }
}

/// Non-empty, length-bounded validation shared by every partition/key input.
pub fn validate_name(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        return Err(KvError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(())
}
