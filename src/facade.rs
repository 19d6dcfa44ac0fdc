//! Entry façade: the public, synchronous surface over the async engine.
//!
//! Grounded in `enterprise/mod.rs`'s `EnterpriseError`/`EnterpriseResult`
//! envelope pattern and `database/cache.rs`'s `CacheManager` (the
//! validate-then-delegate method shape). The façade itself is blocking —
//! every public method takes and releases a thread, matching the
//! "parallel threads" scheduling model — and owns a Tokio runtime purely
//! as an internal bridge to the `sqlx` engine underneath it; that runtime
//! never appears in the public surface.

use crate::clock::{Clock, SystemClock};
use crate::codec::{BincodeSerializer, CodecPipeline, Lz4Compressor};
use crate::config::CacheSettings;
use crate::engine::{build_item, StorageEngine};
use crate::error::{KvError, Result};
use crate::log::{GlobalLog, Level, Log};
use crate::maintenance::Maintenance;
use crate::model::{validate_name, CacheItem, DbCacheItem, Lifetime, ParentKeys, ReadMode};
use crate::pool::ConnectionPool;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

/// An embedded, persistent key/value cache. Cheap to clone — every clone
/// shares the same pool, runtime, and diagnostic state.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: RuntimeRef,
    clock: Arc<dyn Clock>,
    log: Arc<dyn Log>,
    codec: RwLock<CodecPipeline>,
    settings: RwLock<CacheSettings>,
    engine: RwLock<Arc<StorageEngine>>,
    maintenance: RwLock<Arc<Maintenance>>,
    last_error: Mutex<Option<String>>,
    disposed: AtomicBool,
}

/// Either a runtime the cache owns outright, or a handle into a runtime
/// the embedding application already runs. Either way, callers never see
/// an `async fn` — this is purely the bridge to `sqlx`.
enum RuntimeRef {
    Owned(Runtime),
    Handle(Handle),
}

impl RuntimeRef {
    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match self {
            RuntimeRef::Owned(rt) => rt.block_on(fut),
            RuntimeRef::Handle(h) => h.block_on(fut),
        }
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            RuntimeRef::Owned(rt) => {
                rt.spawn(fut);
            }
            RuntimeRef::Handle(h) => {
                h.spawn(fut);
            }
        }
    }
}

impl Cache {
    /// Open a cache at `settings.cache_uri`, using the real system clock
    /// and the global `log` facade.
    pub fn open(settings: CacheSettings) -> Result<Self> {
        Self::open_with(settings, Arc::new(SystemClock), Arc::new(GlobalLog))
    }

    /// Open a cache with an injected clock and log sink — the seam tests
    /// use to drive expiry/refresh deterministically.
    pub fn open_with(
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
        log: Arc<dyn Log>,
    ) -> Result<Self> {
        let runtime = Runtime::new()
            .map_err(|e| KvError::InternalStoreError(format!("failed to start runtime: {e}")))?;
        Self::build(RuntimeRef::Owned(runtime), settings, clock, log)
    }

    /// Open a cache that drives its storage engine through an existing
    /// Tokio runtime's [`Handle`] instead of owning one, for embedding
    /// inside an application that already runs Tokio. Still a fully
    /// synchronous, blocking surface to its callers — `Handle::block_on`
    /// requires the calling thread not already be a runtime worker.
    pub fn from_handle(
        handle: Handle,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
        log: Arc<dyn Log>,
    ) -> Result<Self> {
        Self::build(RuntimeRef::Handle(handle), settings, clock, log)
    }

    fn build(
        runtime: RuntimeRef,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
        log: Arc<dyn Log>,
    ) -> Result<Self> {
        let now = clock.now_utc();
        let (engine, maintenance) = runtime.block_on(open_engine(&settings, &log, now))?;
        let codec = build_codec(&settings);

        Ok(Self {
            inner: Arc::new(Inner {
                runtime,
                clock,
                log,
                codec: RwLock::new(codec),
                settings: RwLock::new(settings),
                engine: RwLock::new(Arc::new(engine)),
                maintenance: RwLock::new(Arc::new(maintenance)),
                last_error: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> CacheSettings {
        self.inner.settings.read().clone()
    }

    /// Apply new settings, rebuilding the connection pool if `cache_uri`
    /// changed.
    pub fn update_settings(&self, new_settings: CacheSettings) -> Result<()> {
        self.check_disposed()?;
        let (data_source_changed, compression_threshold_changed) = {
            let current = self.inner.settings.read();
            (
                current.data_source_changed(&new_settings),
                current.min_value_length_for_compression
                    != new_settings.min_value_length_for_compression,
            )
        };
        if data_source_changed {
            let now = self.inner.clock.now_utc();
            let (engine, maintenance) = self
                .inner
                .runtime
                .block_on(open_engine(&new_settings, &self.inner.log, now))?;
            *self.inner.engine.write() = Arc::new(engine);
            *self.inner.maintenance.write() = Arc::new(maintenance);
        }
        if compression_threshold_changed {
            *self.inner.codec.write() = build_codec(&new_settings);
        }
        *self.inner.settings.write() = new_settings;
        Ok(())
    }

    /// The last internal error swallowed by the envelope, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Tear the cache down. Every subsequent operation fails with
    /// [`KvError::Disposed`].
    pub fn close(&self) -> Result<()> {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let pool = self.engine().pool().clone();
        self.inner.runtime.block_on(pool.close());
        Ok(())
    }

    // ---- adds --------------------------------------------------------

    pub fn add_sliding<T: Serialize>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        interval_secs: i64,
        parent_keys: Vec<String>,
    ) -> Result<()> {
        self.add(partition, key, value, Lifetime::Sliding { interval: interval_secs }, parent_keys)
    }

    pub fn add_sliding_default<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        interval_secs: i64,
        parent_keys: Vec<String>,
    ) -> Result<()> {
        let partition = self.default_partition();
        self.add_sliding(&partition, key, value, interval_secs, parent_keys)
    }

    pub fn add_static<T: Serialize>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        parent_keys: Vec<String>,
    ) -> Result<()> {
        self.add(partition, key, value, Lifetime::Static, parent_keys)
    }

    pub fn add_static_default<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        parent_keys: Vec<String>,
    ) -> Result<()> {
        let partition = self.default_partition();
        self.add_static(&partition, key, value, parent_keys)
    }

    pub fn add_timed<T: Serialize>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        utc_expiry: i64,
        parent_keys: Vec<String>,
    ) -> Result<()> {
        self.add(partition, key, value, Lifetime::Timed { utc_expiry }, parent_keys)
    }

    pub fn add_timed_default<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        utc_expiry: i64,
        parent_keys: Vec<String>,
    ) -> Result<()> {
        let partition = self.default_partition();
        self.add_timed(&partition, key, value, utc_expiry, parent_keys)
    }

    fn add<T: Serialize>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        lifetime: Lifetime,
        parent_keys: Vec<String>,
    ) -> Result<()> {
        self.check_disposed()?;
        validate_name(partition, "partition")?;
        validate_name(key, "key")?;
        let parent_keys = ParentKeys::new(parent_keys)?;

        let now = self.inner.clock.now_utc();
        let settings = self.settings();
        let (utc_expiry, interval) = lifetime.lower(now, settings.static_interval_secs())?;
        let (bytes, compressed) = self.inner.codec.read().encode(value)?;

        let item = build_item(
            partition,
            key,
            bytes,
            compressed,
            now,
            utc_expiry,
            interval,
            parent_keys.as_slice().iter().map(|k| k.0.clone()).collect(),
            &settings,
        )?;

        let engine = self.engine();
        let result: Result<()> = self.inner.runtime.block_on(engine.upsert(&item));
        self.swallow("add", (), result)?;

        let maintenance = self.inner.maintenance.read().clone();
        let chance = settings.chances_of_auto_cleanup;
        if chance > 0.0 {
            self.inner.runtime.spawn(async move {
                maintenance.maybe_auto_clean(now, chance).await;
            });
        }
        Ok(())
    }

    // ---- reads ---------------------------------------------------------

    pub fn get<T: DeserializeOwned>(&self, partition: &str, key: &str) -> Result<Option<T>> {
        self.check_disposed()?;
        validate_name(partition, "partition")?;
        validate_name(key, "key")?;
        let hash = crate::model::fingerprint(partition, key);
        let now = self.inner.clock.now_utc();
        let engine = self.engine();

        let fetched = self.inner.runtime.block_on(engine.get_value(hash, now));
        let Some((bytes, compressed)) = self.swallow("get", None, fetched)? else {
            return Ok(None);
        };
        Ok(self.decode_or_purge(hash, &bytes, compressed))
    }

    pub fn get_default<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let partition = self.default_partition();
        self.get(&partition, key)
    }

    pub fn peek<T: DeserializeOwned>(&self, partition: &str, key: &str) -> Result<Option<T>> {
        self.check_disposed()?;
        validate_name(partition, "partition")?;
        validate_name(key, "key")?;
        let hash = crate::model::fingerprint(partition, key);
        let now = self.inner.clock.now_utc();
        let engine = self.engine();

        let fetched = self
            .inner
            .runtime
            .block_on(engine.peek_value(hash, ReadMode::ConsiderExpiryDate, now));
        let Some((bytes, compressed, _, _)) = self.swallow("peek", None, fetched)? else {
            return Ok(None);
        };
        Ok(self.decode_or_purge(hash, &bytes, compressed))
    }

    pub fn peek_default<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let partition = self.default_partition();
        self.peek(&partition, key)
    }

    pub fn get_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<CacheItem<T>>> {
        self.check_disposed()?;
        validate_name(partition, "partition")?;
        validate_name(key, "key")?;
        let hash = crate::model::fingerprint(partition, key);
        self.resolve_and_decode(hash, true, true)
    }

    pub fn get_item_default<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheItem<T>>> {
        let partition = self.default_partition();
        self.get_item(&partition, key)
    }

    pub fn peek_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<CacheItem<T>>> {
        self.check_disposed()?;
        validate_name(partition, "partition")?;
        validate_name(key, "key")?;
        let hash = crate::model::fingerprint(partition, key);
        self.resolve_and_decode(hash, false, false)
    }

    pub fn peek_item_default<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheItem<T>>> {
        let partition = self.default_partition();
        self.peek_item(&partition, key)
    }

    pub fn get_items<T: DeserializeOwned>(&self, partition: Option<&str>) -> Result<Vec<CacheItem<T>>> {
        self.check_disposed()?;
        self.collect_items(partition, true)
    }

    pub fn get_items_default<T: DeserializeOwned>(&self) -> Result<Vec<CacheItem<T>>> {
        let partition = self.default_partition();
        self.get_items(Some(&partition))
    }

    pub fn peek_items<T: DeserializeOwned>(&self, partition: Option<&str>) -> Result<Vec<CacheItem<T>>> {
        self.check_disposed()?;
        self.collect_items(partition, false)
    }

    pub fn peek_items_default<T: DeserializeOwned>(&self) -> Result<Vec<CacheItem<T>>> {
        let partition = self.default_partition();
        self.peek_items(Some(&partition))
    }

    // ---- get-or-add ------------------------------------------------------

    pub fn get_or_add_sliding<T, F>(
        &self,
        partition: &str,
        key: &str,
        interval_secs: i64,
        parent_keys: Vec<String>,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(v) = self.get::<T>(partition, key)? {
            return Ok(v);
        }
        let v = producer();
        self.add_sliding(partition, key, &v, interval_secs, parent_keys)?;
        Ok(v)
    }

    pub fn get_or_add_static<T, F>(
        &self,
        partition: &str,
        key: &str,
        parent_keys: Vec<String>,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(v) = self.get::<T>(partition, key)? {
            return Ok(v);
        }
        let v = producer();
        self.add_static(partition, key, &v, parent_keys)?;
        Ok(v)
    }

    pub fn get_or_add_timed<T, F>(
        &self,
        partition: &str,
        key: &str,
        utc_expiry: i64,
        parent_keys: Vec<String>,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(v) = self.get::<T>(partition, key)? {
            return Ok(v);
        }
        let v = producer();
        self.add_timed(partition, key, &v, utc_expiry, parent_keys)?;
        Ok(v)
    }

    // ---- bookkeeping -------------------------------------------------

    pub fn contains(&self, partition: &str, key: &str) -> Result<bool> {
        self.check_disposed()?;
        validate_name(partition, "partition")?;
        validate_name(key, "key")?;
        let hash = crate::model::fingerprint(partition, key);
        let now = self.inner.clock.now_utc();
        let engine = self.engine();
        let result = self.inner.runtime.block_on(engine.contains(hash, now));
        self.swallow("contains", false, result)
    }

    pub fn count(&self, partition: Option<&str>, mode: ReadMode) -> Result<i64> {
        self.check_disposed()?;
        let now = self.inner.clock.now_utc();
        let engine = self.engine();
        let result = self.inner.runtime.block_on(engine.count(partition, mode, now));
        self.swallow("count", 0, result)
    }

    pub fn cache_size_in_kb(&self) -> Result<i64> {
        self.check_disposed()?;
        let engine = self.engine();
        let result = self.inner.runtime.block_on(engine.cache_size_in_kb());
        self.swallow("cache_size_in_kb", 0, result)
    }

    pub fn clear(&self, partition: Option<&str>, mode: ReadMode) -> Result<i64> {
        self.check_disposed()?;
        let now = self.inner.clock.now_utc();
        let maintenance = self.inner.maintenance.read().clone();
        let result = self.inner.runtime.block_on(async move {
            match mode {
                ReadMode::ConsiderExpiryDate => maintenance.soft_clear_scoped(partition, now).await,
                ReadMode::IgnoreExpiryDate => maintenance.hard_clear(partition, now).await,
            }
        });
        self.swallow("clear", 0, result)
    }

    pub fn remove(&self, partition: &str, key: &str) -> Result<()> {
        self.check_disposed()?;
        validate_name(partition, "partition")?;
        validate_name(key, "key")?;
        let hash = crate::model::fingerprint(partition, key);
        let engine = self.engine();
        let result = self.inner.runtime.block_on(engine.delete_one(hash));
        self.swallow("remove", 0u64, result)?;
        Ok(())
    }

    pub fn remove_default(&self, key: &str) -> Result<()> {
        let partition = self.default_partition();
        self.remove(&partition, key)
    }

    pub fn vacuum(&self) -> Result<()> {
        self.check_disposed()?;
        let now = self.inner.clock.now_utc();
        let maintenance = self.inner.maintenance.read().clone();
        let result = self.inner.runtime.block_on(maintenance.vacuum(now));
        self.swallow("vacuum", (), result)
    }

    // ---- internals -----------------------------------------------------

    fn default_partition(&self) -> String {
        self.inner.settings.read().default_partition.clone()
    }

    fn engine(&self) -> Arc<StorageEngine> {
        self.inner.engine.read().clone()
    }

    fn check_disposed(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(KvError::Disposed);
        }
        Ok(())
    }

    /// Swallow-and-log envelope: any
    /// [`KvError::InternalStoreError`] is logged, recorded on `last_error`,
    /// and translated into `fallback`; every other error kind propagates.
    fn swallow<T>(&self, op: &str, fallback: T, result: Result<T>) -> Result<T> {
        match result {
            Ok(v) => Ok(v),
            Err(e) if e.is_internal() => {
                let message = format!("{op}: {e}");
                self.inner.log.log(Level::Error, &message);
                *self.inner.last_error.lock() = Some(message);
                Ok(fallback)
            }
            Err(e) => Err(e),
        }
    }

    /// Decode a raw value; on deserialization failure, delete the
    /// offending row, log at warn level, and return `None` rather than
    /// propagating (invariant: a corrupt row never survives a read).
    fn decode_or_purge<T: DeserializeOwned>(&self, hash: i64, bytes: &[u8], compressed: bool) -> Option<T> {
        match self.inner.codec.read().decode(bytes, compressed) {
            Ok(v) => Some(v),
            Err(e) => {
                self.inner
                    .log
                    .log(Level::Warn, &format!("purging unreadable row {hash}: {e}"));
                let engine = self.engine();
                let _ = self.inner.runtime.block_on(engine.delete_one(hash));
                None
            }
        }
    }

    fn resolve_and_decode<T: DeserializeOwned>(
        &self,
        hash: i64,
        bump: bool,
        lazy_delete: bool,
    ) -> Result<Option<CacheItem<T>>> {
        let now = self.inner.clock.now_utc();
        let engine = self.engine();
        let fetched = self
            .inner
            .runtime
            .block_on(resolve_item(&*engine, hash, now, bump, lazy_delete));
        let Some(row) = self.swallow("get_item", None, fetched)? else {
            return Ok(None);
        };
        Ok(self.decode_row(row))
    }

    fn decode_row<T: DeserializeOwned>(&self, row: DbCacheItem) -> Option<CacheItem<T>> {
        match self.inner.codec.read().decode::<T>(&row.value, row.compressed) {
            Ok(value) => Some(CacheItem {
                partition: row.partition,
                key: row.key,
                value,
                utc_creation: row.utc_creation,
                utc_expiry: row.utc_expiry,
                interval: row.interval,
                parent_keys: row.parent_keys,
            }),
            Err(e) => {
                self.inner
                    .log
                    .log(Level::Warn, &format!("purging unreadable row {}: {e}", row.hash));
                let engine = self.engine();
                let _ = self.inner.runtime.block_on(engine.delete_one(row.hash));
                None
            }
        }
    }

    fn collect_items<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
        bump: bool,
    ) -> Result<Vec<CacheItem<T>>> {
        let now = self.inner.clock.now_utc();
        let engine = self.engine();
        let fetched = self
            .inner
            .runtime
            .block_on(engine.peek_items(partition, ReadMode::ConsiderExpiryDate, now));
        let rows = self.swallow("get_items", Vec::new(), fetched)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if bump && row.interval > 0 {
                let hash = row.hash;
                let new_expiry = now + row.interval;
                let _ = self.inner.runtime.block_on(engine.update_expiry(hash, new_expiry));
            }
            if let Some(item) = self.decode_row(row) {
                out.push(item);
            }
        }
        Ok(out)
    }
}

async fn resolve_item(
    engine: &StorageEngine,
    hash: i64,
    now: i64,
    bump: bool,
    lazy_delete: bool,
) -> Result<Option<DbCacheItem>> {
    let Some(item) = engine.peek_item(hash, ReadMode::IgnoreExpiryDate, now).await? else {
        return Ok(None);
    };
    if item.utc_expiry < now {
        if lazy_delete {
            engine.delete_one(hash).await?;
        }
        return Ok(None);
    }
    if bump && item.interval > 0 {
        engine.update_expiry(hash, now + item.interval).await?;
    }
    Ok(Some(item))
}

fn build_codec(settings: &CacheSettings) -> CodecPipeline {
    CodecPipeline::new(
        BincodeSerializer,
        Lz4Compressor,
        settings.min_value_length_for_compression,
    )
}

async fn open_engine(
    settings: &CacheSettings,
    log: &Arc<dyn Log>,
    now: i64,
) -> Result<(StorageEngine, Maintenance)> {
    let pool = ConnectionPool::open(settings).await?;
    let engine = StorageEngine::new(pool);
    let maintenance = Maintenance::new(Arc::new(clone_engine_handle(&engine)), log.clone());
    maintenance.bootstrap(now).await?;
    Ok((engine, maintenance))
}

/// `StorageEngine` wraps a `Clone`-able pool, so a second handle over the
/// same pool is cheap and behaves identically to the original.
fn clone_engine_handle(engine: &StorageEngine) -> StorageEngine {
    StorageEngine::new(engine.pool().clone())
}
