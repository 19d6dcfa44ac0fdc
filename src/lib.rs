//! KVLite: an embedded, persistent key/value cache backed by SQLite.
//!
//! The public surface is [`Cache`] — a cheap-to-clone, thread-safe handle
//! that validates inputs synchronously, swallows backend failures into
//! benign fallbacks (see [`error`]), and drives an async `sqlx` engine
//! underneath without ever exposing `async fn` to callers.
//!
//! ```no_run
//! use kvlite::{Cache, CacheSettings};
//!
//! let cache = Cache::open(CacheSettings::default())?;
//! cache.add_static_default("greeting", &"hello".to_string(), vec![])?;
//! let value: Option<String> = cache.get_default("greeting")?;
//! assert_eq!(value.as_deref(), Some("hello"));
//! # Ok::<(), kvlite::KvError>(())
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod log;
pub mod maintenance;
pub mod model;
pub mod pool;

pub use clock::{Clock, SystemClock, TestClock};
pub use codec::{BincodeSerializer, CodecPipeline, Compressor, Lz4Compressor, Serializer};
pub use config::CacheSettings;
pub use error::{KvError, Result};
pub use facade::Cache;
pub use log::{GlobalLog, Level, Log, NullLog};
pub use model::{CacheItem, Lifetime, ReadMode};
