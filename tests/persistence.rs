//! On-disk persistence: data survives closing one [`kvlite::Cache`] handle
//! and opening a fresh one against the same file.

use kvlite::{Cache, CacheSettings};
use std::sync::Arc;

fn file_settings(path: &std::path::Path) -> CacheSettings {
    CacheSettings {
        cache_uri: format!("sqlite://{}", path.to_str().unwrap()),
        chances_of_auto_cleanup: 0.0,
        ..CacheSettings::default()
    }
}

#[test]
fn data_survives_reopen_against_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kvlite-persistence.db");

    {
        let cache = Cache::open(file_settings(&db_path)).unwrap();
        cache
            .add_static("P", "k", &"persisted".to_string(), vec![])
            .unwrap();
        cache.close().unwrap();
    }

    let cache = Cache::open(file_settings(&db_path)).unwrap();
    let value: Option<String> = cache.peek("P", "k").unwrap();
    assert_eq!(value.as_deref(), Some("persisted"));
}

#[test]
fn bootstrap_against_an_existing_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kvlite-bootstrap.db");

    let first = Cache::open(file_settings(&db_path)).unwrap();
    first.add_static("P", "a", &1i32, vec![]).unwrap();
    first.close().unwrap();

    // Re-opening the same file runs bootstrap again against an already
    // populated schema — this must not fail or disturb existing rows.
    let second = Cache::open(file_settings(&db_path)).unwrap();
    let value: Option<i32> = second.peek("P", "a").unwrap();
    assert_eq!(value, Some(1));
}

#[test]
fn reopen_with_a_handle_shares_the_running_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kvlite-handle.db");

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handle = runtime.handle().clone();

    let cache = Cache::from_handle(
        handle,
        file_settings(&db_path),
        Arc::new(kvlite::SystemClock),
        Arc::new(kvlite::NullLog),
    )
    .unwrap();
    cache.add_static("P", "k", &42i32, vec![]).unwrap();
    let value: Option<i32> = cache.peek("P", "k").unwrap();
    assert_eq!(value, Some(42));
}
