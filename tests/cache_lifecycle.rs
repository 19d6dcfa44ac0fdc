//! End-to-end coverage over the public [`kvlite::Cache`] surface, driven by
//! a [`TestClock`] so expiry and refresh behavior is deterministic.

use kvlite::{Cache, CacheSettings, KvError, ReadMode, TestClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn open_with_clock(clock: Arc<TestClock>) -> Cache {
    let settings = CacheSettings {
        chances_of_auto_cleanup: 0.0,
        ..CacheSettings::default()
    };
    Cache::open_with(settings, clock, Arc::new(kvlite::NullLog)).unwrap()
}

#[test]
fn add_timed_then_immediate_peek() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock.clone());

    cache.add_timed("P", "k", &"v".to_string(), 10, vec![]).unwrap();
    assert_eq!(cache.count(None, ReadMode::IgnoreExpiryDate).unwrap(), 1);
    let value: Option<String> = cache.peek("P", "k").unwrap();
    assert_eq!(value.as_deref(), Some("v"));
}

#[test]
fn timed_item_expires_and_is_lazily_removed() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock.clone());

    cache.add_timed("P", "k", &"v".to_string(), 10, vec![]).unwrap();
    clock.advance(11);

    let value: Option<String> = cache.get("P", "k").unwrap();
    assert_eq!(value, None);
    assert_eq!(
        cache.count(None, ReadMode::ConsiderExpiryDate).unwrap(),
        0
    );
}

#[test]
fn sliding_item_survives_repeated_reads_within_interval() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock.clone());

    cache.add_sliding("P", "k", &"v".to_string(), 5, vec![]).unwrap();

    clock.set(4);
    let first: Option<String> = cache.get("P", "k").unwrap();
    assert_eq!(first.as_deref(), Some("v"));

    clock.set(8);
    let second: Option<String> = cache.get("P", "k").unwrap();
    assert_eq!(second.as_deref(), Some("v"));
}

#[test]
fn timed_item_read_before_expiry_does_not_change_expiry() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock.clone());

    cache.add_timed("P", "k", &"v".to_string(), 100, vec![]).unwrap();
    clock.set(50);
    let _: Option<String> = cache.get("P", "k").unwrap();

    let item = cache.get_item::<String>("P", "k").unwrap().unwrap();
    assert_eq!(item.utc_expiry, 100);
}

#[test]
fn parent_removal_cascades_to_dependent_children() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    cache.add_static("P", "a", &1i32, vec![]).unwrap();
    cache.add_static("P", "b", &2i32, vec!["a".to_string()]).unwrap();

    assert!(cache.contains("P", "b").unwrap());
    cache.remove("P", "a").unwrap();
    assert!(!cache.contains("P", "b").unwrap());
}

#[test]
fn cascade_is_transitive_across_three_levels() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    cache.add_static("P", "a", &1i32, vec![]).unwrap();
    cache.add_static("P", "b", &2i32, vec!["a".to_string()]).unwrap();
    cache.add_static("P", "c", &3i32, vec!["b".to_string()]).unwrap();

    cache.remove("P", "a").unwrap();
    assert!(!cache.contains("P", "b").unwrap());
    assert!(!cache.contains("P", "c").unwrap());
}

#[test]
fn partitions_are_isolated() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    cache.add_static("p1", "k", &"one".to_string(), vec![]).unwrap();
    cache.add_static("p2", "k", &"two".to_string(), vec![]).unwrap();

    cache.remove("p1", "k").unwrap();
    assert!(!cache.contains("p1", "k").unwrap());
    let still_there: Option<String> = cache.peek("p2", "k").unwrap();
    assert_eq!(still_there.as_deref(), Some("two"));
}

#[test]
fn clear_with_ignore_expiry_removes_everything_in_scope() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    for i in 0..50 {
        cache
            .add_timed("P", &format!("k{i}"), &i, 10_000, vec![])
            .unwrap();
    }

    let removed = cache.clear(Some("P"), ReadMode::IgnoreExpiryDate).unwrap();
    assert_eq!(removed, 50);
    assert_eq!(
        cache.count(Some("P"), ReadMode::IgnoreExpiryDate).unwrap(),
        0
    );
}

#[test]
fn clear_is_idempotent() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    cache.add_static("P", "k", &1i32, vec![]).unwrap();
    cache.clear(None, ReadMode::IgnoreExpiryDate).unwrap();
    let second = cache.clear(None, ReadMode::IgnoreExpiryDate).unwrap();
    assert_eq!(second, 0);
    assert_eq!(
        cache.count(None, ReadMode::IgnoreExpiryDate).unwrap(),
        0
    );
}

#[test]
fn upsert_on_repeated_add_keeps_one_row() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    cache.add_static("P", "k", &1i32, vec![]).unwrap();
    cache.add_static("P", "k", &2i32, vec![]).unwrap();

    assert_eq!(cache.count(Some("P"), ReadMode::IgnoreExpiryDate).unwrap(), 1);
    let value: Option<i32> = cache.peek("P", "k").unwrap();
    assert_eq!(value, Some(2));
}

#[test]
fn too_many_parent_keys_is_rejected_synchronously() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    let parents: Vec<String> = (0..6).map(|i| format!("p{i}")).collect();
    let err = cache.add_static("P", "k", &1i32, parents).unwrap_err();
    assert!(matches!(err, KvError::InvalidArgument(_)));
    assert_eq!(cache.count(None, ReadMode::IgnoreExpiryDate).unwrap(), 0);
}

#[test]
fn empty_partition_or_key_is_rejected_synchronously() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    assert!(cache.add_static("", "k", &1i32, vec![]).is_err());
    assert!(cache.add_static("P", "", &1i32, vec![]).is_err());
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Blob(Vec<u8>);

#[test]
fn large_values_are_compressed_transparently() {
    let clock = Arc::new(TestClock::new(0));
    let settings = CacheSettings {
        min_value_length_for_compression: 1024,
        chances_of_auto_cleanup: 0.0,
        ..CacheSettings::default()
    };
    let cache = Cache::open_with(settings, clock, Arc::new(kvlite::NullLog)).unwrap();

    let payload = Blob(vec![7u8; 100 * 1024]);
    cache.add_timed("P", "k", &payload, 3600, vec![]).unwrap();

    let item = cache.get_item::<Blob>("P", "k").unwrap().unwrap();
    assert_eq!(item.value, payload);
}

#[test]
fn get_or_add_sliding_only_calls_producer_once() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    let mut calls = 0;
    let v1 = cache
        .get_or_add_sliding("P", "k", 60, vec![], || {
            calls += 1;
            "computed".to_string()
        })
        .unwrap();
    assert_eq!(v1, "computed");

    let v2 = cache
        .get_or_add_sliding("P", "k", 60, vec![], || {
            calls += 1;
            "computed-again".to_string()
        })
        .unwrap();
    assert_eq!(v2, "computed");
    assert_eq!(calls, 1);
}

#[test]
fn default_partition_wrappers_round_trip() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    cache.add_static_default("k", &"v".to_string(), vec![]).unwrap();
    let value: Option<String> = cache.get_default("k").unwrap();
    assert_eq!(value.as_deref(), Some("v"));
}

#[test]
fn vacuum_does_not_lose_live_rows() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);

    cache.add_static("P", "k", &1i32, vec![]).unwrap();
    cache.vacuum().unwrap();
    let value: Option<i32> = cache.peek("P", "k").unwrap();
    assert_eq!(value, Some(1));
}

#[test]
fn operations_after_close_fail_with_disposed() {
    let clock = Arc::new(TestClock::new(0));
    let cache = open_with_clock(clock);
    cache.close().unwrap();

    let err = cache.add_static("P", "k", &1i32, vec![]).unwrap_err();
    assert!(matches!(err, KvError::Disposed));
}
