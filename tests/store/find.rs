//! Find Tests
//!
//! - find_record fetches once and then serves from memory
//! - Concurrent finds share a request
//! - Failed finds evict their record; not-found also drops it from relationships
//! - Async hasMany members are fetched individually or coalesced
//! - Dropped requests leave no record loading

use crate::common::*;
use serde_json::json;
use tessera::{AdapterError, Error, ErrorKind, RecordState, StoreConfig};

#[tokio::test]
async fn find_fetches_once_then_serves_from_memory() {
    let adapter = MockAdapter::new();
    adapter.serve(res("post", "1", &[("title", "A")]));
    let store = store_with(&adapter);

    let first = store.find_record("post", "1").await.unwrap();
    let second = store.find_record("post", "1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(adapter.find_calls(), 1);
    assert_eq!(first.get("title").unwrap(), Some(json!("A")));
    assert_eq!(first.state(), RecordState::LoadedSaved);
}

#[tokio::test]
async fn concurrent_finds_share_one_request() {
    let adapter = MockAdapter::new();
    adapter.serve(res("post", "1", &[("title", "A")]));
    let store = store_with(&adapter);

    let (a, b) = tokio::join!(store.find_record("post", "1"), store.find_record("post", "1"));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(adapter.find_calls(), 1);
}

#[tokio::test]
async fn concurrent_waiters_see_the_failure() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);

    let (a, b) = tokio::join!(store.find_record("post", "404"), store.find_record("post", "404"));
    assert_eq!(a.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(b.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(adapter.find_calls(), 1);
}

#[tokio::test]
async fn not_found_evicts_record_from_relationships() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    store
        .push(
            &Document::single(res("person", "1", &[("name", "Ada")]).has_many(
                "posts",
                vec![rid("post", "10"), rid("post", "11")],
            ))
            .with_included(vec![res("post", "11", &[("title", "B")])]),
        )
        .unwrap();

    let err = store.find_record("post", "10").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(!err.is_fatal());

    let person = store.peek_record("person", "1").unwrap().unwrap();
    let info = person.relationship_state("posts").unwrap();
    assert_eq!(info.canonical.len(), 1);
    assert_eq!(info.current.len(), 1);
    assert_eq!(info.current[0].id.as_deref(), Some("11"));
    assert!(!store.has_record_for_id("post", "10"));
}

#[tokio::test]
async fn generic_failure_returns_record_to_empty_and_can_retry() {
    let adapter = MockAdapter::new();
    adapter.serve(res("post", "1", &[("title", "A")]));
    adapter.fail_finds(Some(AdapterError::generic("offline")));
    let store = store_with(&adapter);

    let err = store.find_record("post", "1").await.unwrap_err();
    assert!(matches!(err, Error::Adapter(_)));
    assert!(err.is_retryable());
    assert!(!store.has_record_for_id("post", "1"));

    adapter.fail_finds(None);
    let post = store.find_record("post", "1").await.unwrap();
    assert_eq!(post.state(), RecordState::LoadedSaved);
}

#[tokio::test]
async fn reload_refreshes_and_failed_reload_keeps_data() {
    let adapter = MockAdapter::new();
    adapter.serve(res("post", "1", &[("title", "A")]));
    let store = store_with(&adapter);
    let post = store.find_record("post", "1").await.unwrap();

    adapter.serve(res("post", "1", &[("title", "B")]));
    let reloaded = post.reload().await.unwrap();
    assert_eq!(reloaded, post);
    assert_eq!(post.get("title").unwrap(), Some(json!("B")));
    assert!(!post.is_reloading());

    adapter.fail_finds(Some(AdapterError::generic("offline")));
    assert!(post.reload().await.is_err());
    assert_eq!(post.get("title").unwrap(), Some(json!("B")));
    assert_eq!(post.state(), RecordState::LoadedSaved);
    assert_eq!(adapter.find_calls(), 3);
}

#[tokio::test]
async fn find_unknown_model_fails_without_request() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    assert!(matches!(
        store.find_record("planet", "1").await,
        Err(Error::UnknownModel(_))
    ));
    assert!(adapter.calls().is_empty());
}

fn person_with_posts(store: &Store) {
    store
        .push(&Document::single(res("person", "1", &[("name", "Ada")]).has_many(
            "posts",
            vec![rid("post", "1"), rid("post", "2"), rid("post", "3")],
        )))
        .unwrap();
}

#[tokio::test]
async fn async_has_many_fetches_each_missing_member_once() {
    let adapter = MockAdapter::new();
    for id in ["1", "2", "3"] {
        adapter.serve(res("post", id, &[("title", id)]));
    }
    let store = store_with(&adapter);
    person_with_posts(&store);
    let person = store.peek_record("person", "1").unwrap().unwrap();

    let posts = person.has_many("posts").await.unwrap();
    assert_eq!(posts.len(), 3);
    assert_eq!(adapter.find_calls(), 3);

    person.has_many("posts").await.unwrap();
    assert_eq!(adapter.find_calls(), 3);
}

#[tokio::test]
async fn coalesced_fetch_uses_find_many() {
    let adapter = MockAdapter::coalescing();
    for id in ["1", "2"] {
        adapter.serve(res("post", id, &[("title", id)]));
    }
    let config = StoreConfig {
        coalesce_find_requests: true,
        ..StoreConfig::default()
    };
    let store = store_with_config(&adapter, config);
    person_with_posts(&store);
    let person = store.peek_record("person", "1").unwrap().unwrap();

    // Post 3 is missing from the response and dropped as not found.
    let posts = person.has_many("posts").await.unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(
        adapter.calls(),
        vec![Call::FindMany(
            "post".into(),
            vec!["1".into(), "2".into(), "3".into()]
        )]
    );
    assert_eq!(person.relationship_state("posts").unwrap().current.len(), 2);
}

#[tokio::test]
async fn coalesced_fetch_is_chunked() {
    let adapter = MockAdapter::coalescing();
    for id in ["1", "2", "3"] {
        adapter.serve(res("post", id, &[("title", id)]));
    }
    let config = StoreConfig {
        coalesce_find_requests: true,
        max_find_many_batch: 2,
        ..StoreConfig::default()
    };
    let store = store_with_config(&adapter, config);
    person_with_posts(&store);
    let person = store.peek_record("person", "1").unwrap().unwrap();

    assert_eq!(person.has_many("posts").await.unwrap().len(), 3);
    assert_eq!(adapter.find_calls(), 2);
}

#[tokio::test]
async fn dropped_find_leaves_no_record_loading() {
    let adapter = MockAdapter::new();
    adapter.serve(res("post", "1", &[("title", "A")]));
    let store = store_with(&adapter);

    tokio::select! {
        biased;
        _ = store.find_record("post", "1") => panic!("find should still be pending"),
        _ = std::future::ready(()) => {}
    }
    assert!(!store.has_record_for_id("post", "1"));

    let post = store.find_record("post", "1").await.unwrap();
    assert_eq!(post.state(), RecordState::LoadedSaved);
    assert_eq!(adapter.find_calls(), 2);
}
