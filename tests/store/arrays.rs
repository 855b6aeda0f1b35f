//! Record Array Tests
//!
//! - Live arrays track every visible record of a type
//! - One contiguous change per array per batch
//! - Filtered arrays re-evaluate on record changes
//! - Query arrays keep server order and are replaced on update

use crate::common::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tessera::{AdapterError, ArrayChange, ArrayKind, Error};

fn collect(array: &tessera::RecordArray) -> Arc<Mutex<Vec<ArrayChange>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    array.observe(move |change| sink.lock().push(change.clone())).unwrap();
    seen
}

#[test]
fn pushing_many_records_notifies_once() {
    let store = store_with(&MockAdapter::new());
    let all = store.peek_all("post").unwrap();
    let seen = collect(&all);

    let resources = (1..=5)
        .map(|i| res("post", &i.to_string(), &[("title", "t")]))
        .collect();
    store.push(&Document::many(resources)).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!((seen[0].index, seen[0].removed, seen[0].added, seen[0].len), (0, 0, 5, 5));
    assert_eq!(all.len().unwrap(), 5);
    assert_eq!(all.kind().unwrap(), ArrayKind::Live);
}

#[test]
fn attribute_only_update_does_not_notify_live_array() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap();
    let all = store.peek_all("post").unwrap();
    let seen = collect(&all);

    store
        .push(&Document::single(res("post", "1", &[("title", "B")])))
        .unwrap();
    assert!(seen.lock().is_empty());
}

#[test]
fn peek_all_returns_the_same_live_array() {
    let store = store_with(&MockAdapter::new());
    assert_eq!(store.peek_all("post").unwrap(), store.peek_all("post").unwrap());
}

#[test]
fn filtered_array_follows_record_changes() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::many(vec![
            res("post", "1", &[("title", "keep")]),
            res("post", "2", &[("title", "drop")]),
        ]))
        .unwrap();
    let kept = store
        .filter("post", |snapshot| snapshot.attr("title") == Some(&json!("keep")))
        .unwrap();
    assert_eq!(kept.len().unwrap(), 1);
    let seen = collect(&kept);

    let second = store.peek_record("post", "2").unwrap().unwrap();
    second.set("title", "keep").unwrap();
    assert_eq!(kept.len().unwrap(), 2);

    let first = store.peek_record("post", "1").unwrap().unwrap();
    first.set("title", "drop").unwrap();
    assert_eq!(kept.client_ids().unwrap(), vec![second.client_id()]);
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn deleted_and_unloaded_records_leave_arrays() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::many(vec![
            res("post", "1", &[("title", "A")]),
            res("post", "2", &[("title", "B")]),
        ]))
        .unwrap();
    let all = store.peek_all("post").unwrap();

    store.peek_record("post", "1").unwrap().unwrap().unload().unwrap();
    assert_eq!(all.len().unwrap(), 1);
    assert_eq!(all.get(0).unwrap().unwrap().id().unwrap().as_deref(), Some("2"));
}

#[tokio::test]
async fn find_all_populates_live_array() {
    let adapter = MockAdapter::new();
    adapter.serve(res("post", "1", &[("title", "A")]));
    adapter.serve(res("post", "2", &[("title", "B")]));
    let store = store_with(&adapter);

    let all = store.find_all("post").await.unwrap();
    assert_eq!(all.len().unwrap(), 2);
    assert!(!all.is_updating().unwrap());
    assert_eq!(all, store.peek_all("post").unwrap());

    adapter.serve(res("post", "3", &[("title", "C")]));
    all.update().await.unwrap();
    assert_eq!(all.len().unwrap(), 3);
}

#[tokio::test]
async fn query_keeps_server_order_and_meta() {
    let adapter = MockAdapter::new();
    adapter.script_query(Ok(Document::many(vec![
        res("post", "3", &[("title", "C")]),
        res("post", "1", &[("title", "A")]),
    ])
    .with_meta(json!({ "total": 2 }))));
    let store = store_with(&adapter);

    let results = store.query("post", json!({ "sort": "-id" })).await.unwrap();
    assert_eq!(results.kind().unwrap(), ArrayKind::AdapterPopulated);
    assert!(results.is_loaded().unwrap());
    assert!(!results.is_updating().unwrap());
    assert_eq!(results.meta().unwrap(), Some(json!({ "total": 2 })));
    assert_eq!(results.query().unwrap(), Some(json!({ "sort": "-id" })));
    let order: Vec<_> = results
        .records()
        .unwrap()
        .iter()
        .map(|r| r.id().unwrap().unwrap())
        .collect();
    assert_eq!(order, vec!["3", "1"]);
    // Query results are records like any other.
    assert_eq!(store.peek_all("post").unwrap().len().unwrap(), 2);
}

#[tokio::test]
async fn query_update_replaces_members_in_one_change() {
    let adapter = MockAdapter::new();
    adapter.script_query(Ok(Document::many(vec![res("post", "1", &[])])));
    let store = store_with(&adapter);
    let results = store.query("post", json!({ "page": 1 })).await.unwrap();
    let seen = collect(&results);

    adapter.script_query(Ok(Document::many(vec![res("post", "2", &[]), res("post", "3", &[])])));
    results.update().await.unwrap();

    assert_eq!(results.len().unwrap(), 2);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!((seen[0].index, seen[0].removed, seen[0].added), (0, 1, 2));
    let queries = adapter
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Query(..)))
        .count();
    assert_eq!(queries, 2);
}

#[tokio::test]
async fn failed_query_returns_error() {
    let adapter = MockAdapter::new();
    adapter.script_query(Err(AdapterError::generic("bad query")));
    let store = store_with(&adapter);
    assert!(store.query("post", json!({})).await.is_err());
}

#[test]
fn destroyed_array_rejects_access_and_observers() {
    let store = store_with(&MockAdapter::new());
    let all = store.peek_all("post").unwrap();
    let _seen = collect(&all);
    all.destroy().unwrap();

    assert!(all.is_destroyed());
    assert!(all.len().is_err());
    assert!(all.observe(|_| {}).is_err());
    // A fresh live array is created on demand.
    assert!(!store.peek_all("post").unwrap().is_destroyed());
}

#[test]
fn store_calls_from_a_filter_predicate_fail_instead_of_blocking() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    let inner = store.clone();
    let all = store
        .filter("post", move |_| {
            sink.lock().push(inner.peek_record("post", "1").map(|_| ()));
            true
        })
        .unwrap();

    assert_eq!(all.len().unwrap(), 1);
    let outcomes = outcomes.lock();
    assert!(!outcomes.is_empty());
    assert!(outcomes.iter().all(|o| matches!(o, Err(Error::Reentrant))));
    drop(outcomes);
    // The store is usable again once the batch is over.
    assert!(store.peek_record("post", "1").unwrap().is_some());
}
