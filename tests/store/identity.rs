//! Identity Map Tests
//!
//! - One record per `(type, id)` while referenced
//! - Pushes merge into the existing record
//! - Rejected documents leave the store untouched
//! - Unloaded records come back as new handles

use crate::common::*;
use serde_json::json;
use tessera::{Error, ErrorKind};

#[test]
fn pushes_of_same_identity_share_one_record() {
    let store = store_with(&MockAdapter::new());
    let first = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap();
    let second = store
        .push(&Document::single(res("post", "1", &[("title", "B")])))
        .unwrap();

    assert_eq!(first[0], second[0]);
    assert_eq!(first[0].client_id(), second[0].client_id());
}

#[test]
fn second_push_overwrites_attributes() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap();
    store
        .push(&Document::single(res("post", "1", &[("title", "B")])))
        .unwrap();

    let all = store.peek_all("post").unwrap();
    assert_eq!(all.len().unwrap(), 1);
    let post = all.get(0).unwrap().unwrap();
    assert_eq!(post.get("title").unwrap(), Some(json!("B")));
}

#[test]
fn partial_push_keeps_other_attributes_and_defaults() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap();
    store
        .push(&Document::single(Resource::new("post", "1")))
        .unwrap();

    let post = store.peek_record("post", "1").unwrap().unwrap();
    assert_eq!(post.get("title").unwrap(), Some(json!("A")));
    assert_eq!(post.get("published").unwrap(), Some(json!(false)));
}

#[test]
fn unknown_model_is_rejected() {
    let store = store_with(&MockAdapter::new());
    let err = store
        .push(&Document::single(Resource::new("planet", "1")))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownModel(_)));
    assert!(err.is_fatal());
}

#[test]
fn rejected_document_merges_nothing() {
    let store = store_with(&MockAdapter::new());
    // The primary resource is fine; the included one links the wrong type.
    let doc = Document::single(res("post", "1", &[("title", "A")])).with_included(vec![
        Resource::new("comment", "9").belongs_to("post", Some(rid("person", "1"))),
    ]);
    let err = store.push(&doc).unwrap_err();

    assert!(matches!(err, Error::TypeMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Consistency);
    assert!(!store.has_record_for_id("post", "1"));
    assert!(!store.has_record_for_id("comment", "9"));
}

#[test]
fn to_one_linkage_on_has_many_is_rejected() {
    let store = store_with(&MockAdapter::new());
    let doc = Document::single(Resource::new("post", "1").belongs_to("comments", Some(rid("comment", "1"))));
    assert!(matches!(store.push(&doc), Err(Error::TypeMismatch { .. })));
}

#[test]
fn unknown_relationship_key_is_ignored() {
    let store = store_with(&MockAdapter::new());
    let doc = Document::single(
        res("post", "1", &[("title", "A")]).belongs_to("editor", Some(rid("person", "1"))),
    );
    store.push(&doc).unwrap();
    assert!(store.has_record_for_id("post", "1"));
    assert!(!store.has_record_for_id("person", "1"));
}

#[test]
fn rematerialized_record_is_a_new_handle() {
    let store = store_with(&MockAdapter::new());
    let old = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    old.unload().unwrap();
    assert!(old.is_destroyed());
    assert!(matches!(old.get("title"), Err(Error::RecordDestroyed(_))));

    let new = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    assert_ne!(old, new);
    assert!(!new.is_destroyed());
}

#[test]
fn local_records_have_no_id_until_saved() {
    let store = store_with(&MockAdapter::new());
    let record = store.create_record("post", Default::default()).unwrap();
    assert_eq!(record.id().unwrap(), None);
    assert!(record.is_new());
    assert_eq!(store.peek_all("post").unwrap().len().unwrap(), 1);
}
