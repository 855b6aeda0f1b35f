//! Lifecycle Tests
//!
//! State transitions driven through the public API:
//! - clean / dirty round trips
//! - invalid records becoming valid again
//! - deletes of new and persisted records
//! - illegal events rejected without changing state

use crate::common::*;
use serde_json::json;
use tessera::{AdapterError, Error, RecordState, ValidationError};

#[tokio::test]
async fn invalid_new_record_recovers_and_delete_discards_it() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    let person = store.create_record("person", Default::default()).unwrap();
    adapter.script_save(Err(AdapterError::Invalid(vec![ValidationError::for_attribute(
        "name",
        "can't be blank",
    )])));

    let err = person.save().await.unwrap_err();
    assert!(matches!(err, Error::Invalid { .. }));
    assert_eq!(person.state(), RecordState::CreatedInvalid);
    assert!(!person.is_valid());
    assert_eq!(person.errors().unwrap().messages_for("name"), ["can't be blank"]);

    person.set("name", "Ada").unwrap();
    assert_eq!(person.state(), RecordState::CreatedUncommitted);
    assert!(person.errors().unwrap().is_empty());

    // Invalid again, then deleted before ever being persisted.
    adapter.script_save(Err(AdapterError::Invalid(vec![ValidationError::for_attribute(
        "name",
        "is taken",
    )])));
    person.save().await.unwrap_err();
    assert_eq!(person.state(), RecordState::CreatedInvalid);
    person.delete_record().unwrap();
    assert_eq!(person.state(), RecordState::Empty);
    assert!(person.is_destroyed());
    assert_eq!(store.peek_all("person").unwrap().len().unwrap(), 0);
}

#[test]
fn editing_back_to_original_is_clean() {
    let store = store_with(&MockAdapter::new());
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);

    post.set("title", "B").unwrap();
    assert!(post.is_dirty());
    let changes = post.changed_attributes().unwrap();
    assert_eq!(changes["title"], (Some(json!("A")), json!("B")));

    post.set("title", "A").unwrap();
    assert!(!post.is_dirty());
    assert!(post.changed_attributes().unwrap().is_empty());
    assert_eq!(post.state(), RecordState::LoadedSaved);
}

#[test]
fn push_matching_local_edit_makes_record_clean() {
    let store = store_with(&MockAdapter::new());
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.set("title", "B").unwrap();

    store
        .push(&Document::single(res("post", "1", &[("title", "B")])))
        .unwrap();
    assert_eq!(post.state(), RecordState::LoadedSaved);
}

#[test]
fn rollback_discards_attribute_edits() {
    let store = store_with(&MockAdapter::new());
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.set("title", "B").unwrap();
    post.rollback_attributes().unwrap();

    assert_eq!(post.get("title").unwrap(), Some(json!("A")));
    assert_eq!(post.state(), RecordState::LoadedSaved);
}

#[test]
fn rollback_of_deleted_record_restores_it() {
    let store = store_with(&MockAdapter::new());
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.delete_record().unwrap();
    assert!(post.is_deleted());

    post.rollback_attributes().unwrap();
    assert_eq!(post.state(), RecordState::LoadedSaved);
}

#[test]
fn deleted_record_rejects_edits() {
    let store = store_with(&MockAdapter::new());
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.delete_record().unwrap();

    let err = post.set("title", "B").unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert!(err.is_fatal());
    assert_eq!(post.state(), RecordState::DeletedUncommitted);
    assert_eq!(post.get("title").unwrap(), Some(json!("A")));
}

#[test]
fn clear_errors_makes_record_valid() {
    let store = store_with(&MockAdapter::new());
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    // No errors: clearing is a no-op for a valid record.
    post.clear_errors().unwrap();
    assert_eq!(post.state(), RecordState::LoadedSaved);
}

#[tokio::test]
async fn clear_errors_after_failed_update() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.set("title", "").unwrap();
    adapter.script_save(Err(AdapterError::Invalid(vec![ValidationError::for_attribute(
        "title",
        "can't be blank",
    )])));
    post.save().await.unwrap_err();
    assert_eq!(post.state(), RecordState::UpdatedInvalid);

    post.clear_errors().unwrap();
    assert_eq!(post.state(), RecordState::UpdatedUncommitted);
    assert!(post.is_valid());
}
