//! Unload Tests
//!
//! - Synchronous inverses treat an unload like a delete
//! - Asynchronous inverses keep the reference and refetch on access
//! - Many-to-many unloads only touch the unloaded record's edges
//! - Unloads during a save are deferred until it settles

use crate::common::*;
use tessera::{RecordState, ResourceIdentity};

fn ids(identities: &[ResourceIdentity]) -> Vec<String> {
    identities
        .iter()
        .map(|i| i.id.clone().unwrap_or_default())
        .collect()
}

#[test]
fn sync_unload_removes_member_and_is_not_restored_by_bare_push() {
    let store = store_with(&MockAdapter::new());
    store
        .push(
            &Document::single(
                Resource::new("post", "1")
                    .has_many("comments", vec![rid("comment", "b"), rid("comment", "c")]),
            )
            .with_included(vec![Resource::new("comment", "b"), Resource::new("comment", "c")]),
        )
        .unwrap();
    let post = store.peek_record("post", "1").unwrap().unwrap();
    let b = store.peek_record("comment", "b").unwrap().unwrap();

    b.unload().unwrap();
    assert_eq!(ids(&post.relationship_state("comments").unwrap().current), vec!["c"]);
    assert!(store.peek_record("comment", "b").unwrap().is_none());
    assert_eq!(store.peek_all("comment").unwrap().len().unwrap(), 1);

    store
        .push(&Document::single(Resource::new("comment", "b")))
        .unwrap();
    assert_eq!(ids(&post.relationship_state("comments").unwrap().current), vec!["c"]);
}

#[tokio::test]
async fn async_unload_keeps_reference_and_refetches_once() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    store
        .push(
            &Document::single(
                res("post", "1", &[("title", "A")]).belongs_to("author", Some(rid("person", "7"))),
            )
            .with_included(vec![res("person", "7", &[("name", "Ada")])]),
        )
        .unwrap();
    let post = store.peek_record("post", "1").unwrap().unwrap();
    let original = post.belongs_to("author").await.unwrap().unwrap();
    assert_eq!(adapter.find_calls(), 0);

    original.unload().unwrap();
    assert!(original.is_destroyed());
    assert_eq!(ids(&post.relationship_state("author").unwrap().current), vec!["7"]);

    adapter.serve(res("person", "7", &[("name", "Ada")]));
    let fetched = post.belongs_to("author").await.unwrap().unwrap();
    assert_eq!(adapter.find_calls(), 1);
    assert_ne!(fetched, original);
    assert_eq!(fetched.id().unwrap().as_deref(), Some("7"));

    // Loaded again: no further fetch.
    post.belongs_to("author").await.unwrap();
    assert_eq!(adapter.find_calls(), 1);
}

#[test]
fn many_to_many_unload_leaves_other_members() {
    let store = store_with(&MockAdapter::new());
    store
        .push(
            &Document::many(vec![
                Resource::new("person", "1").has_many("groups", vec![rid("group", "a"), rid("group", "b")]),
                Resource::new("person", "2").has_many("groups", vec![rid("group", "a")]),
            ])
            .with_included(vec![Resource::new("group", "a"), Resource::new("group", "b")]),
        )
        .unwrap();

    store.peek_record("person", "1").unwrap().unwrap().unload().unwrap();

    let a = store.peek_record("group", "a").unwrap().unwrap();
    let b = store.peek_record("group", "b").unwrap().unwrap();
    let two = store.peek_record("person", "2").unwrap().unwrap();
    assert_eq!(ids(&a.relationship_state("people").unwrap().current), vec!["2"]);
    assert!(b.relationship_state("people").unwrap().current.is_empty());
    assert_eq!(ids(&two.relationship_state("groups").unwrap().current), vec!["a"]);
}

#[test]
fn unloading_an_owner_drops_its_stub_members() {
    let store = store_with(&MockAdapter::new());
    // Comment 9 is only known through this linkage.
    store
        .push(&Document::single(
            res("post", "1", &[("title", "A")]).has_many("comments", vec![rid("comment", "9")]),
        ))
        .unwrap();
    store.peek_record("post", "1").unwrap().unwrap().unload().unwrap();

    assert!(store.peek_record("post", "1").unwrap().is_none());
    assert!(store.peek_record("comment", "9").unwrap().is_none());
}

#[tokio::test]
async fn unload_during_save_is_deferred() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.set("title", "B").unwrap();
    let all = store.peek_all("post").unwrap();

    let (saved, ()) = tokio::join!(post.save(), async {
        assert!(post.is_saving());
        post.unload().unwrap();
        // Still in flight: the handle lives but the record left the arrays.
        assert!(!post.is_destroyed());
        assert_eq!(all.len().unwrap(), 0);
    });
    saved.unwrap();

    assert!(post.is_destroyed());
    assert_eq!(post.state(), RecordState::Empty);
    assert!(!store.has_record_for_id("post", "1"));
}

#[tokio::test]
async fn push_during_deferred_unload_keeps_record() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.set("title", "B").unwrap();
    let all = store.peek_all("post").unwrap();

    let (saved, ()) = tokio::join!(post.save(), async {
        post.unload().unwrap();
        assert_eq!(all.len().unwrap(), 0);
        store
            .push(&Document::single(res("post", "1", &[("title", "B")])))
            .unwrap();
        assert_eq!(all.len().unwrap(), 1);
    });
    saved.unwrap();

    assert!(!post.is_destroyed());
    assert_eq!(post.state(), RecordState::LoadedSaved);
    assert!(store.has_record_for_id("post", "1"));
    assert_eq!(all.get(0).unwrap(), Some(post.clone()));
}

#[tokio::test]
async fn find_during_deferred_unload_keeps_record() {
    let adapter = MockAdapter::new();
    let store = store_with(&adapter);
    let post = store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap()
        .remove(0);
    post.set("title", "B").unwrap();
    let all = store.peek_all("post").unwrap();

    let (saved, found) = tokio::join!(post.save(), async {
        post.unload().unwrap();
        store.find_record("post", "1").await
    });
    saved.unwrap();

    // Same model, same handle; nothing was fetched.
    assert_eq!(found.unwrap(), post);
    assert!(!post.is_destroyed());
    assert_eq!(post.state(), RecordState::LoadedSaved);
    assert_eq!(all.len().unwrap(), 1);
    assert_eq!(adapter.find_calls(), 0);
}

#[test]
fn unload_all_and_destroy() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::many(vec![
            res("post", "1", &[("title", "A")]),
            res("post", "2", &[("title", "B")]),
            res("person", "1", &[("name", "Ada")]),
        ]))
        .unwrap();
    let posts = store.peek_all("post").unwrap();

    store.unload_all(Some("post")).unwrap();
    assert_eq!(posts.len().unwrap(), 0);
    assert!(store.has_record_for_id("person", "1"));

    store.destroy().unwrap();
    assert!(posts.is_destroyed());
    assert!(matches!(posts.len(), Err(tessera::Error::ArrayDestroyed(_))));
    assert!(!store.has_record_for_id("person", "1"));
}
