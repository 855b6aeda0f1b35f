//! Relationship Tests
//!
//! - Inverses stay symmetric for pushes and local edits
//! - Local edits layer over canonical state and roll back
//! - Status distinguishes unknown membership from empty
//! - Synchronous relationships refuse to expose unloaded members

use crate::common::*;
use proptest::prelude::*;
use tessera::{Error, RecordState, RelationshipStatus, ResourceIdentity};

fn ids(identities: &[ResourceIdentity]) -> Vec<String> {
    identities
        .iter()
        .map(|i| i.id.clone().unwrap_or_default())
        .collect()
}

fn push_post_with_comments(store: &Store) {
    store
        .push(
            &Document::single(
                res("post", "1", &[("title", "A")])
                    .has_many("comments", vec![rid("comment", "1"), rid("comment", "2")]),
            )
            .with_included(vec![
                res("comment", "1", &[("body", "x")]),
                res("comment", "2", &[("body", "y")]),
            ]),
        )
        .unwrap();
}

#[test]
fn pushed_has_many_populates_inverse() {
    let store = store_with(&MockAdapter::new());
    push_post_with_comments(&store);

    let comment = store.peek_record("comment", "2").unwrap().unwrap();
    let post = comment.peek_belongs_to("post").unwrap().unwrap();
    assert_eq!(post.id().unwrap().as_deref(), Some("1"));
    assert_eq!(post.peek_has_many("comments").unwrap().len(), 2);
}

#[test]
fn pushed_belongs_to_populates_inverse() {
    let store = store_with(&MockAdapter::new());
    store
        .push(
            &Document::single(Resource::new("comment", "5").belongs_to("post", Some(rid("post", "1"))))
                .with_included(vec![res("post", "1", &[("title", "A")])]),
        )
        .unwrap();

    let post = store.peek_record("post", "1").unwrap().unwrap();
    let info = post.relationship_state("comments").unwrap();
    assert_eq!(ids(&info.canonical), vec!["5"]);
    assert_eq!(ids(&info.current), vec!["5"]);
}

#[test]
fn moving_a_comment_updates_both_posts() {
    let store = store_with(&MockAdapter::new());
    push_post_with_comments(&store);
    store
        .push(&Document::single(res("post", "2", &[("title", "B")])))
        .unwrap();

    let comment = store.peek_record("comment", "1").unwrap().unwrap();
    let other = store.peek_record("post", "2").unwrap().unwrap();
    comment.set_belongs_to("post", Some(&other)).unwrap();

    let first = store.peek_record("post", "1").unwrap().unwrap();
    assert_eq!(ids(&first.relationship_state("comments").unwrap().current), vec!["2"]);
    assert_eq!(ids(&other.relationship_state("comments").unwrap().current), vec!["1"]);
    // Canonical state is untouched by local edits.
    assert_eq!(
        ids(&first.relationship_state("comments").unwrap().canonical),
        vec!["1", "2"]
    );
    assert!(comment.is_dirty());
}

#[test]
fn add_at_index_and_remove() {
    let store = store_with(&MockAdapter::new());
    push_post_with_comments(&store);
    let third = store
        .push(&Document::single(res("comment", "3", &[("body", "z")])))
        .unwrap()
        .remove(0);
    let post = store.peek_record("post", "1").unwrap().unwrap();

    post.add_to_has_many("comments", &third, Some(0)).unwrap();
    assert_eq!(ids(&post.relationship_state("comments").unwrap().current), vec!["3", "1", "2"]);
    assert_eq!(third.peek_belongs_to("post").unwrap().unwrap(), post);

    post.remove_from_has_many("comments", &third).unwrap();
    assert_eq!(third.peek_belongs_to("post").unwrap(), None);
    assert!(!post.is_dirty());
}

#[test]
fn replace_has_many_then_rollback_restores_canonical() {
    let store = store_with(&MockAdapter::new());
    push_post_with_comments(&store);
    let post = store.peek_record("post", "1").unwrap().unwrap();
    let second = store.peek_record("comment", "2").unwrap().unwrap();

    post.replace_has_many("comments", &[second.clone()]).unwrap();
    assert_eq!(ids(&post.relationship_state("comments").unwrap().current), vec!["2"]);
    let first = store.peek_record("comment", "1").unwrap().unwrap();
    assert_eq!(first.peek_belongs_to("post").unwrap(), None);

    post.rollback_attributes().unwrap();
    assert_eq!(
        ids(&post.relationship_state("comments").unwrap().current),
        vec!["1", "2"]
    );
    assert_eq!(first.peek_belongs_to("post").unwrap().unwrap(), post);
    assert!(!post.is_dirty());
}

#[test]
fn server_push_replaces_local_edits() {
    let store = store_with(&MockAdapter::new());
    push_post_with_comments(&store);
    let post = store.peek_record("post", "1").unwrap().unwrap();
    let second = store.peek_record("comment", "2").unwrap().unwrap();
    post.remove_from_has_many("comments", &second).unwrap();

    store
        .push(&Document::single(
            Resource::new("post", "1").has_many("comments", vec![rid("comment", "2")]),
        ))
        .unwrap();
    let info = post.relationship_state("comments").unwrap();
    assert_eq!(ids(&info.canonical), vec!["2"]);
    assert_eq!(ids(&info.current), vec!["2"]);
}

#[test]
fn server_push_undoing_an_edit_leaves_record_clean() {
    let store = store_with(&MockAdapter::new());
    store
        .push(
            &Document::single(
                res("post", "1", &[("title", "A")]).has_many("comments", vec![rid("comment", "1")]),
            )
            .with_included(vec![
                res("comment", "1", &[("body", "x")]),
                res("comment", "2", &[("body", "y")]),
            ]),
        )
        .unwrap();
    let post = store.peek_record("post", "1").unwrap().unwrap();
    let second = store.peek_record("comment", "2").unwrap().unwrap();
    post.add_to_has_many("comments", &second, None).unwrap();
    assert_eq!(post.state(), RecordState::UpdatedUncommitted);

    store
        .push(&Document::single(
            Resource::new("post", "1").has_many("comments", vec![rid("comment", "1")]),
        ))
        .unwrap();
    let info = post.relationship_state("comments").unwrap();
    assert_eq!(ids(&info.current), vec!["1"]);
    assert_eq!(post.state(), RecordState::LoadedSaved);
    assert!(!post.is_dirty());
}

#[test]
fn server_push_keeps_record_dirty_for_remaining_attribute_edits() {
    let store = store_with(&MockAdapter::new());
    push_post_with_comments(&store);
    let post = store.peek_record("post", "1").unwrap().unwrap();
    let second = store.peek_record("comment", "2").unwrap().unwrap();
    post.remove_from_has_many("comments", &second).unwrap();
    post.set("title", "B").unwrap();

    store
        .push(&Document::single(Resource::new("post", "1").has_many(
            "comments",
            vec![rid("comment", "1"), rid("comment", "2")],
        )))
        .unwrap();
    assert_eq!(post.relationship_state("comments").unwrap().current.len(), 2);
    assert_eq!(post.state(), RecordState::UpdatedUncommitted);
    assert_eq!(post.changed_attributes().unwrap().len(), 1);
}

#[test]
fn status_distinguishes_unknown_from_empty() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::single(res("post", "1", &[("title", "A")])))
        .unwrap();
    let post = store.peek_record("post", "1").unwrap().unwrap();
    assert_eq!(
        post.relationship_state("comments").unwrap().status,
        RelationshipStatus::Unknown
    );

    store
        .push(&Document::single(Resource::new("post", "1").has_many("comments", vec![])))
        .unwrap();
    let info = post.relationship_state("comments").unwrap();
    assert_eq!(info.status, RelationshipStatus::Loaded);
    assert!(info.current.is_empty());
}

#[test]
fn sync_relationship_with_unloaded_member_errors() {
    let store = store_with(&MockAdapter::new());
    store
        .push(&Document::single(
            Resource::new("post", "1").has_many("comments", vec![rid("comment", "1")]),
        ))
        .unwrap();
    let post = store.peek_record("post", "1").unwrap().unwrap();
    assert!(matches!(
        post.peek_has_many("comments"),
        Err(Error::SyncRelationshipNotLoaded { .. })
    ));
}

#[test]
fn wrong_accessor_kind_errors() {
    let store = store_with(&MockAdapter::new());
    push_post_with_comments(&store);
    let post = store.peek_record("post", "1").unwrap().unwrap();
    assert!(matches!(
        post.peek_belongs_to("comments"),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        post.peek_has_many("editor"),
        Err(Error::UnknownRelationship { .. })
    ));
}

#[test]
fn many_to_many_stays_symmetric() {
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

    let a = store.peek_record("group", "a").unwrap().unwrap();
    let b = store.peek_record("group", "b").unwrap().unwrap();
    assert_eq!(ids(&a.relationship_state("people").unwrap().current), vec!["1", "2"]);
    assert_eq!(ids(&b.relationship_state("people").unwrap().current), vec!["1"]);

    let two = store.peek_record("person", "2").unwrap().unwrap();
    b.add_to_has_many("people", &two, None).unwrap();
    assert_eq!(ids(&two.relationship_state("groups").unwrap().current), vec!["a", "b"]);
}

#[derive(Debug, Clone)]
enum Step {
    Push { comment: u8, post: u8 },
    Assign { comment: u8, post: Option<u8> },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4, 0u8..3).prop_map(|(comment, post)| Step::Push { comment, post }),
        (0u8..4, proptest::option::of(0u8..3)).prop_map(|(comment, post)| Step::Assign { comment, post }),
    ]
}

proptest! {
    #[test]
    fn mixed_pushes_and_edits_keep_inverses_symmetric(steps in proptest::collection::vec(step(), 1..24)) {
        let store = store_with(&MockAdapter::new());
        let posts: Vec<_> = (0..3)
            .map(|p| Resource::new("post", &p.to_string()).has_many("comments", vec![]))
            .collect();
        let comments: Vec<_> = (0..4).map(|c| res("comment", &c.to_string(), &[("body", "x")])).collect();
        store.push(&Document::many(posts).with_included(comments)).unwrap();

        for step in &steps {
            match *step {
                Step::Push { comment, post } => {
                    store
                        .push(&Document::single(
                            Resource::new("comment", &comment.to_string())
                                .belongs_to("post", Some(rid("post", &post.to_string()))),
                        ))
                        .unwrap();
                }
                Step::Assign { comment, post } => {
                    let comment = store.peek_record("comment", &comment.to_string()).unwrap().unwrap();
                    let post = post.map(|p| store.peek_record("post", &p.to_string()).unwrap().unwrap());
                    comment.set_belongs_to("post", post.as_ref()).unwrap();
                }
            }
        }

        for p in 0..3u8 {
            let post = store.peek_record("post", &p.to_string()).unwrap().unwrap();
            let mut members = ids(&post.relationship_state("comments").unwrap().current);
            members.sort();
            let mut expected: Vec<String> = (0..4u8)
                .filter(|c| {
                    let comment = store.peek_record("comment", &c.to_string()).unwrap().unwrap();
                    comment.peek_belongs_to("post").unwrap() == Some(post.clone())
                })
                .map(|c| c.to_string())
                .collect();
            expected.sort();
            prop_assert_eq!(members, expected);
        }
    }
}
