//! Branch reviews: classification, staleness, reuse and cancellation

use std::collections::BTreeSet;

use bvc_engine::{CancellationToken, VcError};
use bvc_model::{BusinessId, ReviewStatus};
use bvc_test_utils::{path, setup_engine, TestEngine};
use pretty_assertions::assert_eq;

fn ids(names: &[&str]) -> BTreeSet<BusinessId> {
    names.iter().map(|n| BusinessId::new(*n)).collect()
}

/// MAIN changes X, adds Y and drops Z after A branched; A edits X and adds W
fn both_sides_moved() -> TestEngine {
    let eng = setup_engine(90);
    eng.at(100).write("MAIN", "X", "one");
    eng.at(101).write("MAIN", "Z", "zed");
    eng.branch("MAIN/A");
    eng.at(110).write("MAIN", "X", "two");
    eng.at(111).write("MAIN", "Y", "new");
    eng.at(112).delete("MAIN", "Z");
    eng.at(115).write("MAIN/A", "X", "child");
    eng.at(116).write("MAIN/A", "W", "own");
    eng
}

#[test]
fn parent_to_child_review_classifies_parent_changes() {
    let eng = both_sides_moved();
    let review = eng.vc.create_review(&path("MAIN"), &path("MAIN/A")).unwrap();
    assert_eq!(review.status, ReviewStatus::Current);
    assert!(review.source_is_parent);

    let changes = review.changes.unwrap();
    assert_eq!(changes.new, ids(&["Y"]));
    assert_eq!(changes.changed, ids(&["X"]));
    assert_eq!(changes.deleted, ids(&["Z"]));
}

#[test]
fn child_to_parent_review_classifies_child_changes() {
    let eng = both_sides_moved();
    let review = eng.vc.create_review(&path("MAIN/A"), &path("MAIN")).unwrap();
    assert!(!review.source_is_parent);

    let changes = review.changes.unwrap();
    assert_eq!(changes.new, ids(&["W"]));
    assert_eq!(changes.changed, ids(&["X"]));
    assert!(changes.deleted.is_empty());
}

#[test]
fn child_deletion_shows_as_deleted_on_parent() {
    let eng = setup_engine(100);
    eng.write("MAIN", "X", "one");
    eng.branch("MAIN/A");
    eng.at(110).delete("MAIN/A", "X");

    let review = eng.vc.create_review(&path("MAIN/A"), &path("MAIN")).unwrap();
    assert_eq!(review.changes.unwrap().deleted, ids(&["X"]));
}

#[test]
fn identical_content_is_not_a_change() {
    let eng = setup_engine(100);
    eng.write("MAIN", "X", "one");
    eng.branch("MAIN/A");
    eng.at(110).write("MAIN", "X", "same");
    eng.at(111).write("MAIN/A", "X", "same");

    let review = eng.vc.create_review(&path("MAIN"), &path("MAIN/A")).unwrap();
    assert!(review.changes.unwrap().is_empty());
}

#[test]
fn review_goes_stale_when_either_side_commits() {
    let eng = both_sides_moved();
    let forward = eng.vc.create_review(&path("MAIN"), &path("MAIN/A")).unwrap();
    let backward = eng.vc.create_review(&path("MAIN/A"), &path("MAIN")).unwrap();
    assert_eq!(eng.vc.get_review(forward.id).unwrap().status, ReviewStatus::Current);

    eng.at(120).write("MAIN/A", "V", "later");
    assert_eq!(eng.vc.get_review(forward.id).unwrap().status, ReviewStatus::Stale);
    assert_eq!(eng.vc.get_review(backward.id).unwrap().status, ReviewStatus::Stale);

    let fresh = eng.vc.create_review(&path("MAIN"), &path("MAIN/A")).unwrap();
    assert_ne!(fresh.id, forward.id);
    eng.at(130).write("MAIN", "V", "parent");
    assert_eq!(eng.vc.get_review(fresh.id).unwrap().status, ReviewStatus::Stale);
}

#[test]
fn unchanged_branches_reuse_the_review() {
    let eng = both_sides_moved();
    let first = eng.vc.create_review(&path("MAIN"), &path("MAIN/A")).unwrap();
    let second = eng.vc.create_review(&path("MAIN"), &path("MAIN/A")).unwrap();
    assert_eq!(first.id, second.id);
}

#[test]
fn review_rejects_non_adjacent_branches() {
    let eng = setup_engine(100);
    eng.branch("MAIN/A");
    eng.branch("MAIN/A/B");
    eng.branch("MAIN/C");
    for (source, target) in [("MAIN", "MAIN/A/B"), ("MAIN/A", "MAIN/C"), ("MAIN", "MAIN")] {
        let err = eng.vc.create_review(&path(source), &path(target)).unwrap_err();
        assert!(matches!(err, VcError::NotParentChild { .. }), "{source} -> {target}");
    }
}

#[test]
fn unknown_review_is_reported() {
    let eng = setup_engine(100);
    let err = eng.vc.get_review(bvc_model::ReviewId::new()).unwrap_err();
    assert!(matches!(err, VcError::ReviewNotFound(_)));
}

#[test]
fn cancelled_review_fails_and_is_recomputed() {
    let eng = both_sides_moved();
    let token = CancellationToken::new();
    token.cancel();

    let failed = eng
        .vc
        .create_review_cancellable(&path("MAIN"), &path("MAIN/A"), &token)
        .unwrap();
    assert_eq!(failed.status, ReviewStatus::Failed);
    assert_eq!(failed.message.as_deref(), Some("cancelled"));
    assert!(failed.changes.is_none());
    assert_eq!(eng.vc.get_review(failed.id).unwrap().status, ReviewStatus::Failed);

    let retried = eng.vc.create_review(&path("MAIN"), &path("MAIN/A")).unwrap();
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.status, ReviewStatus::Current);
}

#[tokio::test]
async fn spawned_review_completes_in_background() {
    let eng = both_sides_moved();
    let pending = eng
        .vc
        .spawn_review(&path("MAIN"), &path("MAIN/A"), CancellationToken::new())
        .unwrap();
    assert_eq!(pending.review.status, ReviewStatus::Pending);
    assert!(!pending.is_ready());
    let id = pending.review.id;

    let review = pending.wait().await.unwrap();
    assert_eq!(review.id, id);
    assert_eq!(review.status, ReviewStatus::Current);
    assert_eq!(review.changes.unwrap().changed, ids(&["X"]));

    // computed review is reused without spawning
    let again = eng
        .vc
        .spawn_review(&path("MAIN"), &path("MAIN/A"), CancellationToken::new())
        .unwrap();
    assert!(again.is_ready());
    assert_eq!(again.wait().await.unwrap().id, id);
}

#[tokio::test]
async fn spawned_review_honours_cancellation() {
    let eng = both_sides_moved();
    let token = CancellationToken::new();
    token.cancel();
    let pending = eng
        .vc
        .spawn_review(&path("MAIN/A"), &path("MAIN"), token)
        .unwrap();
    let review = pending.wait().await.unwrap();
    assert_eq!(review.status, ReviewStatus::Failed);
    assert_eq!(review.message.as_deref(), Some("cancelled"));
}

#[test]
fn spawn_outside_runtime_is_an_error() {
    let eng = both_sides_moved();
    let err = eng
        .vc
        .spawn_review(&path("MAIN"), &path("MAIN/A"), CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, VcError::TaskFailed(_)));
}
