//! Commit atomicity, write failures and lock contention

use std::sync::{Arc, Barrier};

use bvc_engine::{VcError, WriteOutcome};
use bvc_model::{BusinessId, CommitType, Timepoint, VersionedRecord};
use bvc_store::{RecordStore, StoreError};
use bvc_test_utils::{concept, path, setup_engine, TestEngine};
use pretty_assertions::assert_eq;

fn tp(ms: u64) -> Timepoint {
    Timepoint::from_millis(ms)
}

#[test]
fn multi_record_commit_appears_at_once() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    eng.at(110);
    let mut commit = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    for id in ["X", "Y", "Z"] {
        assert_eq!(commit.write(BusinessId::new(id), concept(id)).unwrap(), WriteOutcome::Staged);
    }
    assert!(eng.vc.resolve_head(&main).unwrap().is_empty());

    let at = commit.complete().unwrap();
    assert_eq!(at, tp(110));
    assert!(eng.vc.resolve(&main, tp(109)).unwrap().is_empty());
    assert_eq!(eng.vc.resolve(&main, tp(110)).unwrap().len(), 3);
}

#[test]
fn failed_insert_leaves_branch_untouched() {
    let eng = setup_engine(100);
    eng.at(110).write("MAIN", "X", "one");
    let before = eng.vc.find_branch(&path("MAIN")).unwrap().unwrap();
    let stored = eng.records.len();

    eng.records.fail_inserts(true);
    eng.at(120);
    let err = bvc_test_utils::write_one(&eng.vc, &path("MAIN"), "Y", concept("two")).unwrap_err();
    match &err {
        VcError::WriteFailed { path, timepoint, .. } => {
            assert_eq!(path.as_str(), "MAIN");
            assert_eq!(*timepoint, tp(120));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(std::error::Error::source(&err).is_some());

    let after = eng.vc.find_branch(&path("MAIN")).unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(eng.records.len(), stored);

    eng.records.fail_inserts(false);
    eng.at(121).write("MAIN", "Y", "two");
    assert_eq!(eng.term("MAIN", "Y").as_deref(), Some("two"));
}

#[test]
fn failed_end_purges_inserted_versions() {
    let eng = setup_engine(100);
    eng.at(110).write("MAIN", "X", "one");
    let original = eng.version("MAIN", "X").unwrap();
    let stored = eng.records.len();

    eng.records.fail_ends(true);
    eng.at(120);
    let err = bvc_test_utils::write_one(&eng.vc, &path("MAIN"), "X", concept("two")).unwrap_err();
    assert!(matches!(err, VcError::WriteFailed { .. }));
    eng.records.fail_ends(false);

    assert_eq!(eng.records.len(), stored);
    let branch = eng.vc.find_branch(&path("MAIN")).unwrap().unwrap();
    assert_eq!(branch.head, tp(110));
    assert!(!branch.is_locked());
    assert_eq!(eng.version("MAIN", "X").unwrap(), original);
}

#[test]
fn concurrent_opens_admit_one_writer() {
    const WRITERS: usize = 8;
    let eng = setup_engine(100);
    eng.at(110);
    let barrier = Arc::new(Barrier::new(WRITERS));

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let vc = &eng.vc;
                s.spawn(move || {
                    let opened = vc.open_commit(&path("MAIN"), CommitType::Content, None);
                    // hold every successful commit open until all have tried
                    barrier.wait();
                    opened.and_then(|mut commit| {
                        commit.write(BusinessId::new(format!("E{i}")), concept("x"))?;
                        commit.complete()
                    })
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, VcError::BranchLocked { .. })));

    let main = eng.vc.find_branch(&path("MAIN")).unwrap().unwrap();
    assert_eq!(main.head, tp(110));
    assert!(!main.is_locked());
    assert_eq!(eng.vc.resolve_head(&path("MAIN")).unwrap().len(), 1);
}

#[test]
fn forced_unlock_fails_the_stale_writer() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    eng.at(110);
    let mut commit = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    commit.write(BusinessId::new("X"), concept("one")).unwrap();

    let held = eng.vc.unlock(&main).unwrap().unwrap();
    assert_eq!(held.timepoint, tp(110));
    assert!(eng.vc.unlock(&main).unwrap().is_none());

    let err = commit.complete().unwrap_err();
    assert!(matches!(err, VcError::LockLost { .. }));
    assert_eq!(eng.vc.find_branch(&main).unwrap().unwrap().head, tp(100));
    assert!(eng.records.is_empty());

    eng.at(111).write("MAIN", "X", "two");
    assert_eq!(eng.term("MAIN", "X").as_deref(), Some("two"));
}

fn visible_ids(eng: &TestEngine, branch: &str) -> Vec<String> {
    eng.vc
        .resolve_head(&path(branch))
        .unwrap()
        .keys()
        .map(|id| id.as_str().to_string())
        .collect()
}

#[test]
fn unlocked_writer_cannot_complete_after_successor_opens() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    // clock stands still, so the successor would otherwise reuse 101
    let mut stale = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    stale.write(BusinessId::new("X"), concept("stale")).unwrap();
    assert_eq!(stale.timepoint(), tp(101));
    eng.vc.unlock(&main).unwrap();

    let mut next = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    assert_eq!(next.timepoint(), tp(102));
    next.write(BusinessId::new("Y"), concept("fresh")).unwrap();

    assert!(matches!(stale.complete(), Err(VcError::LockLost { .. })));
    assert_eq!(next.complete().unwrap(), tp(102));
    assert_eq!(visible_ids(&eng, "MAIN"), vec!["Y"]);
    assert_eq!(eng.vc.find_branch(&main).unwrap().unwrap().head, tp(102));
}

#[test]
fn unlocked_writer_failing_late_keeps_successor_writes() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    let mut stale = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    stale.write(BusinessId::new("X"), concept("stale")).unwrap();
    eng.vc.unlock(&main).unwrap();

    let mut next = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    next.write(BusinessId::new("Y"), concept("fresh")).unwrap();
    next.complete().unwrap();

    assert!(matches!(stale.complete(), Err(VcError::LockLost { .. })));
    assert_eq!(visible_ids(&eng, "MAIN"), vec!["Y"]);
    assert_eq!(eng.term("MAIN", "Y").as_deref(), Some("fresh"));
}

#[test]
fn unlock_discards_partial_commit_of_crashed_writer() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    eng.at(105).write("MAIN", "X", "one");
    let x1 = eng.version("MAIN", "X").unwrap();

    eng.at(110);
    let commit = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    // the writer got as far as inserting and ending, then vanished
    let orphan = VersionedRecord::new(BusinessId::new("ORPHAN"), main.clone(), tp(110), concept("lost"));
    eng.records.insert(vec![orphan.clone()]).unwrap();
    eng.records.end(&[x1.version_id], tp(110)).unwrap();
    std::mem::forget(commit);

    let held = eng.vc.unlock(&main).unwrap().unwrap();
    assert_eq!(held.timepoint, tp(110));
    assert!(eng.records.get(orphan.version_id).unwrap().is_none());
    assert!(eng.records.get(x1.version_id).unwrap().unwrap().is_current());

    eng.at(120).write("MAIN", "Y", "two");
    assert_eq!(visible_ids(&eng, "MAIN"), vec!["X", "Y"]);
    assert_eq!(eng.version("MAIN", "X").unwrap(), x1);
}

#[test]
fn rollback_of_latest_commit_restores_previous_view() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    eng.at(110).write("MAIN", "X", "one");
    let x1 = eng.version("MAIN", "X").unwrap();
    let stored = eng.records.len();
    let undone = eng.at(120).write("MAIN", "X", "two");

    let report = eng.vc.rollback_completed_commit(&main, undone).unwrap();
    assert_eq!(report.timepoint, tp(120));
    assert_eq!(report.head, tp(110));
    assert_eq!((report.removed, report.reopened), (1, 1));
    assert!(report.stale_children.is_empty());

    let branch = eng.vc.find_branch(&main).unwrap().unwrap();
    assert_eq!(branch.head, tp(110));
    assert!(!branch.is_locked());
    assert_eq!(eng.records.len(), stored);
    assert_eq!(eng.version("MAIN", "X").unwrap(), x1);
    let later = eng.vc.resolve_records(&main, tp(125)).unwrap();
    assert_eq!(bvc_test_utils::term_of(&later, "X").as_deref(), Some("one"));
    let spans = eng.vc.timespans(&main).unwrap();
    assert_eq!(spans.last().map(|s| (s.start, s.end)), Some((tp(110), None)));

    // the removed timepoint is never reused
    assert_eq!(eng.at(115).write("MAIN", "Y", "new"), tp(121));
}

#[test]
fn rollback_reports_children_based_on_the_commit() {
    let eng = setup_engine(100);
    let at = eng.at(110).write("MAIN", "X", "one");
    eng.at(115).branch("MAIN/A");

    let report = eng.vc.rollback_completed_commit(&path("MAIN"), at).unwrap();
    assert_eq!(report.stale_children, vec![path("MAIN/A")]);
    assert_eq!(
        eng.vc.sync_state(&path("MAIN/A")).unwrap(),
        bvc_model::SyncState::Behind
    );
}

#[test]
fn rollback_only_applies_to_the_latest_unlocked_commit() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    let first = eng.at(110).write("MAIN", "X", "one");
    eng.at(120).write("MAIN", "X", "two");

    let err = eng.vc.rollback_completed_commit(&main, first).unwrap_err();
    assert!(matches!(err, VcError::NotLatestCommit { head, .. } if head == tp(120)));

    let open = eng.vc.open_commit(&main, CommitType::Content, None).unwrap();
    let err = eng.vc.rollback_completed_commit(&main, tp(120)).unwrap_err();
    assert!(matches!(err, VcError::BranchLocked { .. }));
    drop(open);
    assert_eq!(eng.term("MAIN", "X").as_deref(), Some("two"));
}

#[test]
fn branch_creation_cannot_be_rolled_back() {
    let eng = setup_engine(100);
    let main = path("MAIN");
    let err = eng.vc.rollback_completed_commit(&main, tp(100)).unwrap_err();
    assert!(matches!(err, VcError::Store(StoreError::NoEarlierTimespan { .. })));
    assert!(!eng.vc.find_branch(&main).unwrap().unwrap().is_locked());
}

#[test]
fn clock_behind_head_still_moves_forward() {
    let eng = setup_engine(100);
    eng.at(200).write("MAIN", "X", "one");
    let at = eng.at(50).write("MAIN", "X", "two");
    assert_eq!(at, tp(201));
    assert_eq!(eng.vc.find_branch(&path("MAIN")).unwrap().unwrap().head, tp(201));
}

#[test]
fn rewrite_keeps_history_readable() {
    let eng = setup_engine(100);
    eng.at(110).write("MAIN", "X", "one");
    eng.at(120).write("MAIN", "X", "two");

    let then = eng.vc.resolve_records(&path("MAIN"), tp(115)).unwrap();
    assert_eq!(bvc_test_utils::term_of(&then, "X").as_deref(), Some("one"));
    assert_eq!(eng.term("MAIN", "X").as_deref(), Some("two"));

    let spans = eng.vc.timespans(&path("MAIN")).unwrap();
    assert_eq!(spans.len(), 3);
    let last = spans.last().unwrap();
    assert_eq!((last.start, last.end), (tp(120), None));
    assert!(spans.windows(2).all(|w| w[0].end == Some(w[1].start)));
}

#[test]
fn unchanged_write_completes_without_content() {
    let eng = setup_engine(100);
    eng.branch("MAIN/A");
    eng.at(110).write("MAIN/A", "X", "one");
    let stored = eng.records.len();

    eng.at(120);
    let mut commit = eng
        .vc
        .open_commit(&path("MAIN/A"), CommitType::Content, None)
        .unwrap();
    assert_eq!(
        commit.write(BusinessId::new("X"), concept("one")).unwrap(),
        WriteOutcome::Unchanged
    );
    assert!(!commit.has_changes());
    commit.complete().unwrap();
    assert_eq!(eng.records.len(), stored);
}

#[test]
fn content_commit_marks_child_as_forward() {
    let eng = setup_engine(100);
    eng.branch("MAIN/A");
    let child = eng.vc.find_branch(&path("MAIN/A")).unwrap().unwrap();
    assert!(!child.contains_content);
    eng.at(110).write("MAIN/A", "X", "one");
    assert!(eng.vc.find_branch(&path("MAIN/A")).unwrap().unwrap().contains_content);
    assert_eq!(
        eng.vc.sync_state(&path("MAIN/A")).unwrap(),
        bvc_model::SyncState::Forward
    );
}

#[test]
fn unknown_branch_is_rejected() {
    let eng = setup_engine(100);
    let err = eng
        .vc
        .open_commit(&path("MAIN/NOPE"), CommitType::Content, None)
        .unwrap_err();
    assert!(matches!(err, VcError::BranchNotFound { .. }));
    assert!(matches!(
        eng.vc.create_branch(&path("MAIN/X/Y")),
        Err(VcError::BranchNotFound { .. })
    ));
    eng.branch("MAIN/A");
    assert!(matches!(
        eng.vc.create_branch(&path("MAIN/A")),
        Err(VcError::BranchExists { .. })
    ));
}
