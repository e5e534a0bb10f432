//! Property tests over random operation sequences on a small branch tree

use bvc_engine::VcError;
use bvc_model::{BranchPath, BusinessId, Clock, CommitType, Timepoint};
use bvc_test_utils::{concept, path, setup_engine, TestEngine};
use proptest::prelude::*;

const BRANCHES: [&str; 4] = ["MAIN", "MAIN/A", "MAIN/A/B", "MAIN/C"];
const CHILDREN: [&str; 3] = ["MAIN/A", "MAIN/A/B", "MAIN/C"];
const IDS: [&str; 4] = ["X", "Y", "Z", "W"];
const TERMS: [&str; 3] = ["one", "two", "three"];

#[derive(Debug, Clone)]
enum Op {
    Write { branch: usize, id: usize, term: usize },
    Delete { branch: usize, id: usize },
    Rebase { child: usize },
    Publish { child: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..BRANCHES.len(), 0..IDS.len(), 0..TERMS.len())
            .prop_map(|(branch, id, term)| Op::Write { branch, id, term }),
        2 => (0..BRANCHES.len(), 0..IDS.len()).prop_map(|(branch, id)| Op::Delete { branch, id }),
        2 => (0..CHILDREN.len()).prop_map(|child| Op::Rebase { child }),
        2 => (0..CHILDREN.len()).prop_map(|child| Op::Publish { child }),
    ]
}

fn tree() -> TestEngine {
    let eng = setup_engine(1_000);
    for branch in CHILDREN {
        eng.branch(branch);
    }
    eng
}

fn apply(eng: &TestEngine, op: &Op) -> Result<(), VcError> {
    eng.clock.advance(5);
    match *op {
        Op::Write { branch, id, term } => {
            bvc_test_utils::write_one(&eng.vc, &path(BRANCHES[branch]), IDS[id], concept(TERMS[term]))?;
        }
        Op::Delete { branch, id } => {
            let mut commit = eng
                .vc
                .open_commit(&path(BRANCHES[branch]), CommitType::Content, None)?;
            commit.delete(&BusinessId::new(IDS[id]))?;
            commit.complete()?;
        }
        Op::Rebase { child } => {
            eng.vc.rebase(&path(CHILDREN[child]))?;
        }
        Op::Publish { child } => {
            let child = path(CHILDREN[child]);
            eng.vc.rebase(&child)?;
            eng.vc.promote(&child)?;
        }
    }
    Ok(())
}

fn head_of(eng: &TestEngine, branch: &BranchPath) -> Timepoint {
    eng.vc.find_branch(branch).unwrap().unwrap().head
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_view_resolves_without_collisions(ops in prop::collection::vec(op(), 1..40)) {
        let eng = tree();
        for op in &ops {
            prop_assert!(apply(&eng, op).is_ok(), "{op:?} failed");
            for branch in BRANCHES {
                let resolved = eng.vc.resolve_head(&path(branch));
                prop_assert!(resolved.is_ok(), "{branch} after {op:?}: {:?}", resolved.err());
            }
        }

        // history stays readable at every past timepoint
        for record in eng.vc.list_branches().unwrap() {
            let mut at = record.created.as_millis();
            while at <= record.head.as_millis() {
                let resolved = eng.vc.resolve(&record.path, Timepoint::from_millis(at));
                prop_assert!(resolved.is_ok(), "{} at {at}: {:?}", record.path, resolved.err());
                at += 3;
            }
        }
    }

    #[test]
    fn published_child_matches_its_parent(
        ops in prop::collection::vec(op(), 1..30),
        child in 0..CHILDREN.len(),
    ) {
        let eng = tree();
        for op in &ops {
            prop_assert!(apply(&eng, op).is_ok(), "{op:?} failed");
        }
        apply(&eng, &Op::Publish { child }).unwrap();

        let child = path(CHILDREN[child]);
        let parent = child.parent().unwrap();
        let branch = eng.vc.find_branch(&child).unwrap().unwrap();
        prop_assert_eq!(branch.base, head_of(&eng, &parent));
        prop_assert!(branch.tombstones.is_empty());
        prop_assert_eq!(
            eng.vc.resolve(&child, branch.head).unwrap(),
            eng.vc.resolve(&parent, branch.base).unwrap()
        );
    }

    #[test]
    fn fresh_branch_sees_parent_as_of_base(
        ops in prop::collection::vec(op(), 0..30),
        parent in 0..BRANCHES.len(),
    ) {
        let eng = tree();
        for op in &ops {
            prop_assert!(apply(&eng, op).is_ok(), "{op:?} failed");
        }
        eng.clock.advance(5);
        let parent = path(BRANCHES[parent]);
        let fresh = parent.child("FRESH").unwrap();
        let created = eng.vc.create_branch(&fresh).unwrap();
        prop_assert_eq!(created.base, head_of(&eng, &parent));

        eng.clock.advance(100);
        prop_assert_eq!(
            eng.vc.resolve(&fresh, eng.clock.now()).unwrap(),
            eng.vc.resolve(&parent, created.base).unwrap()
        );
    }
}
