//! Conditional branch writes under contention

use std::sync::Arc;
use std::thread;

use bvc_model::{BranchLock, BranchPath, BranchRecord, Timepoint};
use bvc_store::{BranchStore, MemoryBranchStore};

#[test]
fn exactly_one_racer_acquires_the_lock() {
    let store = Arc::new(MemoryBranchStore::new());
    let path: BranchPath = "MAIN".parse().unwrap();
    let seed = store
        .insert(BranchRecord::new(
            path.clone(),
            Timepoint::from_millis(100),
            Timepoint::from_millis(100),
        ))
        .unwrap();

    let handles: Vec<_> = (0..16u64)
        .map(|i| {
            let store = Arc::clone(&store);
            let seed = seed.clone();
            thread::spawn(move || {
                let mut next = seed.value;
                next.lock = Some(BranchLock::maintenance(
                    Timepoint::from_millis(101 + i),
                    format!("racer {i}"),
                ));
                store.compare_and_set(seed.revision, next).is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);

    let current = store.get(&path).unwrap().unwrap();
    assert_eq!(current.revision, seed.revision + 1);
    assert!(current.value.is_locked());
}
