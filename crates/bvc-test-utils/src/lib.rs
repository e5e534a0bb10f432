//! Testing utilities for the BVC workspace
//!
//! Engine fixtures on a manual clock, a record store that fails on demand
//! and helpers for one-record commits.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bvc_engine::{EngineConfig, VcResult, VersionControl, View};
use bvc_model::{
    BranchPath, BusinessId, CommitType, FieldMap, ManualClock, Timepoint, VersionId,
    VersionedRecord,
};
use bvc_store::{MemoryRecordStore, RecordStore, RollbackSummary, StoreError};

/// Record store whose writes can be switched to fail
#[derive(Debug, Default)]
pub struct FailingRecordStore {
    inner: MemoryRecordStore<FieldMap>,
    fail_inserts: AtomicBool,
    fail_ends: AtomicBool,
}

impl FailingRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `insert` until reset
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Fail every `end` until reset; inserts of the same commit still land
    pub fn fail_ends(&self, fail: bool) {
        self.fail_ends.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl RecordStore<FieldMap> for FailingRecordStore {
    fn insert(&self, versions: Vec<VersionedRecord<FieldMap>>) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert disabled".into()));
        }
        self.inner.insert(versions)
    }

    fn end(&self, ids: &[VersionId], at: Timepoint) -> Result<(), StoreError> {
        if self.fail_ends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("end disabled".into()));
        }
        self.inner.end(ids, at)
    }

    fn get(&self, id: VersionId) -> Result<Option<VersionedRecord<FieldMap>>, StoreError> {
        self.inner.get(id)
    }

    fn on_branch(&self, path: &BranchPath) -> Result<Vec<VersionedRecord<FieldMap>>, StoreError> {
        self.inner.on_branch(path)
    }

    fn rollback(&self, path: &BranchPath, at: Timepoint) -> Result<RollbackSummary, StoreError> {
        self.inner.rollback(path, at)
    }
}

/// Engine over memory stores with `MAIN` bootstrapped
pub struct TestEngine {
    pub vc: VersionControl<FieldMap>,
    pub clock: Arc<ManualClock>,
    pub records: Arc<FailingRecordStore>,
}

impl TestEngine {
    /// Move the clock to `ms`
    pub fn at(&self, ms: u64) -> &Self {
        self.clock.set(ms);
        self
    }

    /// Commit one write of `term` to `id` on `branch`
    pub fn write(&self, branch: &str, id: &str, term: &str) -> Timepoint {
        write_one(&self.vc, &path(branch), id, concept(term)).unwrap()
    }

    /// Commit one delete of `id` on `branch`
    pub fn delete(&self, branch: &str, id: &str) -> Timepoint {
        let mut commit = self
            .vc
            .open_commit(&path(branch), CommitType::Content, None)
            .unwrap();
        assert!(commit.delete(&BusinessId::new(id)).unwrap(), "{id} not visible on {branch}");
        commit.complete().unwrap()
    }

    /// Create a branch at the current clock
    pub fn branch(&self, branch: &str) {
        self.vc.create_branch(&path(branch)).unwrap();
    }

    /// Term visible for `id` on `branch` at its head
    pub fn term(&self, branch: &str, id: &str) -> Option<String> {
        term_of(&self.vc.resolve_head(&path(branch)).unwrap(), id)
    }

    /// Version visible for `id` on `branch` at its head
    pub fn version(&self, branch: &str, id: &str) -> Option<VersionedRecord<FieldMap>> {
        self.vc
            .resolve_head(&path(branch))
            .unwrap()
            .remove(&BusinessId::new(id))
    }
}

/// Engine with default config, `MAIN` created at `start`
pub fn setup_engine(start: u64) -> TestEngine {
    setup_engine_with(EngineConfig::default(), start)
}

/// Engine with `config`, root created at `start`
pub fn setup_engine_with(config: EngineConfig, start: u64) -> TestEngine {
    let clock = Arc::new(ManualClock::new(start));
    let records = Arc::new(FailingRecordStore::new());
    let vc = VersionControl::builder()
        .with_config(config)
        .with_clock(clock.clone())
        .with_record_store(records.clone())
        .build()
        .unwrap();
    vc.bootstrap().unwrap();
    TestEngine { vc, clock, records }
}

pub fn path(s: &str) -> BranchPath {
    s.parse().unwrap()
}

/// Content with a `term` and an `active` flag
pub fn concept(term: &str) -> FieldMap {
    FieldMap::new().with("term", term).with("active", true)
}

/// Open, write one record and complete
pub fn write_one(
    vc: &VersionControl<FieldMap>,
    branch: &BranchPath,
    id: &str,
    content: FieldMap,
) -> VcResult<Timepoint> {
    let mut commit = vc.open_commit(branch, CommitType::Content, None)?;
    commit.write(BusinessId::new(id), content)?;
    vc.complete_commit(commit)
}

pub fn term_of(view: &View<FieldMap>, id: &str) -> Option<String> {
    view.get(&BusinessId::new(id))
        .and_then(|v| v.content.get_str("term"))
        .map(str::to_string)
}
