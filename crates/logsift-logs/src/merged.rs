use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use logsift_types::{Record, SeverityCounts, SourceId};

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable result of one post-processing pass.
///
/// Records are sorted by timestamp and numbered `1..=len`, so `id` doubles
/// as a 1-based position.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Revision of the merged set this snapshot was built from
    revision: u64,

    records: Vec<Record>,

    /// Totals over every record, before any view filtering
    counts: SeverityCounts,
}

impl Snapshot {
    pub(crate) fn new(revision: u64, records: Vec<Record>, counts: SeverityCounts) -> Self {
        Self {
            revision,
            records,
            counts,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn counts(&self) -> SeverityCounts {
        self.counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by the id assigned in this snapshot
    pub fn get(&self, id: u64) -> Option<&Record> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

// ============================================================================
// Merged Set
// ============================================================================

/// How a finished batch joins the merged set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Drop every other source's records first
    Replace,
    /// Keep other sources; replace only this source's batch
    Union,
}

#[derive(Debug, Default)]
struct Batches {
    by_source: BTreeMap<SourceId, Vec<Record>>,

    /// Bumped on every mutation
    revision: u64,
}

/// Records of every loaded source, keyed by source, plus the last
/// published snapshot.
#[derive(Debug, Default)]
pub struct MergedSet {
    batches: Mutex<Batches>,
    published: RwLock<Arc<Snapshot>>,
}

impl MergedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch unless `token` was cancelled.
    ///
    /// Cancellation is checked while the merge lock is held, so a load that
    /// is cancelled before it reaches this point never lands.
    pub fn merge(
        &self,
        source: SourceId,
        records: Vec<Record>,
        mode: MergeMode,
        token: &CancellationToken,
    ) -> bool {
        let mut batches = self.batches.lock();
        if token.is_cancelled() {
            return false;
        }
        if mode == MergeMode::Replace {
            batches.by_source.clear();
        }
        batches.by_source.insert(source, records);
        batches.revision += 1;
        true
    }

    /// Drop one source's batch; returns whether anything was removed
    pub fn remove(&self, source: &SourceId) -> bool {
        let mut batches = self.batches.lock();
        let removed = batches.by_source.remove(source).is_some();
        if removed {
            batches.revision += 1;
        }
        removed
    }

    /// Drop every batch and publish an empty snapshot
    pub fn clear(&self) {
        let revision = {
            let mut batches = self.batches.lock();
            batches.by_source.clear();
            batches.revision += 1;
            batches.revision
        };
        self.publish(Snapshot::new(revision, Vec::new(), SeverityCounts::default()), |_| {});
    }

    /// Copy every batch out under the lock, together with the revision the
    /// copy corresponds to
    pub fn collect(&self) -> (u64, Vec<Record>) {
        let batches = self.batches.lock();
        let total = batches.by_source.values().map(Vec::len).sum();
        let mut records = Vec::with_capacity(total);
        for batch in batches.by_source.values() {
            records.extend(batch.iter().cloned());
        }
        (batches.revision, records)
    }

    /// Install `snapshot` if it is newer than the published one.
    ///
    /// `on_publish` runs while the publish lock is held so observers see
    /// snapshots in revision order. Returns whether the snapshot was installed.
    pub fn publish<F>(&self, snapshot: Snapshot, on_publish: F) -> bool
    where
        F: FnOnce(&Arc<Snapshot>),
    {
        let mut published = self.published.write();
        if snapshot.revision <= published.revision {
            return false;
        }
        *published = Arc::new(snapshot);
        on_publish(&published);
        true
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.published.read().clone()
    }

    pub fn revision(&self) -> u64 {
        self.batches.lock().revision
    }

    /// Sources that currently hold a batch, in key order
    pub fn sources(&self) -> Vec<SourceId> {
        self.batches.lock().by_source.keys().cloned().collect()
    }

    /// Records held across all batches, published or not
    pub fn record_count(&self) -> usize {
        self.batches.lock().by_source.values().map(Vec::len).sum()
    }
}
