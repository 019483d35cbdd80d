use logsift_types::{Record, SeverityCounts};

use crate::merged::{MergedSet, Snapshot};

/// Turns the merged records into a published-ready snapshot: stable sort by
/// timestamp, ids `1..=N`, per-severity totals.
#[derive(Clone, Copy, Debug, Default)]
pub struct PostProcessor;

impl PostProcessor {
    /// Sort, number and count `records`.
    ///
    /// Equal timestamps keep their input order, so running this twice over
    /// the same input yields the same ids.
    pub fn process(revision: u64, mut records: Vec<Record>) -> Snapshot {
        records.sort_by_key(|r| r.timestamp);

        let mut counts = SeverityCounts::default();
        for (index, record) in records.iter_mut().enumerate() {
            record.id = Some(index as u64 + 1);
            counts.increment(record.severity);
        }

        Snapshot::new(revision, records, counts)
    }

    /// Copy the merged set out and process the copy without holding its lock
    pub fn run(merged: &MergedSet) -> Snapshot {
        let (revision, records) = merged.collect();
        Self::process(revision, records)
    }
}
