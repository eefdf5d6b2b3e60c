//! Duplicate classification over shared source files.

use std::collections::BTreeSet;

use crate::job_id::JobId;
use crate::mapper::{FileMapping, SourceEntry};

/// Jobs sorted into the classification sets after the mapping phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    /// Jobs superseded by a later job on at least one shared source.
    pub confirmed: BTreeSet<JobId>,
    /// Jobs with no file evidence at all.
    pub unconfirmed: BTreeSet<JobId>,
    /// Jobs whose evidence fetch failed; a subset of `unconfirmed`.
    pub fetch_failed: BTreeSet<JobId>,
}

impl ClassificationResult {
    /// Whether there is nothing left to confirm or report.
    pub fn is_clean(&self) -> bool {
        self.confirmed.is_empty() && self.unconfirmed.is_empty()
    }
}

/// Jobs that lose to another job on one source.
///
/// The entry with the latest completion time is kept. Among entries tied on
/// time, the lexicographically smallest job id is kept.
pub fn superseded(entries: &[SourceEntry]) -> Vec<&JobId> {
    let mut ranked: Vec<&SourceEntry> = entries.iter().collect();
    ranked.sort_by(|a, b| {
        b.completed_at
            .cmp(&a.completed_at)
            .then_with(|| a.job.cmp(&b.job))
    });
    ranked.into_iter().skip(1).map(|entry| &entry.job).collect()
}

/// Classifies the jobs of a finished mapping.
pub fn classify(mapping: FileMapping) -> ClassificationResult {
    let mut confirmed = BTreeSet::new();
    for (_, entries) in mapping.index.shared_sources() {
        confirmed.extend(superseded(entries).into_iter().cloned());
    }
    ClassificationResult {
        confirmed,
        unconfirmed: mapping.unconfirmed,
        fetch_failed: mapping.fetch_failed,
    }
}
