//! Inversion of per-job file records into a source-file index.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::dispatch::{dispatch, Concurrency};
use crate::index::{fetch_job_files, RecordIndex};
use crate::job_id::JobId;
use crate::records::{CompletionTime, FileRecord};
use crate::retry::{Deadline, Outcome, RetryPolicy};

/// One job's claim on a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Job that consumed the file.
    pub job: JobId,
    /// When that job finished.
    pub completed_at: CompletionTime,
}

/// Source location → jobs that consumed it.
///
/// A job listed twice for the same source keeps a single entry with its
/// latest completion time, so entry count equals distinct job count.
#[derive(Debug, Clone, Default)]
pub struct SourceFileIndex {
    sources: HashMap<String, Vec<SourceEntry>>,
}

impl SourceFileIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `job` consumed `location`, finishing at `completed_at`.
    pub fn insert(&mut self, location: &str, job: &JobId, completed_at: CompletionTime) {
        let entries = self.sources.entry(location.to_string()).or_default();
        match entries.iter_mut().find(|entry| &entry.job == job) {
            Some(existing) => existing.completed_at = existing.completed_at.max(completed_at),
            None => entries.push(SourceEntry {
                job: job.clone(),
                completed_at,
            }),
        }
    }

    /// Jobs recorded for `location`.
    pub fn get(&self, location: &str) -> Option<&[SourceEntry]> {
        self.sources.get(location).map(Vec::as_slice)
    }

    /// Number of distinct source locations.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no sources were recorded.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources consumed by more than one job.
    pub fn shared_sources(&self) -> impl Iterator<Item = (&str, &[SourceEntry])> {
        self.sources
            .iter()
            .filter(|(_, entries)| entries.len() > 1)
            .map(|(location, entries)| (location.as_str(), entries.as_slice()))
    }
}

/// Output of the mapping phase.
#[derive(Debug, Clone, Default)]
pub struct FileMapping {
    /// Inverted source index.
    pub index: SourceFileIndex,
    /// Jobs without any file record.
    pub unconfirmed: BTreeSet<JobId>,
    /// Jobs whose fetch exhausted its retries; a subset of `unconfirmed`.
    pub fetch_failed: BTreeSet<JobId>,
    /// File records folded into the index.
    pub records: usize,
}

impl FileMapping {
    /// Folds per-job fetch outcomes, in any order, into a mapping.
    ///
    /// An exhausted fetch is indistinguishable from "no records" for
    /// classification purposes; it is tracked separately for reporting.
    pub fn from_outcomes(outcomes: Vec<(JobId, Outcome<Vec<FileRecord>>)>) -> Self {
        let mut mapping = Self::default();
        for (job, outcome) in outcomes {
            match outcome {
                Outcome::Success(records) if !records.is_empty() => {
                    for record in &records {
                        mapping.index.insert(&record.location, &job, record.completed_at);
                    }
                    mapping.records += records.len();
                }
                Outcome::Success(_) => {
                    debug!("job {job} has no file records");
                    mapping.unconfirmed.insert(job);
                }
                Outcome::Exhausted {
                    attempts,
                    last_error,
                } => {
                    debug!("job {job} file fetch gave up after {attempts} attempt(s): {last_error}");
                    mapping.fetch_failed.insert(job.clone());
                    mapping.unconfirmed.insert(job);
                }
            }
        }
        mapping
    }
}

/// Fetches file records for every job and inverts them by source location.
pub async fn map_files<I>(
    index: &I,
    jobs: &BTreeSet<JobId>,
    concurrency: Concurrency,
    policy: &RetryPolicy,
    deadline: Deadline,
) -> FileMapping
where
    I: RecordIndex + ?Sized,
{
    info!(
        "fetching ingest file records for {} job(s) with up to {} concurrent lookups",
        jobs.len(),
        concurrency.get()
    );
    let outcomes = dispatch(
        jobs.iter().cloned(),
        concurrency,
        "ingest file records",
        move |job| async move { fetch_job_files(index, &job, policy, deadline).await },
    )
    .await;
    let mapping = FileMapping::from_outcomes(outcomes);
    info!(
        "mapped {} file record(s) onto {} source file(s); {} job(s) without records, {} failed fetch(es)",
        mapping.records,
        mapping.index.len(),
        mapping.unconfirmed.len(),
        mapping.fetch_failed.len()
    );
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> CompletionTime {
        CompletionTime::from_epoch_secs(secs).unwrap()
    }

    fn record(job: &str, location: &str, secs: i64) -> FileRecord {
        FileRecord::new(JobId::new(job), location, at(secs))
    }

    #[test]
    fn repeated_job_keeps_latest_time() {
        let mut index = SourceFileIndex::new();
        let job = JobId::new("a");
        index.insert("f1", &job, at(5));
        index.insert("f1", &job, at(9));
        index.insert("f1", &job, at(2));
        assert_eq!(
            index.get("f1").unwrap(),
            &[SourceEntry {
                job,
                completed_at: at(9)
            }]
        );
        assert_eq!(index.shared_sources().count(), 0);
    }

    #[test]
    fn outcomes_split_into_index_and_unconfirmed() {
        let outcomes = vec![
            (
                JobId::new("a"),
                Outcome::Success(vec![record("a", "f1", 10), record("a", "f2", 10)]),
            ),
            (JobId::new("b"), Outcome::Success(vec![record("b", "f1", 5)])),
            (JobId::new("c"), Outcome::Success(Vec::new())),
            (
                JobId::new("d"),
                Outcome::Exhausted {
                    attempts: 3,
                    last_error: "timeout".to_string(),
                },
            ),
        ];
        let mapping = FileMapping::from_outcomes(outcomes);

        assert_eq!(mapping.records, 3);
        assert_eq!(mapping.index.len(), 2);
        assert_eq!(mapping.index.get("f1").unwrap().len(), 2);
        assert_eq!(
            mapping.unconfirmed,
            BTreeSet::from([JobId::new("c"), JobId::new("d")])
        );
        assert_eq!(mapping.fetch_failed, BTreeSet::from([JobId::new("d")]));
        let shared: Vec<&str> = mapping.index.shared_sources().map(|(src, _)| src).collect();
        assert_eq!(shared, vec!["f1"]);
    }
}
