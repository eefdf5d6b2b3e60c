//! Job enumeration from the stats collection.

use std::collections::{BTreeSet, HashMap};

use rand::Rng;

use crate::index::{IndexError, RecordIndex};
use crate::job_id::JobId;
use crate::records::StatsRecord;

/// Chance that a later stats record replaces the one already kept for its job.
///
/// Keeps the retained sample from always being the first document the scan
/// returns. It is an approximate spread, not a uniform reservoir sample.
pub const REPLACEMENT_PROBABILITY: f64 = 0.25;

/// Scan counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationCounts {
    /// Documents seen.
    pub scanned: u64,
    /// Documents outside the configured prefix.
    pub skipped: u64,
    /// Documents that contributed a job id.
    pub added: u64,
}

/// Job ids found under the prefix plus one stats record kept per job.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    /// Distinct job ids.
    pub jobs: BTreeSet<JobId>,
    /// One retained stats record per job.
    pub stats: HashMap<JobId, StatsRecord>,
    /// Scan counters.
    pub counts: EnumerationCounts,
}

impl Enumeration {
    /// Folds one stats document into the enumeration.
    pub fn observe<R>(&mut self, record: StatsRecord, prefix: &str, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        self.counts.scanned += 1;
        if !record.location.starts_with(prefix) {
            self.counts.skipped += 1;
            return;
        }
        let job = record.job_id();
        self.counts.added += 1;
        self.jobs.insert(job.clone());
        if !self.stats.contains_key(&job) || rng.gen_bool(REPLACEMENT_PROBABILITY) {
            self.stats.insert(job, record);
        }
    }
}

/// Scans the stats collection once and enumerates the jobs under `prefix`.
pub async fn enumerate_jobs<I, R>(
    index: &I,
    prefix: &str,
    rng: &mut R,
) -> Result<Enumeration, IndexError>
where
    I: RecordIndex + ?Sized,
    R: Rng + Send,
{
    let mut enumeration = Enumeration::default();
    index
        .scan_stats(&mut |record| enumeration.observe(record, prefix, rng))
        .await?;
    Ok(enumeration)
}
