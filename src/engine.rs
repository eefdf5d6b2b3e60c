//! Reconciliation run: enumerate, map, classify, confirm.

use std::time::Instant;

use rand::Rng;
use tracing::info;

use crate::classifier::classify;
use crate::confirm::confirm_all;
use crate::dispatch::Concurrency;
use crate::enumerate::enumerate_jobs;
use crate::index::{IndexError, RecordIndex};
use crate::mapper::map_files;
use crate::points::{PointSource, DEFAULT_ITEMS_PER_PAGE};
use crate::report::Report;
use crate::retry::{Deadline, RetryPolicy};

/// Knobs for one reconciliation run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Only stats documents under this location prefix are considered.
    pub prefix: String,
    /// Concurrent index lookups.
    pub concurrency: Concurrency,
    /// Retry policy for each per-job index scan.
    pub fetch_retry: RetryPolicy,
    /// Page size for point-service queries.
    pub items_per_page: u32,
    /// Bound on index retries.
    pub deadline: Deadline,
}

impl EngineConfig {
    /// Defaults for the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            concurrency: Concurrency::default(),
            fetch_retry: RetryPolicy::index_fetch(),
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            deadline: Deadline::none(),
        }
    }
}

/// Runs the reconciliation phases against an index and a point source.
pub struct Reconciler<'a, I: ?Sized, P: ?Sized> {
    index: &'a I,
    points: &'a P,
    config: EngineConfig,
}

impl<'a, I, P> Reconciler<'a, I, P>
where
    I: RecordIndex + ?Sized,
    P: PointSource + ?Sized,
{
    /// Binds the collaborators for a run.
    pub fn new(index: &'a I, points: &'a P, config: EngineConfig) -> Self {
        Self {
            index,
            points,
            config,
        }
    }

    /// Classifies every job under the configured prefix.
    ///
    /// Only a failed stats scan aborts the run; per-job failures are folded
    /// into the report.
    pub async fn run<R>(&self, rng: &mut R) -> Result<Report, IndexError>
    where
        R: Rng + Send,
    {
        let started = Instant::now();
        info!("getting ingest job ids from the stats index; this may take a while");
        let enumeration = enumerate_jobs(self.index, &self.config.prefix, rng).await?;
        let counts = enumeration.counts;
        info!(
            "found {} unique ingest job id(s) from {} record(s) (out of {} | skipped {}) in {:?}",
            enumeration.jobs.len(),
            counts.added,
            counts.scanned,
            counts.skipped,
            started.elapsed()
        );

        let mapping_started = Instant::now();
        let mapping = map_files(
            self.index,
            &enumeration.jobs,
            self.config.concurrency,
            &self.config.fetch_retry,
            self.config.deadline,
        )
        .await;
        let classification = classify(mapping);
        info!(
            "mapping complete in {:?}: {} confirmed, {} unconfirmed",
            mapping_started.elapsed(),
            classification.confirmed.len(),
            classification.unconfirmed.len()
        );

        if classification.is_clean() {
            info!("no duplicate or suspected duplicate ingests found");
        }
        let confirmation = confirm_all(
            self.points,
            &classification.unconfirmed,
            &enumeration.stats,
            self.config.items_per_page,
        )
        .await;
        let report = Report::assemble(classification, confirmation);
        info!(
            "found {} confirmed and {} suspected duplicate ingest(s), {} without evidence; finished in {:?}",
            report.confirmed.len(),
            report.suspected.len(),
            report.missing_evidence.len(),
            started.elapsed()
        );
        Ok(report)
    }
}
