//! Confirmation of evidence-less jobs through the external point service.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::DateTime;
use thiserror::Error;
use tracing::{info, warn};

use crate::job_id::{JobId, UNKNOWN_JOB_ID};
use crate::points::{PointQuery, PointSource};
use crate::records::{Point, PointKey, StatsRecord};

/// Why a stats record could not be turned into a query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryBuildError {
    /// A required field is absent or not numeric.
    #[error("stats record is missing `{0}`")]
    MissingField(&'static str),

    /// A time bound is outside the representable range.
    #[error("stats field `{field}` is not a valid epoch time: {value}")]
    InvalidTime {
        /// Offending field.
        field: &'static str,
        /// Raw value.
        value: f64,
    },
}

/// Outcome of checking one job against the point service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Overlapping points from different jobs were found.
    Confirmed,
    /// The check ran but found no overlap, or there was nothing to query with.
    MissingEvidence,
    /// The check itself failed.
    Suspected,
}

/// Classification of the jobs that went through the fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Confirmation {
    /// Jobs proven duplicate by overlapping points.
    pub confirmed: BTreeSet<JobId>,
    /// Jobs whose check failed and need review.
    pub suspected: BTreeSet<JobId>,
    /// Jobs checked without finding overlap.
    pub missing_evidence: BTreeSet<JobId>,
}

impl Confirmation {
    fn record(&mut self, job: JobId, verdict: Verdict) {
        match verdict {
            Verdict::Confirmed => self.confirmed.insert(job),
            Verdict::MissingEvidence => self.missing_evidence.insert(job),
            Verdict::Suspected => self.suspected.insert(job),
        };
    }
}

/// Builds the service query covering a job's spatial and temporal extent.
pub fn build_query(stats: &StatsRecord, items_per_page: u32) -> Result<PointQuery, QueryBuildError> {
    fn text(value: &Option<String>, field: &'static str) -> Result<String, QueryBuildError> {
        value.clone().ok_or(QueryBuildError::MissingField(field))
    }
    fn number(value: Option<f64>, field: &'static str) -> Result<f64, QueryBuildError> {
        value.ok_or(QueryBuildError::MissingField(field))
    }

    let min_lon = number(stats.min_lon, "min_lon")?;
    let min_lat = number(stats.min_lat, "min_lat")?;
    let max_lon = number(stats.max_lon, "max_lon")?;
    let max_lat = number(stats.max_lat, "max_lat")?;
    Ok(PointQuery {
        provider: text(&stats.provider, "provider")?,
        project: text(&stats.project, "project")?,
        platform: text(&stats.platform_code, "platform_code")?,
        bbox: format!("{min_lon},{min_lat},{max_lon},{max_lat}"),
        min_depth: number(stats.min_depth, "min_depth")?,
        max_depth: number(stats.max_depth, "max_depth")?,
        start_time: format_epoch(number(stats.min_datetime, "min_datetime")?, "min_datetime")?,
        end_time: format_epoch(number(stats.max_datetime, "max_datetime")?, "max_datetime")?,
        items_per_page,
    })
}

fn format_epoch(epoch: f64, field: &'static str) -> Result<String, QueryBuildError> {
    let invalid = || QueryBuildError::InvalidTime {
        field,
        value: epoch,
    };
    if !epoch.is_finite() {
        return Err(invalid());
    }
    let at = DateTime::from_timestamp(epoch.floor() as i64, 0).ok_or_else(invalid)?;
    Ok(at.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

/// Whether any (time, lat, lon, depth) position carries points from more
/// than one job. Points without a job id count as the `NA` job.
pub fn has_overlap(points: &[Point]) -> bool {
    let mut jobs_at: HashMap<PointKey, HashSet<&str>> = HashMap::new();
    points.iter().any(|point| {
        let jobs = jobs_at.entry(point.key()).or_default();
        jobs.insert(point.job_id.as_deref().unwrap_or(UNKNOWN_JOB_ID));
        jobs.len() > 1
    })
}

/// Checks one evidence-less job.
pub async fn confirm_job<P>(
    source: &P,
    job: &JobId,
    stats: Option<&StatsRecord>,
    items_per_page: u32,
) -> Verdict
where
    P: PointSource + ?Sized,
{
    let Some(stats) = stats else {
        info!("ingest job {job} has no stats record to build a query from");
        return Verdict::MissingEvidence;
    };
    let query = match build_query(stats, items_per_page) {
        Ok(query) => query,
        Err(err) => {
            warn!("ingest job {job}: {err}");
            return Verdict::Suspected;
        }
    };
    match source.fetch_points(&query).await {
        Ok(points) if has_overlap(&points) => {
            info!("ingest job {job} has duplicates");
            Verdict::Confirmed
        }
        Ok(points) => {
            info!("ingest job {job}: no overlap among {} point(s)", points.len());
            Verdict::MissingEvidence
        }
        Err(err) => {
            warn!("ingest job {job}: point query failed: {err}");
            Verdict::Suspected
        }
    }
}

/// Runs the fallback for every unconfirmed job, in id order.
pub async fn confirm_all<P>(
    source: &P,
    unconfirmed: &BTreeSet<JobId>,
    stats: &HashMap<JobId, StatsRecord>,
    items_per_page: u32,
) -> Confirmation
where
    P: PointSource + ?Sized,
{
    let mut confirmation = Confirmation::default();
    for job in unconfirmed {
        info!("checking ingest job {job}");
        let verdict = confirm_job(source, job, stats.get(job), items_per_page).await;
        confirmation.record(job.clone(), verdict);
    }
    confirmation
}
