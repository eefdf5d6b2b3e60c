//! Search-index access: the lookup trait, its errors, and the retrying fetchers.

pub mod opensearch;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::job_id::JobId;
use crate::records::{FileRecord, StatsRecord};
use crate::retry::{Deadline, Outcome, RetryPolicy};

pub use opensearch::{Collections, IndexSettings, OpenSearchIndex};

/// Failures talking to the search index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Transport-level failure.
    #[error("index request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The index answered with a non-success status.
    #[error("index returned {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid index response: {0}")]
    Decode(String),

    /// Connection settings could not be turned into a usable client.
    #[error("invalid index settings: {0}")]
    Config(String),
}

/// Read-only view of the stats and files collections.
///
/// Every method scans exhaustively; implementations must not return a
/// single page of a larger result.
#[async_trait]
pub trait RecordIndex: Send + Sync {
    /// Streams every stats document to `visit`, returning how many were visited.
    async fn scan_stats(
        &self,
        visit: &mut (dyn FnMut(StatsRecord) + Send),
    ) -> Result<u64, IndexError>;

    /// File records whose job id matches `job`.
    async fn files_for_job(&self, job: &JobId) -> Result<Vec<FileRecord>, IndexError>;

    /// Number of files-collection documents that reference `location`,
    /// whether or not they carry a usable completion time.
    async fn source_record_count(&self, location: &str) -> Result<u64, IndexError>;
}

/// Fetches the file records of one job, retrying the whole scan on failure.
pub async fn fetch_job_files<I>(
    index: &I,
    job: &JobId,
    policy: &RetryPolicy,
    deadline: Deadline,
) -> Outcome<Vec<FileRecord>>
where
    I: RecordIndex + ?Sized,
{
    let label = format!("file records for job {job}");
    policy
        .run(&label, deadline, |_| index.files_for_job(job))
        .await
}

/// Counts the index documents that reference one source location.
pub async fn fetch_source_record_count<I>(
    index: &I,
    location: &str,
    policy: &RetryPolicy,
    deadline: Deadline,
) -> Outcome<u64>
where
    I: RecordIndex + ?Sized,
{
    let label = format!("index records for {location}");
    policy
        .run(&label, deadline, |_| index.source_record_count(location))
        .await
}
