//! Detection of stored source objects that never made it into the index.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispatch::{dispatch, Concurrency};
use crate::index::{fetch_source_record_count, RecordIndex};
use crate::retry::{Deadline, Outcome, RetryPolicy};
use crate::store::{ObjectStore, StoreError};

/// Result document of an ingest check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCheckReport {
    /// Location that was checked, `s3://bucket/prefix`.
    pub s3_url: String,
    /// Candidate objects checked.
    pub total_checked: usize,
    /// Objects with no index records.
    pub total_uningested: usize,
    /// Their locations, sorted.
    pub uningested_urls: Vec<String>,
}

/// Whether a key names an ingestible source file.
pub fn is_source_object(key: &str) -> bool {
    key.ends_with(".json") || key.ends_with(".json.gz")
}

/// Lists source objects under `prefix` and reports those the files index has
/// no document for. Any document counts, complete or not. A lookup that
/// exhausts its retries counts as uningested.
pub async fn find_uningested<I, S>(
    index: &I,
    store: &S,
    bucket: &str,
    prefix: &str,
    concurrency: Concurrency,
    policy: &RetryPolicy,
    deadline: Deadline,
) -> Result<IngestCheckReport, StoreError>
where
    I: RecordIndex + ?Sized,
    S: ObjectStore + ?Sized,
{
    let urls: Vec<String> = store
        .list(prefix)
        .await?
        .into_iter()
        .filter(|key| is_source_object(key))
        .map(|key| format!("s3://{bucket}/{key}"))
        .collect();
    info!("checking {} key(s)", urls.len());

    let total_checked = urls.len();
    let results = dispatch(urls, concurrency, "source lookups", move |url| async move {
        fetch_source_record_count(index, &url, policy, deadline).await
    })
    .await;

    let mut uningested_urls: Vec<String> = results
        .into_iter()
        .filter_map(|(url, outcome)| match outcome {
            Outcome::Success(hits) if hits > 0 => None,
            _ => Some(url),
        })
        .collect();
    uningested_urls.sort();
    Ok(IngestCheckReport {
        s3_url: format!("s3://{bucket}/{prefix}"),
        total_checked,
        total_uningested: uningested_urls.len(),
        uningested_urls,
    })
}

/// `{dir}/{stem}.json`, or `{dir}/{stem}-{i}.json` with the first unused `i`.
pub fn next_available_path(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.json"));
    if !candidate.exists() {
        return candidate;
    }
    (0..)
        .map(|i| dir.join(format!("{stem}-{i}.json")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
