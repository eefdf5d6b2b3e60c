//! Removal of confirmed-duplicate objects.

use std::collections::BTreeSet;

use tracing::{error, info, warn};
use url::Url;

use crate::job_id::JobId;
use crate::store::{ObjectStore, StoreError, MAX_DELETE_BATCH};

/// Extra delete calls made for keys a batch failed to remove.
pub const DELETE_RETRIES: u32 = 3;

/// Splits `s3://bucket/some/prefix` into the bucket and the key prefix.
pub fn split_location(location: &str) -> anyhow::Result<(String, String)> {
    let url = Url::parse(location)
        .map_err(|err| anyhow::anyhow!("invalid object location {location:?}: {err}"))?;
    let bucket = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| anyhow::anyhow!("object location {location:?} has no bucket"))?;
    Ok((bucket.to_string(), url.path().trim_start_matches('/').to_string()))
}

/// Keys whose job id is one of the confirmed duplicates.
pub fn plan(keys: impl IntoIterator<Item = String>, confirmed: &BTreeSet<JobId>) -> Vec<String> {
    keys.into_iter()
        .filter(|key| confirmed.contains(&JobId::from_location(key)))
        .collect()
}

/// Totals from a purge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Keys submitted.
    pub requested: usize,
    /// Keys removed.
    pub deleted: usize,
    /// Keys still present after all retries.
    pub failed: Vec<String>,
}

/// Deletes `keys` in batches of at most [`MAX_DELETE_BATCH`], retrying the
/// keys each batch reports as failed up to [`DELETE_RETRIES`] times.
pub async fn execute<S>(store: &S, keys: &[String]) -> Result<PurgeSummary, StoreError>
where
    S: ObjectStore + ?Sized,
{
    let mut summary = PurgeSummary {
        requested: keys.len(),
        ..PurgeSummary::default()
    };
    for batch in keys.chunks(MAX_DELETE_BATCH) {
        info!("deleting {} object(s)", batch.len());
        let mut outcome = store.delete_batch(batch).await?;
        summary.deleted += outcome.deleted.len();
        if !outcome.failed.is_empty() {
            error!("{} object(s) could not be deleted", outcome.failed.len());
        }
        let mut retries_left = DELETE_RETRIES;
        while !outcome.failed.is_empty() && retries_left > 0 {
            retries_left -= 1;
            warn!("retrying {} object(s)", outcome.failed.len());
            outcome = store.delete_batch(&outcome.failed).await?;
            summary.deleted += outcome.deleted.len();
        }
        for key in &outcome.failed {
            error!("giving up on {key}");
        }
        summary.failed.extend(outcome.failed);
    }
    Ok(summary)
}
