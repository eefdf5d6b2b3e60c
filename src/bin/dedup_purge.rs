use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ingest_reconcile::config::init_tracing;
use ingest_reconcile::purge::{execute, plan, split_location};
use ingest_reconcile::{LocalObjectStore, ObjectStore, Report};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "dedup-purge",
    about = "Delete parquet objects written by confirmed duplicate ingest jobs"
)]
struct PurgeCli {
    /// Location of the parquet objects, `s3://bucket/prefix`.
    #[arg(long, env = "OPENSEARCH_PARQUET_PREFIX")]
    parquet_prefix: String,

    /// Directory holding one subdirectory per bucket.
    #[arg(long, env = "PURGE_STORE_ROOT")]
    store_root: PathBuf,

    /// Report written by dedup-search.
    #[arg(long, default_value = "search_result.json")]
    input: PathBuf,

    /// Log the planned deletions without removing anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = PurgeCli::parse();
    let report = Report::read_json(&cli.input)?;
    if report.confirmed.is_empty() {
        info!("no confirmed duplicates in {:?}; nothing to purge", cli.input);
        return Ok(());
    }
    if !report.suspected.is_empty() {
        warn!(
            "{} suspected duplicate(s) are left for manual review",
            report.suspected.len()
        );
    }

    let (bucket, prefix) = split_location(&cli.parquet_prefix)?;
    let store = LocalObjectStore::new(cli.store_root.join(&bucket));
    let keys = store
        .list(&prefix)
        .await
        .with_context(|| format!("failed to list s3://{bucket}/{prefix}"))?;
    let doomed = plan(keys, &report.confirmed);
    info!(
        "{} object(s) belong to {} confirmed duplicate job(s)",
        doomed.len(),
        report.confirmed.len()
    );

    if cli.dry_run {
        for key in &doomed {
            info!("would delete s3://{bucket}/{key}");
        }
        return Ok(());
    }
    let summary = execute(&store, &doomed).await.context("purge failed")?;
    info!(
        "deleted {} of {} object(s), {} failed",
        summary.deleted,
        summary.requested,
        summary.failed.len()
    );
    Ok(())
}
