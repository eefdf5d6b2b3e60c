use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use ingest_reconcile::config::{deadline_from_secs, init_tracing};
use ingest_reconcile::ingest_check::{find_uningested, next_available_path};
use ingest_reconcile::{Collections, IndexArgs, LocalObjectStore, OpenSearchIndex, RetryPolicy};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "ingest-check",
    about = "List source objects that have no record in the files index"
)]
struct CheckCli {
    #[command(flatten)]
    index: IndexArgs,

    /// Files collection to check against.
    #[arg(long, env = "OPENSEARCH_INDEX")]
    files_index: String,

    /// Bucket holding the source objects.
    #[arg(long, env = "S3_BUCKET")]
    bucket: String,

    /// Key prefix to check.
    #[arg(long, env = "S3_PREFIX", default_value = "")]
    prefix: String,

    /// Directory holding one subdirectory per bucket.
    #[arg(long, env = "INGEST_CHECK_STORE_ROOT")]
    store_root: PathBuf,

    /// Directory the result document is written to.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Give up on index retries this many seconds after start.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = CheckCli::parse();
    ensure!(!cli.bucket.trim().is_empty(), "S3_BUCKET is empty");

    let settings = cli.index.settings()?;
    let index = OpenSearchIndex::new(
        &settings,
        Collections {
            stats: cli.files_index.clone(),
            files: cli.files_index.clone(),
        },
    )
    .context("failed to build index client")?;
    let store = LocalObjectStore::new(cli.store_root.join(&cli.bucket));

    let report = find_uningested(
        &index,
        &store,
        &cli.bucket,
        &cli.prefix,
        cli.index.concurrency(),
        &RetryPolicy::index_fetch(),
        deadline_from_secs(cli.deadline_secs),
    )
    .await
    .context("failed to list source objects")?;

    if report.total_uningested == 0 {
        info!("all {} object(s) are ingested", report.total_checked);
        return Ok(());
    }
    info!(
        "{} of {} object(s) are not ingested",
        report.total_uningested, report.total_checked
    );
    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("failed to create {:?}", cli.output_dir))?;
    let path = next_available_path(&cli.output_dir, "result");
    let body = serde_json::to_string_pretty(&report)?;
    std::fs::write(&path, body).with_context(|| format!("failed to write {:?}", path))?;
    info!("wrote {:?}", path);
    Ok(())
}
