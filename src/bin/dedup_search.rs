use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use ingest_reconcile::config::{deadline_from_secs, init_tracing};
use ingest_reconcile::points::DEFAULT_QUERY_URL;
use ingest_reconcile::{
    Collections, EngineConfig, IndexArgs, InsituClient, OpenSearchIndex, Reconciler,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "dedup-search",
    about = "Find ingest jobs that re-ingested source files already covered by a later job"
)]
struct SearchCli {
    #[command(flatten)]
    index: IndexArgs,

    /// Stats collection, one document per parquet file.
    #[arg(long, env = "OPENSEARCH_STATS_INDEX")]
    stats_index: String,

    /// Files collection, one document per consumed source file.
    #[arg(long, env = "OPENSEARCH_FILES_INDEX")]
    files_index: String,

    /// Only parquet files under this location are considered.
    #[arg(long, env = "OPENSEARCH_PARQUET_PREFIX")]
    parquet_prefix: String,

    /// Point-service query endpoint.
    #[arg(long, env = "DOMS_QUERY_URL", default_value = DEFAULT_QUERY_URL)]
    doms_query_url: String,

    /// Where the report is written.
    #[arg(long, default_value = "search_result.json")]
    output: PathBuf,

    /// Give up on index and point-service retries this many seconds after start.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = SearchCli::parse();
    ensure!(
        !cli.parquet_prefix.trim().is_empty(),
        "OPENSEARCH_PARQUET_PREFIX is empty"
    );

    let settings = cli.index.settings()?;
    let index = OpenSearchIndex::new(
        &settings,
        Collections {
            stats: cli.stats_index.clone(),
            files: cli.files_index.clone(),
        },
    )
    .context("failed to build index client")?;
    let query_url = Url::parse(&cli.doms_query_url)
        .with_context(|| format!("invalid DOMS_QUERY_URL {:?}", cli.doms_query_url))?;
    let deadline = deadline_from_secs(cli.deadline_secs);
    let points = InsituClient::new(query_url, Duration::from_secs(cli.index.timeout_secs))
        .context("failed to build point-service client")?
        .with_deadline(deadline);

    let config = EngineConfig {
        concurrency: cli.index.concurrency(),
        deadline,
        ..EngineConfig::new(cli.parquet_prefix.trim())
    };
    info!(
        "scanning {} for parquet files under {}",
        cli.stats_index, config.prefix
    );
    let mut rng = StdRng::from_entropy();
    let report = Reconciler::new(&index, &points, config)
        .run(&mut rng)
        .await
        .context("reconciliation failed")?;

    report.write_json(&cli.output)?;
    info!("wrote report to {:?}", cli.output);
    Ok(())
}
