//! Command-line and environment settings shared by the binaries.

use std::time::Duration;

use anyhow::ensure;
use clap::Args;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::dispatch::Concurrency;
use crate::index::IndexSettings;
use crate::retry::Deadline;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Index connection flags, flattened into each binary's parser.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Index host, or a full base URL.
    #[arg(long, env = "OPENSEARCH_ENDPOINT")]
    pub endpoint: String,

    /// Port used with a bare host.
    #[arg(long, env = "OPENSEARCH_PORT", default_value_t = 443)]
    pub port: u16,

    /// Scheme used with a bare host.
    #[arg(long, env = "OPENSEARCH_SCHEME", default_value = "https")]
    pub scheme: String,

    /// Basic-auth user.
    #[arg(long, env = "OPENSEARCH_USERNAME")]
    pub username: Option<String>,

    /// Basic-auth password.
    #[arg(long, env = "OPENSEARCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "OPENSEARCH_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Documents per scroll page.
    #[arg(long, env = "OPENSEARCH_SCROLL_SIZE", default_value_t = 1000)]
    pub scroll_size: usize,

    /// Concurrent index lookups (unset or 0 = min(32, cpus + 4)).
    #[arg(long, env = "MAX_ES_WORKERS")]
    pub max_workers: Option<usize>,
}

impl IndexArgs {
    /// Validated connection settings.
    pub fn settings(&self) -> anyhow::Result<IndexSettings> {
        ensure!(!self.endpoint.trim().is_empty(), "OPENSEARCH_ENDPOINT is empty");
        ensure!(self.timeout_secs > 0, "OPENSEARCH_TIMEOUT_SECS must be positive");
        ensure!(self.scroll_size > 0, "OPENSEARCH_SCROLL_SIZE must be positive");
        Ok(IndexSettings {
            endpoint: self.endpoint.trim().to_string(),
            port: self.port,
            scheme: self.scheme.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            scroll_size: self.scroll_size,
        })
    }

    /// Lookup pool size.
    pub fn concurrency(&self) -> Concurrency {
        Concurrency::new(self.max_workers)
    }
}

/// Deadline `secs` from now, or none.
pub fn deadline_from_secs(secs: Option<u64>) -> Deadline {
    secs.map(|secs| Deadline::after(Duration::from_secs(secs)))
        .unwrap_or_default()
}

/// Installs the global subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
