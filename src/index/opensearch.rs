//! OpenSearch / Elasticsearch REST client built on scroll scans.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{IndexError, RecordIndex};
use crate::job_id::JobId;
use crate::records::{CompletionTime, FileRecord, StatsRecord};

const USER_AGENT: &str = concat!("ingest-reconcile/", env!("CARGO_PKG_VERSION"));
const SCROLL_KEEPALIVE: &str = "2m";

/// Connection parameters for the index cluster.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Host name, or a full base URL including scheme.
    pub endpoint: String,
    /// Port used when `endpoint` is a bare host.
    pub port: u16,
    /// Scheme used when `endpoint` is a bare host.
    pub scheme: String,
    /// Optional basic-auth user.
    pub username: Option<String>,
    /// Optional basic-auth password.
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Documents requested per scroll page.
    pub scroll_size: usize,
}

impl IndexSettings {
    /// Settings for `endpoint` with HTTPS on 443 and default paging.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            port: 443,
            scheme: "https".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(60),
            scroll_size: 1000,
        }
    }

    /// Base URL all index paths are joined onto.
    pub fn base_url(&self) -> Result<Url, IndexError> {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(IndexError::Config("index endpoint is empty".to_string()));
        }
        let raw = if endpoint.contains("://") {
            format!("{endpoint}/")
        } else {
            format!("{}://{}:{}/", self.scheme, endpoint, self.port)
        };
        Url::parse(&raw)
            .map_err(|err| IndexError::Config(format!("invalid index endpoint {raw:?}: {err}")))
    }
}

/// Names of the collections the engine reads.
#[derive(Debug, Clone)]
pub struct Collections {
    /// One summary document per parquet file.
    pub stats: String,
    /// One document per consumed source file.
    pub files: String,
}

/// [`RecordIndex`] backed by the OpenSearch REST API.
#[derive(Clone)]
pub struct OpenSearchIndex {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    collections: Collections,
    scroll_size: usize,
}

impl OpenSearchIndex {
    /// Builds a client for the given cluster and collections.
    pub fn new(settings: &IndexSettings, collections: Collections) -> Result<Self, IndexError> {
        if collections.stats.trim().is_empty() || collections.files.trim().is_empty() {
            return Err(IndexError::Config(
                "stats and files index names are required".to_string(),
            ));
        }
        let base_url = settings.base_url()?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            username: settings.username.clone(),
            password: settings.password.clone(),
            collections,
            scroll_size: settings.scroll_size.max(1),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IndexError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| IndexError::Config(format!("invalid index path {path:?}: {err}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, IndexError> {
        let request = match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(IndexError::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|err| IndexError::Decode(err.to_string()))
    }

    /// Visits every hit of `query` in `collection`, page by page.
    async fn scroll<F>(&self, collection: &str, query: Value, mut visit: F) -> Result<u64, IndexError>
    where
        F: FnMut(Hit) + Send,
    {
        let search_url = self.endpoint(&format!("{collection}/_search"))?;
        let scroll_url = self.endpoint("_search/scroll")?;
        let body = json!({ "size": self.scroll_size, "query": query });
        let mut page: SearchPage = self
            .send(
                self.client
                    .post(search_url)
                    .query(&[("scroll", SCROLL_KEEPALIVE)])
                    .json(&body),
            )
            .await?;

        let mut visited = 0u64;
        let mut scroll_id: Option<String> = None;
        loop {
            if let Some(id) = page.scroll_id.take() {
                scroll_id = Some(id);
            }
            if page.hits.hits.is_empty() {
                break;
            }
            for hit in page.hits.hits {
                visit(hit);
                visited += 1;
            }
            let Some(id) = scroll_id.clone() else {
                break;
            };
            page = self
                .send(
                    self.client
                        .post(scroll_url.clone())
                        .json(&json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": id })),
                )
                .await?;
        }

        if let Some(id) = scroll_id {
            self.clear_scroll(scroll_url, id).await;
        }
        Ok(visited)
    }

    async fn clear_scroll(&self, scroll_url: Url, scroll_id: String) {
        let request = self
            .client
            .delete(scroll_url)
            .json(&json!({ "scroll_id": scroll_id }));
        if let Err(err) = self.send::<Value>(request).await {
            debug!("failed to release scroll context: {err}");
        }
    }

    async fn collect_files(&self, query: Value, job: &JobId) -> Result<Vec<FileRecord>, IndexError> {
        let mut records = Vec::new();
        self.scroll(&self.collections.files, query, |hit| {
            if let Some(record) = file_record(hit, job) {
                records.push(record);
            }
        })
        .await?;
        Ok(records)
    }
}

#[async_trait]
impl RecordIndex for OpenSearchIndex {
    async fn scan_stats(
        &self,
        visit: &mut (dyn FnMut(StatsRecord) + Send),
    ) -> Result<u64, IndexError> {
        let query = json!({ "match_all": {} });
        self.scroll(&self.collections.stats, query, |hit| {
            match serde_json::from_value::<StatsRecord>(hit.source) {
                Ok(record) => visit(record),
                Err(err) => warn!("skipping malformed stats document: {err}"),
            }
        })
        .await
    }

    async fn files_for_job(&self, job: &JobId) -> Result<Vec<FileRecord>, IndexError> {
        let query = json!({ "match": { "uuid": job.as_str() } });
        self.collect_files(query, job).await
    }

    /// Counts raw hits; documents lacking `job_end_time` still prove ingestion.
    async fn source_record_count(&self, location: &str) -> Result<u64, IndexError> {
        let query = json!({ "match": { "s3_url": location } });
        self.scroll(&self.collections.files, query, |_| {}).await
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: HitList,
}

#[derive(Debug, Deserialize)]
struct HitList {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: Value,
}

#[derive(Debug, Deserialize)]
struct FileSource {
    #[serde(default)]
    s3_url: Option<String>,
    #[serde(default)]
    job_end_time: Option<Value>,
}

/// Converts a files-collection hit found by a lookup for `job`.
fn file_record(hit: Hit, job: &JobId) -> Option<FileRecord> {
    let source: FileSource = match serde_json::from_value(hit.source) {
        Ok(source) => source,
        Err(err) => {
            warn!("skipping malformed file document: {err}");
            return None;
        }
    };
    let Some(location) = source.s3_url else {
        warn!("skipping file document without s3_url");
        return None;
    };
    let Some(completed_at) = source.job_end_time.as_ref().and_then(CompletionTime::from_value)
    else {
        warn!("skipping file document for {location}: missing or invalid job_end_time");
        return None;
    };
    Some(FileRecord::new(job.clone(), location, completed_at))
}
