//! Client for the external in-situ point-query service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::records::Point;
use crate::retry::{Deadline, Outcome, RetryPolicy};

/// Default service endpoint.
pub const DEFAULT_QUERY_URL: &str =
    "https://doms.jpl.nasa.gov/insitu/1.0/query_data_doms_custom_pagination";

/// Page size requested from the service.
pub const DEFAULT_ITEMS_PER_PAGE: u32 = 20_000;

/// `next` value that marks the final page.
pub const TERMINAL_NEXT: &str = "NA";

const USER_AGENT: &str = concat!("ingest-reconcile/", env!("CARGO_PKG_VERSION"));

/// Spatiotemporal query parameters, serialized as the service's query string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointQuery {
    /// Data provider.
    pub provider: String,
    /// Project.
    pub project: String,
    /// Platform code.
    pub platform: String,
    /// `min_lon,min_lat,max_lon,max_lat`.
    pub bbox: String,
    /// Shallowest depth.
    #[serde(rename = "minDepth")]
    pub min_depth: f64,
    /// Deepest depth.
    #[serde(rename = "maxDepth")]
    pub max_depth: f64,
    /// Window start, `YYYY-MM-DDTHH:MM:SSZ`.
    #[serde(rename = "startTime")]
    pub start_time: String,
    /// Window end, `YYYY-MM-DDTHH:MM:SSZ`.
    #[serde(rename = "endTime")]
    pub end_time: String,
    /// Requested page size.
    #[serde(rename = "itemsPerPage")]
    pub items_per_page: u32,
}

/// Failures while paging through the point service.
#[derive(Debug, Error)]
pub enum PointQueryError {
    /// Transport-level failure.
    #[error("point query request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status.
    #[error("point service returned {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },

    /// A `next` link could not be resolved.
    #[error("invalid next page link {link:?}: {source}")]
    InvalidLink {
        /// Link as returned by the service.
        link: String,
        /// Parse failure.
        source: url::ParseError,
    },

    /// A page kept failing until the retry policy gave up.
    #[error("page {page} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        /// 1-based page number.
        page: usize,
        /// Attempts made.
        attempts: u32,
        /// Last failure message.
        last_error: String,
    },
}

/// Anything that can answer a [`PointQuery`] with every matching point.
#[async_trait]
pub trait PointSource: Send + Sync {
    /// Runs the query to completion across all pages.
    async fn fetch_points(&self, query: &PointQuery) -> Result<Vec<Point>, PointQueryError>;
}

/// HTTP client for the paginated point-query endpoint.
#[derive(Clone)]
pub struct InsituClient {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
    deadline: Deadline,
}

impl InsituClient {
    /// Builds a client for `base_url`.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, PointQueryError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            retry: RetryPolicy::point_query(),
            deadline: Deadline::none(),
        })
    }

    /// Replaces the per-page retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds page retries by `deadline`.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    async fn get_page(&self, url: &Url, query: Option<&PointQuery>) -> Result<PointPage, PointQueryError> {
        let mut request = self.client.get(url.clone());
        if let Some(query) = query {
            request = request.query(query);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PointQueryError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PointSource for InsituClient {
    /// Follows `next` links until the service reports no further page. Query
    /// parameters are sent with the first request only; later links carry
    /// their own.
    async fn fetch_points(&self, query: &PointQuery) -> Result<Vec<Point>, PointQueryError> {
        let mut points = Vec::new();
        let mut next = Some(self.base_url.clone());
        let mut page_number = 0usize;
        while let Some(url) = next.take() {
            page_number += 1;
            let params = (page_number == 1).then_some(query);
            let label = format!("point query page {page_number}");
            let page = match self
                .retry
                .run(&label, self.deadline, |_| self.get_page(&url, params))
                .await
            {
                Outcome::Success(page) => page,
                Outcome::Exhausted {
                    attempts,
                    last_error,
                } => {
                    return Err(PointQueryError::Exhausted {
                        page: page_number,
                        attempts,
                        last_error,
                    })
                }
            };
            debug!("{label}: {} point(s)", page.results.len());
            points.extend(page.results);
            next = match page.next.as_deref().map(str::trim) {
                None | Some("") | Some(TERMINAL_NEXT) => None,
                Some(link) => Some(url.join(link).map_err(|source| {
                    PointQueryError::InvalidLink {
                        link: link.to_string(),
                        source,
                    }
                })?),
            };
        }
        Ok(points)
    }
}

#[derive(Debug, Deserialize)]
struct PointPage {
    results: Vec<Point>,
    #[serde(default)]
    next: Option<String>,
}
