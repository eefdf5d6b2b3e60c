#![warn(missing_docs)]
//! Core library for reconciling ingestion jobs against search-index records.
//!
//! A run enumerates ingest jobs from the stats collection, maps every job to
//! the source files it consumed, flags jobs superseded by a later ingest of the
//! same file, and checks the remainder against the point service.

pub mod classifier;
pub mod config;
pub mod confirm;
pub mod dispatch;
pub mod engine;
pub mod enumerate;
pub mod index;
pub mod ingest_check;
pub mod job_id;
pub mod mapper;
pub mod points;
pub mod purge;
pub mod records;
pub mod report;
pub mod retry;
pub mod store;

pub use classifier::{classify, ClassificationResult};
pub use config::{init_tracing, IndexArgs};
pub use confirm::{Confirmation, Verdict};
pub use dispatch::Concurrency;
pub use engine::{EngineConfig, Reconciler};
pub use index::{Collections, IndexError, IndexSettings, OpenSearchIndex, RecordIndex};
pub use ingest_check::IngestCheckReport;
pub use job_id::JobId;
pub use points::{InsituClient, PointQuery, PointQueryError, PointSource};
pub use records::{CompletionTime, FileRecord, Point, StatsRecord};
pub use report::Report;
pub use retry::{Deadline, Outcome, RetryPolicy};
pub use store::{LocalObjectStore, ObjectStore, StoreError};
