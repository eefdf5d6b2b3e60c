//! Ingest job identifiers and their extraction from object locations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value returned when a location carries no `job_id=` segment.
pub const UNKNOWN_JOB_ID: &str = "NA";

const JOB_ID_MARKER: &str = "job_id=";

/// Opaque identifier of one ingestion job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wraps an already-extracted identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The sentinel identifier for locations without a job segment.
    pub fn unknown() -> Self {
        Self(UNKNOWN_JOB_ID.to_string())
    }

    /// Derives the job identifier from an object location such as
    /// `s3://bucket/parquet/provider=x/job_id=1234/part-0.parquet`.
    ///
    /// The identifier is the text following the first `job_id=` up to the next
    /// `/`. A missing or empty segment yields [`JobId::unknown`].
    pub fn from_location(location: &str) -> Self {
        let id = location
            .split_once(JOB_ID_MARKER)
            .map(|(_, rest)| rest.find('/').map_or(rest, |end| &rest[..end]))
            .unwrap_or_default();
        if id.is_empty() {
            Self::unknown()
        } else {
            Self(id.to_string())
        }
    }

    /// Borrowed view of the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the sentinel produced for unparseable locations.
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_JOB_ID
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_segment_between_marker_and_slash() {
        let id = JobId::from_location(
            "s3://bucket/parquet/provider=Saildrone/job_id=4c2a-91/part-00000.parquet",
        );
        assert_eq!(id.as_str(), "4c2a-91");
        assert!(!id.is_unknown());
    }

    #[test]
    fn trailing_segment_without_slash_is_whole_remainder() {
        assert_eq!(JobId::from_location("prefix/job_id=abc").as_str(), "abc");
    }

    #[test]
    fn first_marker_wins() {
        let id = JobId::from_location("a/job_id=first/b/job_id=second/c");
        assert_eq!(id.as_str(), "first");
    }

    #[test]
    fn missing_or_empty_segment_is_unknown() {
        assert!(JobId::from_location("s3://bucket/parquet/part-0.parquet").is_unknown());
        assert!(JobId::from_location("s3://bucket/job_id=/part-0.parquet").is_unknown());
        assert!(JobId::from_location("").is_unknown());
        assert_eq!(JobId::unknown().to_string(), UNKNOWN_JOB_ID);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&JobId::new("j-1")).unwrap();
        assert_eq!(json, "\"j-1\"");
    }
}
