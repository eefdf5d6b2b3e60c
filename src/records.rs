//! Snapshot records pulled from the search index and the point-query service.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::job_id::JobId;

/// Epoch values above this magnitude are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Per-job summary document from the stats collection.
///
/// Extent fields are optional so a partially populated document still
/// contributes its job id; the gaps only matter once a confirmation query is
/// built from it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatsRecord {
    /// Object location of the parquet file this summary describes.
    #[serde(rename = "s3_url", default)]
    pub location: String,
    /// Data provider name.
    #[serde(default, deserialize_with = "scalar_string")]
    pub provider: Option<String>,
    /// Project name.
    #[serde(default, deserialize_with = "scalar_string")]
    pub project: Option<String>,
    /// Platform code, numeric or textual in the source documents.
    #[serde(default, deserialize_with = "scalar_string")]
    pub platform_code: Option<String>,
    /// Western edge of the bounding box.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min_lon: Option<f64>,
    /// Southern edge of the bounding box.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min_lat: Option<f64>,
    /// Eastern edge of the bounding box.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_lon: Option<f64>,
    /// Northern edge of the bounding box.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_lat: Option<f64>,
    /// Shallowest depth.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min_depth: Option<f64>,
    /// Deepest depth.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_depth: Option<f64>,
    /// Earliest observation, epoch seconds.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min_datetime: Option<f64>,
    /// Latest observation, epoch seconds.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_datetime: Option<f64>,
}

impl StatsRecord {
    /// Minimal record carrying only a location.
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    /// Job this record belongs to.
    pub fn job_id(&self) -> JobId {
        JobId::from_location(&self.location)
    }
}

/// When a job finished processing a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompletionTime(DateTime<Utc>);

impl CompletionTime {
    /// Wraps a UTC instant.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Builds a completion time from whole epoch seconds.
    pub fn from_epoch_secs(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self)
    }

    /// Parses the loosely typed `job_end_time` field: epoch seconds or
    /// milliseconds as a number or numeric string, RFC 3339, or a naive
    /// `YYYY-MM-DDTHH:MM:SS[.fff]` timestamp taken as UTC.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_f64().and_then(Self::from_epoch),
            Value::String(text) => Self::parse(text.trim()),
            _ => None,
        }
    }

    /// Underlying instant.
    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    fn parse(text: &str) -> Option<Self> {
        if let Ok(epoch) = text.parse::<f64>() {
            return Self::from_epoch(epoch);
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Some(Self(parsed.with_timezone(&Utc)));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .map(|naive| Self(naive.and_utc()))
    }

    fn from_epoch(epoch: f64) -> Option<Self> {
        if !epoch.is_finite() {
            return None;
        }
        let secs = if epoch.abs() > EPOCH_MILLIS_THRESHOLD {
            epoch / 1000.0
        } else {
            epoch
        };
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos).map(Self)
    }
}

/// Evidence that a job consumed a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Job that consumed the file.
    pub job_id: JobId,
    /// Location of the consumed source file.
    pub location: String,
    /// When the job finished.
    pub completed_at: CompletionTime,
}

impl FileRecord {
    /// Assembles a file record.
    pub fn new(job_id: JobId, location: impl Into<String>, completed_at: CompletionTime) -> Self {
        Self {
            job_id,
            location: location.into(),
            completed_at,
        }
    }
}

/// One in-situ observation returned by the point-query service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Point {
    /// Observation time as reported by the service.
    #[serde(default, deserialize_with = "scalar_string")]
    pub time: Option<String>,
    /// Latitude.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    /// Longitude.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    /// Depth, absent for surface-only platforms.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub depth: Option<f64>,
    /// Job that ingested the point.
    #[serde(default, deserialize_with = "scalar_string")]
    pub job_id: Option<String>,
}

impl Point {
    /// Grouping key for overlap detection.
    pub fn key(&self) -> PointKey {
        PointKey {
            time: self.time.clone(),
            latitude: self.latitude.map(canonical_bits),
            longitude: self.longitude.map(canonical_bits),
            depth: self.depth.map(canonical_bits),
        }
    }
}

/// Spatiotemporal identity of a point: (time, latitude, longitude, depth).
///
/// Coordinates are compared by bit pattern after folding `-0.0` into `0.0`
/// and all NaNs into one value, so equal readings hash equally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointKey {
    time: Option<String>,
    latitude: Option<u64>,
    longitude: Option<u64>,
    depth: Option<u64>,
}

fn canonical_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}
