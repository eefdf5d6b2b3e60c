//! The `search_result.json` artifact handed to the purge step.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResult;
use crate::confirm::Confirmation;
use crate::job_id::JobId;

/// Final classification of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Definite duplicates; safe to purge.
    #[serde(rename = "confirmed_duplicates")]
    pub confirmed: BTreeSet<JobId>,
    /// Jobs whose confirmation check failed; need review.
    #[serde(rename = "suspected_duplicates", default)]
    pub suspected: BTreeSet<JobId>,
    /// Jobs checked without finding any supporting evidence.
    #[serde(rename = "missing_ingest_records", default)]
    pub missing_evidence: BTreeSet<JobId>,
    /// Jobs whose index fetch gave up; their classification rests on the
    /// fallback alone.
    #[serde(rename = "index_fetch_failures", default)]
    pub fetch_failed: BTreeSet<JobId>,
}

impl Report {
    /// Merges mapping-phase classification with fallback results.
    pub fn assemble(classification: ClassificationResult, confirmation: Confirmation) -> Self {
        let mut confirmed = classification.confirmed;
        confirmed.extend(confirmation.confirmed);
        Self {
            confirmed,
            suspected: confirmation.suspected,
            missing_evidence: confirmation.missing_evidence,
            fetch_failed: classification.fetch_failed,
        }
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("failed to create {:?}", parent))?;
        }
        let file =
            File::create(path).with_context(|| format!("failed to create report {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a report written by [`Report::write_json`].
    pub fn read_json(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open report {:?}", path))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid report {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn serializes_with_artifact_field_names() {
        let report = Report {
            confirmed: BTreeSet::from([JobId::new("b"), JobId::new("a")]),
            suspected: BTreeSet::from([JobId::new("s")]),
            missing_evidence: BTreeSet::new(),
            fetch_failed: BTreeSet::new(),
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "confirmed_duplicates": ["a", "b"],
                "suspected_duplicates": ["s"],
                "missing_ingest_records": [],
                "index_fetch_failures": []
            })
        );
    }

    #[test]
    fn reads_reports_without_optional_sections() {
        let report: Report =
            serde_json::from_value(json!({ "confirmed_duplicates": ["x", "x", "y"] })).unwrap();
        assert_eq!(report.confirmed.len(), 2);
        assert!(report.fetch_failed.is_empty());
    }

    #[test]
    fn assemble_unions_confirmed_sets() {
        let classification = ClassificationResult {
            confirmed: BTreeSet::from([JobId::new("shared")]),
            unconfirmed: BTreeSet::from([JobId::new("d"), JobId::new("e")]),
            fetch_failed: BTreeSet::from([JobId::new("e")]),
        };
        let confirmation = Confirmation {
            confirmed: BTreeSet::from([JobId::new("d")]),
            suspected: BTreeSet::from([JobId::new("e")]),
            missing_evidence: BTreeSet::new(),
        };
        let report = Report::assemble(classification, confirmation);
        assert_eq!(
            report.confirmed,
            BTreeSet::from([JobId::new("d"), JobId::new("shared")])
        );
        assert_eq!(report.fetch_failed, BTreeSet::from([JobId::new("e")]));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/search_result.json");
        let report = Report {
            confirmed: BTreeSet::from([JobId::new("a")]),
            ..Report::default()
        };
        report.write_json(&path).unwrap();
        assert_eq!(Report::read_json(&path).unwrap(), report);
    }
}
