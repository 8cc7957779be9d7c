//! On-disk outputs of a run.
//!
//! ```text
//! <root>/raw/<run_id>/<source>-<hash12>.html   literal fetched body
//! <root>/raw/<run_id>/<source>-<hash12>.json   parsed SourceRecord
//! <root>/normalized.jsonl                      one line per completed run
//! <root>/reports/<run_id>.json                 run report or error artifact
//! <root>/state.jsonl                           idempotency ledger
//! <root>/events.jsonl                          structured event stream
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::model::{
    ComparisonResult, NormalizedRecord, Outcome, RawFetch, SourceId, SourceRecord, API_VERSION,
};

#[derive(Serialize)]
struct Versioned<'a, T: Serialize> {
    version: &'static str,
    #[serde(flatten)]
    inner: &'a T,
}

/// Per-source section of a report.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub url: String,
    pub content_hash: String,
    pub complete: bool,
    pub missing: Vec<String>,
}

/// A source that was attempted and ended absent.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub source: SourceId,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionReport {
    pub outcome: Outcome,
    pub reason: String,
    pub single_source: Option<SourceId>,
}

/// Report of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub status: &'static str,
    pub draw_id: u32,
    pub content_hash: String,
    pub decision: DecisionReport,
    pub comparisons: Vec<ComparisonResult>,
    pub offending: Vec<ComparisonResult>,
    pub sources: BTreeMap<SourceId, SourceReport>,
    pub failures: Vec<FailureReport>,
    pub excluded: Vec<SourceId>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    source: Option<SourceId>,
    message: String,
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    run_id: &'a str,
    generated_at: DateTime<Utc>,
    status: &'static str,
    error: ErrorDetail<'a>,
}

/// Filesystem layout for one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("state.jsonl")
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn normalized_path(&self) -> PathBuf {
        self.root.join("normalized.jsonl")
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.root.join("reports").join(format!("{run_id}.json"))
    }

    /// Store the fetched body for audit and replay, whether or not it parses.
    pub fn write_raw(
        &self,
        run_id: &str,
        source: SourceId,
        fetch: &RawFetch,
    ) -> io::Result<PathBuf> {
        let dir = self.root.join("raw").join(run_id);
        fs::create_dir_all(&dir)?;
        let short = &fetch.content_hash[..fetch.content_hash.len().min(12)];
        let html_path = dir.join(format!("{source}-{short}.html"));
        fs::write(&html_path, &fetch.body)?;
        Ok(html_path)
    }

    /// Store the record parsed from a raw copy next to it.
    pub fn write_parsed(&self, raw_path: &Path, record: &SourceRecord) -> io::Result<PathBuf> {
        let json_path = raw_path.with_extension("json");
        let json = serde_json::to_string_pretty(record).map_err(io::Error::other)?;
        fs::write(&json_path, json)?;
        Ok(json_path)
    }

    /// Append one record to the normalized stream.
    pub fn append_normalized(&self, record: &NormalizedRecord) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let line = serde_json::to_string(&Versioned {
            version: API_VERSION,
            inner: record,
        })
        .map_err(io::Error::other)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.normalized_path())?;
        writeln!(file, "{line}")?;
        file.flush()
    }

    pub fn write_report(&self, report: &RunReport) -> io::Result<PathBuf> {
        self.write_json(
            &report.run_id,
            &Versioned {
                version: API_VERSION,
                inner: report,
            },
        )
    }

    /// Write the failure artifact for a run that ended in `error`.
    pub fn write_error(&self, run_id: &str, error: &PipelineError) -> io::Result<PathBuf> {
        let report = ErrorReport {
            run_id,
            generated_at: Utc::now(),
            status: "failed",
            error: ErrorDetail {
                kind: error.kind(),
                source: error.source_id(),
                message: error.to_string(),
            },
        };
        self.write_json(
            run_id,
            &Versioned {
                version: API_VERSION,
                inner: &report,
            },
        )
    }

    fn write_json<T: Serialize>(&self, run_id: &str, value: &T) -> io::Result<PathBuf> {
        let path = self.report_path(run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}
