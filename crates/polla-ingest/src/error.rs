//! Error types for every stage of the pipeline.
//!
//! Errors below the orchestrator are local to one source attempt. The
//! orchestrator downgrades [`FetchError`] and [`ParseError`] to "source
//! absent"; everything else aborts the run.

use crate::model::SourceId;

/// Failures of a single HTTP retrieval.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("robots.txt forbids fetching {0}")]
    Blocked(String),

    #[error("rate limited by {0} after one backoff retry")]
    RateLimited(String),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("HTTP status {0}")]
    HttpError(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Structural mismatch between a page and its parser.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("no recognizable draw data in {0}")]
    NoContent(String),

    #[error("invalid selector: {0}")]
    Selector(String),
}

/// Garbled or incomplete data. Always fatal to the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DataIntegrityError {
    #[error("no source supplied required field '{0}'")]
    MissingRequiredField(String),

    #[error("malformed amount for '{field}': {token:?}")]
    MalformedAmount { field: String, token: String },
}

/// Ledger I/O failures.
#[derive(thiserror::Error, Debug)]
pub enum StateStoreError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Bad or missing configuration. Never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

/// Any error that ends a run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("source {source_id} failed: {error}")]
    Source {
        source_id: SourceId,
        error: SourceFailure,
    },

    #[error("no sources available ({0} attempted)")]
    NoSourcesAvailable(usize),

    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error("run exceeded its deadline of {0}s")]
    TimeoutExceeded(u64),

    #[error("artifact write failed: {0}")]
    Artifact(#[source] std::io::Error),

    #[error("event log write failed: {0}")]
    Telemetry(#[source] std::io::Error),
}

/// The originating error of one source attempt.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl SourceFailure {
    /// Stable snake_case name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceFailure::Fetch(FetchError::Blocked(_)) => "blocked",
            SourceFailure::Fetch(FetchError::RateLimited(_)) => "rate_limited",
            SourceFailure::Fetch(FetchError::Timeout(_)) => "timeout",
            SourceFailure::Fetch(FetchError::HttpError(_)) => "http_error",
            SourceFailure::Fetch(FetchError::Transport(_)) => "transport",
            SourceFailure::Parse(_) => "parse_error",
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceFailure::Fetch(_))
    }
}

impl PipelineError {
    /// Stable snake_case name written into error artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration_error",
            PipelineError::Source { error, .. } => match error {
                SourceFailure::Fetch(_) => "fetch_error",
                SourceFailure::Parse(_) => "parse_error",
            },
            PipelineError::NoSourcesAvailable(_) => "no_sources_available",
            PipelineError::DataIntegrity(DataIntegrityError::MissingRequiredField(_)) => {
                "missing_required_field"
            }
            PipelineError::DataIntegrity(DataIntegrityError::MalformedAmount { .. }) => {
                "malformed_amount"
            }
            PipelineError::StateStore(_) => "state_store_error",
            PipelineError::TimeoutExceeded(_) => "timeout_exceeded",
            PipelineError::Artifact(_) => "artifact_error",
            PipelineError::Telemetry(_) => "telemetry_error",
        }
    }

    /// The source that caused the failure, when there is one.
    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            PipelineError::Source { source_id, .. } => Some(*source_id),
            _ => None,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Configuration(_) => 2,
            PipelineError::Source { .. } | PipelineError::NoSourcesAvailable(_) => 3,
            PipelineError::DataIntegrity(_) => 4,
            PipelineError::StateStore(_) => 5,
            PipelineError::TimeoutExceeded(_) => 6,
            PipelineError::Artifact(_) | PipelineError::Telemetry(_) => 1,
        }
    }
}

/// Convenience result type.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        let err = PipelineError::Source {
            source_id: SourceId::Fallback,
            error: FetchError::HttpError(503).into(),
        };
        assert_eq!(err.kind(), "fetch_error");
        assert_eq!(err.source_id(), Some(SourceId::Fallback));
        assert_eq!(err.exit_code(), 3);

        let err: PipelineError =
            DataIntegrityError::MissingRequiredField("draw_id".into()).into();
        assert_eq!(err.kind(), "missing_required_field");
        assert_eq!(err.exit_code(), 4);
        assert_eq!(err.source_id(), None);
    }

    #[test]
    fn test_parse_failures_are_not_transient() {
        assert!(!SourceFailure::Parse(ParseError::EmptyDocument).is_transient());
        assert!(SourceFailure::Fetch(FetchError::Timeout("u".into())).is_transient());
    }
}
