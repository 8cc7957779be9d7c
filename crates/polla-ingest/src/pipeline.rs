//! Run orchestration: fetch, parse, normalize, reconcile, decide, persist.
//!
//! Sources are visited one at a time in priority order. Fetch and parse
//! failures make a source absent (or abort the run under `fail_fast`);
//! data integrity, ledger and artifact failures always abort. Whatever
//! the cause, a failed run leaves an error artifact behind.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

use crate::artifacts::{ArtifactStore, DecisionReport, FailureReport, RunReport, SourceReport};
use crate::config::{PipelineConfig, SourceConfig};
use crate::decision::{decide, DecisionFlags};
use crate::error::{
    ConfigurationError, FetchError, ParseError, PipelineError, PipelineResult, SourceFailure,
};
use crate::fetch::{Fetch, HostRateLimiter, HttpFetcher, NoopRateLimiter, RateLimiter};
use crate::model::{LedgerEntry, Outcome, ParseOutcome, RawFetch, SourceId, SourceRecord};
use crate::normalize;
use crate::parse::discover_article_urls;
use crate::reconcile;
use crate::state::Ledger;
use crate::telemetry::EventLog;

/// Terminal state of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Publish,
    Quarantine,
    PublishForced,
    /// Identical content was already published; nothing was written.
    AlreadyProcessed,
}

impl From<Outcome> for RunOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Publish => RunOutcome::Publish,
            Outcome::Quarantine => RunOutcome::Quarantine,
            Outcome::PublishForced => RunOutcome::PublishForced,
        }
    }
}

/// What the CLI prints after a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub draw_id: u32,
    pub content_hash: String,
    pub reason: Option<String>,
    pub sources: Vec<SourceId>,
    pub comparisons: usize,
    pub offending: usize,
    pub failures: Vec<FailureReport>,
    pub report_path: Option<PathBuf>,
}

/// One source that fetched and parsed.
struct Collected {
    outcome: ParseOutcome,
    url: String,
}

fn emit(events: &mut EventLog, event: &str, fields: serde_json::Value) -> PipelineResult<()> {
    events.emit(event, fields).map_err(PipelineError::Telemetry)
}

/// The ingestion pipeline for one output directory.
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetch>,
    artifacts: ArtifactStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn Fetch>, artifacts: ArtifactStore) -> Self {
        Self {
            config,
            fetcher,
            artifacts,
        }
    }

    /// Build a pipeline with the real HTTP fetcher and artifacts under
    /// `config.output_dir`.
    pub fn from_config(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let limiter: Arc<dyn RateLimiter> = match config.requests_per_second {
            Some(rps) => Arc::new(HostRateLimiter::per_second(rps)),
            None => Arc::new(NoopRateLimiter),
        };
        let fetcher = HttpFetcher::new(limiter, config.rate_limit_backoff())
            .map_err(|e| ConfigurationError(format!("cannot build HTTP client: {e}")))?;
        let artifacts = ArtifactStore::new(config.output_dir.clone());
        Ok(Self::new(config, Arc::new(fetcher), artifacts))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Execute one run.
    pub async fn run(&self) -> PipelineResult<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("pipeline_run", run_id = %run_id);

        let mut events = match EventLog::open(self.artifacts.events_path(), &run_id) {
            Ok(events) => events,
            Err(e) => {
                let err = PipelineError::Telemetry(e);
                self.write_error_artifact(&run_id, &err);
                return Err(err);
            }
        };

        let result = match self.config.validate() {
            Ok(()) => {
                let deadline = self.config.run_deadline();
                match tokio::time::timeout(deadline, self.execute(&run_id, &mut events))
                    .instrument(span.clone())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::TimeoutExceeded(self.config.run_deadline_secs)),
                }
            }
            Err(e) => Err(e.into()),
        };

        if let Err(err) = &result {
            span.in_scope(|| tracing::warn!("run failed: {err}"));
            let fields = json!({
                "error_kind": err.kind(),
                "source": err.source_id(),
                "message": err.to_string(),
            });
            if let Err(e) = events.emit("pipeline_failed", fields) {
                tracing::warn!("could not record pipeline_failed: {e}");
            }
            self.write_error_artifact(&run_id, err);
        }
        result
    }

    fn write_error_artifact(&self, run_id: &str, err: &PipelineError) {
        if let Err(e) = self.artifacts.write_error(run_id, err) {
            tracing::warn!("could not write error artifact for {run_id}: {e}");
        }
    }

    async fn execute(&self, run_id: &str, events: &mut EventLog) -> PipelineResult<RunSummary> {
        let mut ledger = Ledger::open(self.artifacts.ledger_path())?;
        let source_ids: Vec<SourceId> = self.config.sources.iter().map(|s| s.id).collect();

        emit(
            events,
            "pipeline_start",
            json!({
                "sources": source_ids,
                "mismatch_threshold": self.config.mismatch_threshold,
                "fail_fast": self.config.fail_fast,
                "force_publish": self.config.force_publish,
                "ledger_entries": ledger.len(),
                "ledger_skipped_lines": ledger.skipped_lines(),
            }),
        )?;

        let mut collected: BTreeMap<SourceId, Collected> = BTreeMap::new();
        let mut failures = Vec::new();

        for source in &self.config.sources {
            match self.collect_source(run_id, source, events).await? {
                Ok(c) => {
                    collected.insert(source.id, c);
                }
                Err(failure) => {
                    tracing::warn!("source {} unavailable: {failure}", source.id);
                    failures.push(FailureReport {
                        source: source.id,
                        kind: failure.kind().to_string(),
                        message: failure.to_string(),
                    });
                    if self.config.fail_fast {
                        return Err(PipelineError::Source {
                            source_id: source.id,
                            error: failure,
                        });
                    }
                }
            }
        }

        if collected.is_empty() {
            return Err(PipelineError::NoSourcesAvailable(self.config.sources.len()));
        }

        let records: Vec<SourceRecord> = collected
            .values()
            .map(|c| c.outcome.record().clone())
            .collect();
        let merged = normalize::merge(&records, &source_ids)?;
        let record = merged.record;

        for id in &merged.excluded {
            let reported = collected.get(id).and_then(|c| c.outcome.record().draw_id);
            emit(
                events,
                "source_excluded",
                json!({"source": id, "draw_id": reported, "resolved_draw_id": record.draw_id}),
            )?;
        }

        let content_hash = record.content_hash();
        let contributing: Vec<SourceId> = collected
            .keys()
            .copied()
            .filter(|id| !merged.excluded.contains(id))
            .collect();

        if ledger.already_processed(record.draw_id, &content_hash) {
            tracing::info!("draw {} already published with identical content", record.draw_id);
            emit(
                events,
                "already_processed",
                json!({"draw_id": record.draw_id, "content_hash": content_hash}),
            )?;
            return Ok(RunSummary {
                run_id: run_id.to_string(),
                outcome: RunOutcome::AlreadyProcessed,
                draw_id: record.draw_id,
                content_hash,
                reason: None,
                sources: contributing,
                comparisons: 0,
                offending: 0,
                failures,
                report_path: None,
            });
        }

        let flags = DecisionFlags {
            fail_fast: self.config.fail_fast,
            force_publish: self.config.force_publish,
        };
        let (comparisons, decision) = match contributing.as_slice() {
            [only] => (Vec::new(), decide(&[], flags).single_source(*only)),
            _ => {
                let comparisons =
                    reconcile::compare(&merged.observations, self.config.mismatch_threshold);
                let decision = decide(&comparisons, flags);
                (comparisons, decision)
            }
        };

        emit(
            events,
            "decision",
            json!({
                "draw_id": record.draw_id,
                "outcome": decision.outcome,
                "reason": decision.reason,
                "single_source": decision.single_source,
                "comparisons": comparisons.len(),
                "offending": decision
                    .offending
                    .iter()
                    .map(|c| c.field.to_string())
                    .collect::<Vec<_>>(),
            }),
        )?;

        self.artifacts
            .append_normalized(&record)
            .map_err(PipelineError::Artifact)?;

        let sources = collected
            .iter()
            .map(|(id, c)| {
                let r = c.outcome.record();
                (
                    *id,
                    SourceReport {
                        url: c.url.clone(),
                        content_hash: r.content_hash.clone(),
                        complete: c.outcome.is_complete(),
                        missing: c.outcome.missing().to_vec(),
                    },
                )
            })
            .collect();
        let report = RunReport {
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            status: "completed",
            draw_id: record.draw_id,
            content_hash: content_hash.clone(),
            decision: DecisionReport {
                outcome: decision.outcome,
                reason: decision.reason.clone(),
                single_source: decision.single_source,
            },
            comparisons: comparisons.clone(),
            offending: decision.offending.clone(),
            sources,
            failures: failures.clone(),
            excluded: merged.excluded.clone(),
        };
        let report_path = self
            .artifacts
            .write_report(&report)
            .map_err(PipelineError::Artifact)?;

        ledger.append(LedgerEntry {
            run_id: run_id.to_string(),
            draw_id: record.draw_id,
            content_hash: content_hash.clone(),
            decision: decision.outcome,
            recorded_at: Utc::now(),
        })?;

        emit(
            events,
            "pipeline_complete",
            json!({
                "draw_id": record.draw_id,
                "outcome": decision.outcome,
                "report": report_path.display().to_string(),
            }),
        )?;

        Ok(RunSummary {
            run_id: run_id.to_string(),
            outcome: decision.outcome.into(),
            draw_id: record.draw_id,
            content_hash,
            reason: Some(decision.reason),
            sources: contributing,
            comparisons: comparisons.len(),
            offending: decision.offending.len(),
            failures,
            report_path: Some(report_path),
        })
    }

    /// Fetch and parse one source. The outer result carries fatal errors,
    /// the inner one a failure that only makes this source absent.
    async fn collect_source(
        &self,
        run_id: &str,
        source: &SourceConfig,
        events: &mut EventLog,
    ) -> PipelineResult<Result<Collected, SourceFailure>> {
        let candidates = match self.candidate_urls(source, events).await? {
            Ok(urls) => urls,
            Err(failure) => return Ok(Err(failure)),
        };

        let mut last_failure = None;
        for url in candidates {
            let fetch = match self.fetch_with_retries(source.id, &url, events).await? {
                Ok(fetch) => fetch,
                Err(e) => {
                    last_failure = Some(SourceFailure::from(e));
                    continue;
                }
            };

            let raw_path = self
                .artifacts
                .write_raw(run_id, source.id, &fetch)
                .map_err(PipelineError::Artifact)?;

            match source.parser.parse(&fetch, source.id) {
                Ok(outcome) => {
                    self.artifacts
                        .write_parsed(&raw_path, outcome.record())
                        .map_err(PipelineError::Artifact)?;
                    let record = outcome.record();
                    let fields = json!({
                        "source": source.id,
                        "parser": source.parser,
                        "url": url,
                        "draw_id": record.draw_id,
                        "prizes": record.prizes.len(),
                        "jackpots": record.jackpots.len(),
                        "missing": outcome.missing(),
                        "raw": raw_path.display().to_string(),
                    });
                    let event = if outcome.is_complete() {
                        "source_success"
                    } else {
                        "source_partial"
                    };
                    emit(events, event, fields)?;
                    return Ok(Ok(Collected { outcome, url }));
                }
                Err(e) => {
                    emit(
                        events,
                        "source_parse_error",
                        json!({
                            "source": source.id,
                            "url": url,
                            "error_kind": SourceFailure::Parse(e.clone()).kind(),
                            "message": e.to_string(),
                            "raw": raw_path.display().to_string(),
                        }),
                    )?;
                    last_failure = Some(SourceFailure::from(e));
                }
            }
        }

        Ok(Err(last_failure.unwrap_or_else(|| {
            ParseError::NoContent(format!("no candidate pages for {}", source.id)).into()
        })))
    }

    /// Pages to try for a source, in order.
    async fn candidate_urls(
        &self,
        source: &SourceConfig,
        events: &mut EventLog,
    ) -> PipelineResult<Result<Vec<String>, SourceFailure>> {
        if let Some(url) = self.config.override_for(source.id) {
            return Ok(Ok(vec![url.to_string()]));
        }
        if let Some(url) = &source.url {
            return Ok(Ok(vec![url.clone()]));
        }
        let Some(index_url) = &source.index_url else {
            return Err(ConfigurationError(format!("source {} has no url", source.id)).into());
        };

        let index = match self.fetch_with_retries(source.id, index_url, events).await? {
            Ok(index) => index,
            Err(e) => return Ok(Err(e.into())),
        };
        let urls = discover_article_urls(&index.body, &index.final_url, source.discover_limit);
        tracing::debug!("{} discovered {} article(s) on {index_url}", source.id, urls.len());
        if urls.is_empty() {
            return Ok(Err(ParseError::NoContent(index_url.clone()).into()));
        }
        Ok(Ok(urls))
    }

    /// Fetch with the configured retry budget and fixed backoff.
    ///
    /// A robots refusal is final on first sight.
    async fn fetch_with_retries(
        &self,
        source_id: SourceId,
        url: &str,
        events: &mut EventLog,
    ) -> PipelineResult<Result<RawFetch, FetchError>> {
        let attempts = self.config.retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self
                .fetcher
                .fetch(url, &self.config.user_agent, self.config.timeout())
                .await
            {
                Ok(fetch) => return Ok(Ok(fetch)),
                Err(e) => e,
            };

            emit(
                events,
                "source_fetch_error",
                json!({
                    "source": source_id,
                    "url": url,
                    "attempt": attempt,
                    "error_kind": SourceFailure::Fetch(err.clone()).kind(),
                    "message": err.to_string(),
                }),
            )?;

            if attempt >= attempts || matches!(err, FetchError::Blocked(_)) {
                return Ok(Err(err));
            }
            tokio::time::sleep(self.config.retry_backoff()).await;
        }
    }
}
