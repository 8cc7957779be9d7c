// Copyright 2026 Polla Transparency Contributors
// SPDX-License-Identifier: MIT

//! Polla ingestion library: polite multi-source retrieval of Chilean Loto
//! draw and jackpot data, cross-source reconciliation, and an auditable
//! publish-or-quarantine decision per draw.
//!
//! A run visits each configured source in priority order, parses whatever
//! pages it can, merges the records field by field, compares the sources
//! and writes the outcome to an append-only artifact tree.

pub mod artifacts;
pub mod config;
pub mod decision;
pub mod error;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod parse;
pub mod pipeline;
pub mod reconcile;
pub mod state;
pub mod telemetry;

pub use artifacts::ArtifactStore;
pub use config::{PipelineConfig, SourceConfig};
pub use decision::{decide, DecisionFlags};
pub use error::{
    ConfigurationError, DataIntegrityError, FetchError, ParseError, PipelineError, PipelineResult,
    SourceFailure, StateStoreError,
};
pub use fetch::{Fetch, HttpFetcher};
pub use model::*;
pub use parse::ParserKind;
pub use pipeline::{Pipeline, RunOutcome, RunSummary};
pub use state::Ledger;
