//! Core data types flowing through the pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::parse::ParserKind;

/// Version tag embedded in every persisted artifact.
pub const API_VERSION: &str = "v1";

/// Identity of a configured source. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Primary,
    Fallback,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Primary => "primary",
            SourceId::Fallback => "fallback",
        }
    }

    /// Parse a source id as written in configuration overrides.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(SourceId::Primary),
            "fallback" => Some(SourceId::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex-encoded SHA-256 of a string.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize a category label into its comparison key.
///
/// Trims, collapses inner whitespace and lowercases, so "Súper  Quina "
/// and "súper quina" address the same category.
pub fn category_key(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Body of one HTTP retrieval.
#[derive(Debug, Clone)]
pub struct RawFetch {
    pub url: String,
    pub final_url: String,
    pub user_agent: String,
    pub fetched_at: DateTime<Utc>,
    pub body: String,
    pub content_hash: String,
}

impl RawFetch {
    pub fn new(url: &str, final_url: &str, user_agent: &str, body: String) -> Self {
        let content_hash = sha256_hex(&body);
        Self {
            url: url.to_string(),
            final_url: final_url.to_string(),
            user_agent: user_agent.to_string(),
            fetched_at: Utc::now(),
            body,
            content_hash,
        }
    }
}

/// Insertion-ordered map keyed by normalized category.
///
/// A repeated category keeps its first value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMap<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for CategoryMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> CategoryMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the category is already present. Returns whether it was inserted.
    pub fn insert(&mut self, label: &str, value: T) -> bool {
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        if label.is_empty() {
            return false;
        }
        let key = category_key(&label);
        if self.entries.iter().any(|(l, _)| category_key(l) == key) {
            return false;
        }
        self.entries.push((label, value));
        true
    }

    pub fn get(&self, label: &str) -> Option<&T> {
        let key = category_key(label);
        self.entries
            .iter()
            .find(|(l, _)| category_key(l) == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> FromIterator<(String, T)> for CategoryMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = CategoryMap::new();
        for (label, value) in iter {
            map.insert(&label, value);
        }
        map
    }
}

/// Prize row as scraped, before numeric interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPrize {
    pub amount: String,
    pub winners: Option<String>,
}

/// What one parser extracted from one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: SourceId,
    pub parser: ParserKind,
    pub draw_id: Option<u32>,
    pub draw_date: Option<NaiveDate>,
    pub prizes: CategoryMap<RawPrize>,
    pub jackpots: CategoryMap<String>,
    pub fetched_at: DateTime<Utc>,
    pub url: String,
    pub content_hash: String,
}

/// A record missing at least one required field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialRecord {
    pub record: SourceRecord,
    pub missing: Vec<String>,
}

/// Result of parsing one page.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Complete(SourceRecord),
    Partial(PartialRecord),
}

impl ParseOutcome {
    pub fn record(&self) -> &SourceRecord {
        match self {
            ParseOutcome::Complete(r) => r,
            ParseOutcome::Partial(p) => &p.record,
        }
    }

    pub fn into_record(self) -> SourceRecord {
        match self {
            ParseOutcome::Complete(r) => r,
            ParseOutcome::Partial(p) => p.record,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ParseOutcome::Complete(_))
    }

    pub fn missing(&self) -> &[String] {
        match self {
            ParseOutcome::Complete(_) => &[],
            ParseOutcome::Partial(p) => &p.missing,
        }
    }
}

/// Canonical logical field. The derived order is the comparison order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
    DrawId,
    DrawDate,
    PrizeAmount(String),
    Winners(String),
    Jackpot(String),
}

impl FieldKey {
    fn rank(&self) -> u8 {
        match self {
            FieldKey::DrawId => 0,
            FieldKey::DrawDate => 1,
            FieldKey::PrizeAmount(_) => 2,
            FieldKey::Winners(_) => 3,
            FieldKey::Jackpot(_) => 4,
        }
    }

    fn category(&self) -> Option<&str> {
        match self {
            FieldKey::PrizeAmount(c) | FieldKey::Winners(c) | FieldKey::Jackpot(c) => Some(c),
            _ => None,
        }
    }

    pub fn prize(label: &str) -> Self {
        FieldKey::PrizeAmount(category_key(label))
    }

    pub fn winners(label: &str) -> Self {
        FieldKey::Winners(category_key(label))
    }

    pub fn jackpot(label: &str) -> Self {
        FieldKey::Jackpot(category_key(label))
    }
}

impl Ord for FieldKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.category().cmp(&other.category()))
    }
}

impl PartialOrd for FieldKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::DrawId => f.write_str("draw_id"),
            FieldKey::DrawDate => f.write_str("draw_date"),
            FieldKey::PrizeAmount(c) => write!(f, "prize:{c}"),
            FieldKey::Winners(c) => write!(f, "winners:{c}"),
            FieldKey::Jackpot(c) => write!(f, "jackpot:{c}"),
        }
    }
}

impl Serialize for FieldKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One row of the merged prize breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeRow {
    pub category: String,
    pub amount: u64,
    pub winners: Option<u64>,
}

/// One next-draw jackpot estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JackpotRow {
    pub category: String,
    pub amount: u64,
}

/// Which source supplied a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: SourceId,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

/// The merged, canonical record for one draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub draw_id: u32,
    pub draw_date: Option<NaiveDate>,
    pub prizes: Vec<PrizeRow>,
    pub jackpots: Vec<JackpotRow>,
    pub provenance: BTreeMap<String, Provenance>,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    draw_id: u32,
    draw_date: Option<NaiveDate>,
    prizes: &'a [PrizeRow],
    jackpots: &'a [JackpotRow],
}

impl NormalizedRecord {
    /// SHA-256 of the record's data, excluding provenance.
    pub fn content_hash(&self) -> String {
        let content = HashedContent {
            draw_id: self.draw_id,
            draw_date: self.draw_date,
            prizes: &self.prizes,
            jackpots: &self.jackpots,
        };
        // Serializing plain structs of strings and integers cannot fail.
        let json = serde_json::to_string(&content).unwrap_or_default();
        sha256_hex(&json)
    }

    /// Sources that contributed at least one surviving field.
    pub fn contributing_sources(&self) -> Vec<SourceId> {
        let mut ids: Vec<SourceId> = self.provenance.values().map(|p| p.source).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Cross-source check of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub field: FieldKey,
    pub primary_value: u64,
    pub fallback_value: u64,
    pub relative_deviation: f64,
    pub exceeds_threshold: bool,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Publish,
    Quarantine,
    PublishForced,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Publish => "publish",
            Outcome::Quarantine => "quarantine",
            Outcome::PublishForced => "publish_forced",
        }
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, Outcome::Publish | Outcome::PublishForced)
    }
}

/// The run's decision, with the comparisons that drove it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason: String,
    pub offending: Vec<ComparisonResult>,
    pub single_source: Option<SourceId>,
}

/// One line of the idempotency ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_id: String,
    pub draw_id: u32,
    pub content_hash: String,
    pub decision: Outcome,
    pub recorded_at: DateTime<Utc>,
}
