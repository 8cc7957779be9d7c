//! Per-source HTML parsers.
//!
//! Each [`ParserKind`] owns ordered lists of pure extraction strategies.
//! Strategies run in order and the first one yielding a non-empty result
//! wins, so a layout change on a mirror degrades to the next strategy
//! instead of failing the source. Parsers never interpret amounts; they
//! hand raw tokens to the normalizer.
//!
//! `scraper::Html` is `!Send`, so every entry point here is synchronous.

pub mod horas24;
pub mod pozos;
pub mod t13;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::ParseError;
use crate::model::{
    CategoryMap, ParseOutcome, PartialRecord, RawFetch, RawPrize, SourceId, SourceRecord,
};

/// Extraction strategy for prize breakdown rows.
pub type PrizeStrategy = fn(&Html) -> Vec<(String, RawPrize)>;

/// Extraction strategy for next-draw jackpot estimates.
pub type JackpotStrategy = fn(&Html) -> Vec<(String, String)>;

/// Closed set of supported page layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// T13 draw articles.
    T13,
    /// 24Horas draw articles.
    Horas24,
    /// Jackpot aggregators (OpenLoto, ResultadosLotoChile).
    PozoTable,
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParserKind::T13 => "t13",
            ParserKind::Horas24 => "horas24",
            ParserKind::PozoTable => "pozo_table",
        })
    }
}

impl ParserKind {
    pub fn prize_strategies(&self) -> &'static [PrizeStrategy] {
        match self {
            ParserKind::T13 => t13::PRIZE_STRATEGIES,
            ParserKind::Horas24 => horas24::PRIZE_STRATEGIES,
            ParserKind::PozoTable => &[],
        }
    }

    pub fn jackpot_strategies(&self) -> &'static [JackpotStrategy] {
        match self {
            ParserKind::PozoTable => pozos::JACKPOT_STRATEGIES,
            ParserKind::T13 | ParserKind::Horas24 => &[],
        }
    }

    /// Name of the amount collection this layout must yield.
    fn required_amounts(&self) -> &'static str {
        match self {
            ParserKind::PozoTable => "jackpots",
            ParserKind::T13 | ParserKind::Horas24 => "prizes",
        }
    }

    /// Parse one fetched page into a record for `source`.
    pub fn parse(&self, fetch: &RawFetch, source: SourceId) -> Result<ParseOutcome, ParseError> {
        if fetch.body.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }

        let document = Html::parse_document(&fetch.body);
        let text = page_text(&document);

        let prizes: CategoryMap<RawPrize> = first_non_empty(&document, self.prize_strategies())
            .into_iter()
            .collect();
        let jackpots: CategoryMap<String> =
            first_non_empty(&document, self.jackpot_strategies())
                .into_iter()
                .collect();
        let draw_id = extract_draw_id(&text);
        let draw_date = extract_draw_date(&text);

        if draw_id.is_none() && draw_date.is_none() && prizes.is_empty() && jackpots.is_empty() {
            return Err(ParseError::NoContent(fetch.url.clone()));
        }

        let mut missing = Vec::new();
        if draw_id.is_none() {
            missing.push("draw_id".to_string());
        }
        let has_amounts = match self {
            ParserKind::PozoTable => !jackpots.is_empty(),
            ParserKind::T13 | ParserKind::Horas24 => !prizes.is_empty(),
        };
        if !has_amounts {
            missing.push(self.required_amounts().to_string());
        }

        let record = SourceRecord {
            source,
            parser: *self,
            draw_id,
            draw_date,
            prizes,
            jackpots,
            fetched_at: fetch.fetched_at,
            url: fetch.url.clone(),
            content_hash: fetch.content_hash.clone(),
        };

        if missing.is_empty() {
            Ok(ParseOutcome::Complete(record))
        } else {
            tracing::debug!("{self} parse of {} incomplete: missing {missing:?}", fetch.url);
            Ok(ParseOutcome::Partial(PartialRecord { record, missing }))
        }
    }
}

/// Run strategies in order; the first non-empty result wins.
pub fn first_non_empty<T>(document: &Html, strategies: &[fn(&Html) -> Vec<T>]) -> Vec<T> {
    for strategy in strategies {
        let found = strategy(document);
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

// ── Shared text helpers ─────────────────────────────────────────────────────

/// Collapse runs of whitespace (including NBSP) into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn page_text(document: &Html) -> String {
    collapse_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" "))
}

/// Text of each `td`/`th` cell in a table row.
pub fn row_cells(row: &ElementRef<'_>) -> Vec<String> {
    let Ok(sel) = Selector::parse("td, th") else {
        return Vec::new();
    };
    row.select(&sel).map(|c| element_text(&c)).collect()
}

/// Whether a row looks like a "Categoría | Premio | Ganadores" header.
pub fn is_header_row(cells: &[String]) -> bool {
    let Some(first) = cells.first() else {
        return false;
    };
    let first = first.to_lowercase();
    let second = cells.get(1).map(|c| c.to_lowercase()).unwrap_or_default();
    first.contains("categor")
        && (second.contains("premio") || second.contains("monto") || second.contains("pozo"))
}

/// Prize rows from a table: category, amount token, winners token.
pub fn prize_rows_from_table(table: &ElementRef<'_>) -> Vec<(String, RawPrize)> {
    let Ok(row_sel) = Selector::parse("tr") else {
        return Vec::new();
    };
    table
        .select(&row_sel)
        .map(|row| row_cells(&row))
        .filter(|cells| cells.len() >= 3 && !is_header_row(cells))
        .filter(|cells| !cells[0].is_empty() && cells[1].chars().any(|c| c.is_ascii_digit()))
        .map(|cells| {
            (
                cells[0].clone(),
                RawPrize {
                    amount: cells[1].clone(),
                    winners: Some(cells[2].clone()),
                },
            )
        })
        .collect()
}

/// Amount token pattern: the whole run of digits and separators, ending on a
/// digit. Grouping is validated by `normalize::parse_amount`, never here.
pub(crate) const AMOUNT_PATTERN: &str = r"\d(?:[\d.,]*\d)?";

fn draw_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)sorteo\s*(?:n[°º.]?\s*|#\s*)?(\d{3,6})").expect("draw id regex is valid")
    })
}

/// Draw number from free text ("Sorteo 5322", "sorteo N° 5322").
pub fn extract_draw_id(text: &str) -> Option<u32> {
    draw_id_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

const SPANISH_MONTHS: &[(&str, u32)] = &[
    ("enero", 1),
    ("febrero", 2),
    ("marzo", 3),
    ("abril", 4),
    ("mayo", 5),
    ("junio", 6),
    ("julio", 7),
    ("agosto", 8),
    ("septiembre", 9),
    ("setiembre", 9),
    ("octubre", 10),
    ("noviembre", 11),
    ("diciembre", 12),
];

type DateStrategy = fn(&str) -> Option<NaiveDate>;

const DATE_STRATEGIES: &[DateStrategy] = &[spanish_long_date, iso_date, slashed_date];

/// Draw date from free text, trying each known format in turn.
pub fn extract_draw_date(text: &str) -> Option<NaiveDate> {
    DATE_STRATEGIES.iter().find_map(|s| s(text))
}

fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect()
}

fn spanish_long_date(text: &str) -> Option<NaiveDate> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})\s+de\s+([a-zñ]+)\s+(?:de|del)\s+(\d{4})")
            .expect("spanish date regex is valid")
    });
    let normalized = strip_accents(&text.to_lowercase());
    re.captures_iter(&normalized).find_map(|c| {
        let day: u32 = c[1].parse().ok()?;
        let month = SPANISH_MONTHS
            .iter()
            .find(|(name, _)| *name == &c[2])
            .map(|(_, m)| *m)?;
        let year: i32 = c[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

fn iso_date(text: &str) -> Option<NaiveDate> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date regex is valid")
    });
    re.captures_iter(text).find_map(|c| {
        NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)
    })
}

fn slashed_date(text: &str) -> Option<NaiveDate> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("slashed date regex is valid")
    });
    re.captures_iter(text).find_map(|c| {
        NaiveDate::from_ymd_opt(c[3].parse().ok()?, c[2].parse().ok()?, c[1].parse().ok()?)
    })
}

/// Result-article links from a 24Horas tag index page.
///
/// Keeps anchors pointing at draw result articles, resolved against
/// `base_url`, deduplicated in page order, at most `limit`.
pub fn discover_article_urls(index_html: &str, base_url: &str, limit: usize) -> Vec<String> {
    let document = Html::parse_document(index_html);
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = url::Url::parse(base_url).ok();

    let mut urls: Vec<String> = Vec::new();
    for element in document.select(&sel) {
        if urls.len() >= limit {
            break;
        }
        let href = element.value().attr("href").unwrap_or("").trim();
        if !href.contains("resultados-loto-sorteo") {
            continue;
        }
        let resolved = match &base {
            Some(base) => match base.join(href) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            },
            None => href.to_string(),
        };
        if !urls.contains(&resolved) {
            urls.push(resolved);
        }
    }
    urls
}
