//! 24Horas draw articles.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

use super::{element_text, prize_rows_from_table, PrizeStrategy, AMOUNT_PATTERN};
use crate::model::RawPrize;

pub const PRIZE_STRATEGIES: &[PrizeStrategy] = &[first_table, inline_rows];

/// Rows of the first table in the article.
pub fn first_table(document: &Html) -> Vec<(String, RawPrize)> {
    let Ok(sel) = Selector::parse("table") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .next()
        .map(|table| prize_rows_from_table(&table))
        .unwrap_or_default()
}

fn inline_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?P<cat>\p{{L}}[\p{{L}}\s()+]*?)\s*\$\s*(?P<amount>{AMOUNT_PATTERN})\s+(?P<winners>\d+)"
        ))
        .expect("24horas inline regex is valid")
    })
}

/// `Categoría $monto ganadores` runs inside paragraph text.
pub fn inline_rows(document: &Html) -> Vec<(String, RawPrize)> {
    let Ok(sel) = Selector::parse("p") else {
        return Vec::new();
    };
    let re = inline_regex();
    let mut rows = Vec::new();
    for paragraph in document.select(&sel) {
        let text = element_text(&paragraph);
        for caps in re.captures_iter(&text) {
            rows.push((
                caps["cat"].trim().to_string(),
                RawPrize {
                    amount: caps["amount"].to_string(),
                    winners: Some(caps["winners"].to_string()),
                },
            ));
        }
    }
    rows
}
