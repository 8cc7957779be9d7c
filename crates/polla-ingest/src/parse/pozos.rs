//! Next-draw jackpot aggregators (OpenLoto, ResultadosLotoChile).

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

use super::{element_text, is_header_row, row_cells, JackpotStrategy, AMOUNT_PATTERN};

pub const JACKPOT_STRATEGIES: &[JackpotStrategy] = &[key_value_table, text_amounts];

/// Two-column `categoría | monto` rows of the first table.
pub fn key_value_table(document: &Html) -> Vec<(String, String)> {
    let (Ok(table_sel), Ok(row_sel)) = (Selector::parse("table"), Selector::parse("tr")) else {
        return Vec::new();
    };
    let Some(table) = document.select(&table_sel).next() else {
        return Vec::new();
    };
    table
        .select(&row_sel)
        .map(|row| row_cells(&row))
        .filter(|cells| cells.len() >= 2 && !is_header_row(cells))
        // Rows without digits are section labels, not data.
        .filter(|cells| !cells[0].is_empty() && cells[1].chars().any(|c| c.is_ascii_digit()))
        .map(|cells| (cells[0].clone(), cells[1].clone()))
        .collect()
}

fn text_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^(?P<cat>\p{{L}}[\p{{L}}\s]*?)\s*:?\s*\$\s*(?P<amount>(?:{AMOUNT_PATTERN})(?:\s+millones)?)"
        ))
        .expect("pozo text regex is valid")
    })
}

/// `Categoría: $monto` lines in paragraphs and list items.
pub fn text_amounts(document: &Html) -> Vec<(String, String)> {
    let Ok(sel) = Selector::parse("p, li") else {
        return Vec::new();
    };
    let re = text_regex();
    document
        .select(&sel)
        .filter_map(|el| {
            let text = element_text(&el);
            let caps = re.captures(&text)?;
            Some((caps["cat"].trim().to_string(), caps["amount"].to_string()))
        })
        .collect()
}
