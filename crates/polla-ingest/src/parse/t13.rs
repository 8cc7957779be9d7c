//! T13 draw articles.
//!
//! Results live in a table following the "Ganadores" heading; older
//! articles list them as `Categoría: $monto ganadores` paragraphs.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

use super::{element_text, prize_rows_from_table, PrizeStrategy, AMOUNT_PATTERN};
use crate::model::RawPrize;

pub const PRIZE_STRATEGIES: &[PrizeStrategy] = &[heading_table, paragraph_rows];

/// First table after the first heading mentioning "ganadores".
pub fn heading_table(document: &Html) -> Vec<(String, RawPrize)> {
    let Ok(sel) = Selector::parse("h2, h3, h4, table") else {
        return Vec::new();
    };
    let mut seen_heading = false;
    for element in document.select(&sel) {
        if element.value().name() == "table" {
            if seen_heading {
                return prize_rows_from_table(&element);
            }
        } else if element_text(&element).to_lowercase().contains("ganadores") {
            seen_heading = true;
        }
    }
    Vec::new()
}

fn paragraph_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^(?P<cat>[^:$]{{2,60}}?):\s*\$?\s*(?P<amount>{AMOUNT_PATTERN})(?:\s+pesos)?(?:\s+(?P<winners>\d+))?"
        ))
        .expect("t13 paragraph regex is valid")
    })
}

/// `Categoría: $monto [pesos] [ganadores]` lines in paragraphs and list items.
pub fn paragraph_rows(document: &Html) -> Vec<(String, RawPrize)> {
    let Ok(sel) = Selector::parse("p, li") else {
        return Vec::new();
    };
    let re = paragraph_regex();
    document
        .select(&sel)
        .filter_map(|el| {
            let text = element_text(&el);
            let caps = re.captures(&text)?;
            Some((
                caps["cat"].trim().to_string(),
                RawPrize {
                    amount: caps["amount"].to_string(),
                    winners: caps.name("winners").map(|m| m.as_str().to_string()),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawFetch, SourceId};
    use crate::parse::ParserKind;
    use chrono::NaiveDate;

    const TABLE_ARTICLE: &str = r#"
    <html><head><title>Resultados Loto sorteo 5198</title></head><body>
      <h1>Revisa los resultados del sorteo 5198 del Loto</h1>
      <p>Domingo 1 de diciembre de 2024</p>
      <table><tr><td>Publicidad</td><td>$1</td><td>1</td></tr></table>
      <h2>Ganadores y premios</h2>
      <table>
        <tr><th>Categoría</th><th>Premio</th><th>Ganadores</th></tr>
        <tr><td>Loto</td><td>$1.550.000.000</td><td>0</td></tr>
        <tr><td>Súper Quina</td><td>$12.345.678</td><td>1</td></tr>
        <tr><td>Terna</td><td>$1.000</td><td>5.432</td></tr>
      </table>
    </body></html>"#;

    const PARAGRAPH_ARTICLE: &str = r#"
    <html><body>
      <h1>Loto: resultados del sorteo 5322</h1>
      <h3>Estos son los ganadores</h3>
      <p>Loto: $2.100.000.000 0</p>
      <p>Quina: $450.000 pesos 3</p>
      <p>Terna: $1.000 2100</p>
      <p>Texto sin premio.</p>
    </body></html>"#;

    #[test]
    fn test_heading_table_skips_tables_before_heading() {
        let doc = Html::parse_document(TABLE_ARTICLE);
        let rows = heading_table(&doc);
        let names: Vec<&str> = rows.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["Loto", "Súper Quina", "Terna"]);
        assert_eq!(rows[0].1.amount, "$1.550.000.000");
        assert_eq!(rows[2].1.winners.as_deref(), Some("5.432"));
    }

    #[test]
    fn test_paragraph_rows() {
        let doc = Html::parse_document(PARAGRAPH_ARTICLE);
        assert!(heading_table(&doc).is_empty());
        let rows = paragraph_rows(&doc);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].0, "Quina");
        assert_eq!(rows[1].1.amount, "450.000");
        assert_eq!(rows[1].1.winners.as_deref(), Some("3"));
    }

    #[test]
    fn test_t13_parse_complete_record() {
        let fetch = RawFetch::new(
            "https://t13.test/5198",
            "https://t13.test/5198",
            "ua",
            TABLE_ARTICLE.into(),
        );
        let outcome = ParserKind::T13.parse(&fetch, SourceId::Primary).unwrap();
        assert!(outcome.is_complete());
        let record = outcome.record();
        assert_eq!(record.draw_id, Some(5198));
        assert_eq!(record.draw_date, NaiveDate::from_ymd_opt(2024, 12, 1));
        assert_eq!(record.prizes.len(), 3);
        assert!(record.jackpots.is_empty());
    }

    #[test]
    fn test_t13_falls_back_to_paragraphs() {
        let fetch = RawFetch::new(
            "https://t13.test/5322",
            "https://t13.test/5322",
            "ua",
            PARAGRAPH_ARTICLE.into(),
        );
        let outcome = ParserKind::T13.parse(&fetch, SourceId::Primary).unwrap();
        assert_eq!(outcome.record().draw_id, Some(5322));
        assert_eq!(outcome.record().prizes.len(), 3);
    }

    #[test]
    fn test_paragraph_amount_token_is_taken_whole() {
        let html = r#"<html><body>
            <p>Loto: $1,550,000,000 0</p>
            <p>Quina: $12.34 3</p>
        </body></html>"#;
        let rows = paragraph_rows(&Html::parse_document(html));
        assert_eq!(rows[0].1.amount, "1,550,000,000");
        assert_eq!(rows[0].1.winners.as_deref(), Some("0"));
        assert_eq!(rows[1].1.amount, "12.34");

        let fetch = RawFetch::new("https://t13.test/1", "https://t13.test/1", "ua", html.into());
        let mut record = ParserKind::T13
            .parse(&fetch, SourceId::Primary)
            .unwrap()
            .into_record();
        record.draw_id = Some(1);
        let err = crate::normalize::merge(&[record], &[SourceId::Primary]).unwrap_err();
        assert_eq!(
            err,
            crate::error::DataIntegrityError::MalformedAmount {
                field: "prize:quina".to_string(),
                token: "12.34".to_string(),
            }
        );
    }
}
