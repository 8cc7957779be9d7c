//! Merge per-source records into one canonical record.
//!
//! Field resolution is by source priority: the first record (primary
//! before fallback) that supplies a logical field wins and is recorded in
//! provenance. Every token of every participating record is parsed, so a
//! garbled value fails the run even when a higher-priority source shadows
//! it.

use std::collections::BTreeMap;

use crate::error::DataIntegrityError;
use crate::model::{
    category_key, FieldKey, JackpotRow, NormalizedRecord, PrizeRow, Provenance, SourceId,
    SourceRecord,
};

/// Parsed values per logical field, in priority order.
pub type FieldObservations = BTreeMap<FieldKey, Vec<(SourceId, u64)>>;

/// Output of [`merge`].
#[derive(Debug, Clone)]
pub struct Merged {
    pub record: NormalizedRecord,
    pub observations: FieldObservations,
    /// Sources dropped because they describe a different draw.
    pub excluded: Vec<SourceId>,
}

const MILLION: u64 = 1_000_000;

/// Parse a CLP amount token such as `"$1.234.567"` or `"1234567"`.
///
/// Thousands separators (`.` or `,`, used consistently, groups of three),
/// a leading `$`, `CLP` and trailing `pesos` are accepted, as is a trailing
/// `millones` multiplier. Anything else is [`DataIntegrityError::MalformedAmount`];
/// there is no fallback to zero.
pub fn parse_amount(field: &str, token: &str) -> Result<u64, DataIntegrityError> {
    let malformed = || DataIntegrityError::MalformedAmount {
        field: field.to_string(),
        token: token.to_string(),
    };

    let lowered = token.trim().to_lowercase();
    let mut s = lowered.as_str();
    s = s.strip_prefix("clp").unwrap_or(s).trim_start();
    s = s.strip_prefix('$').unwrap_or(s).trim_start();
    s = s.strip_suffix("pesos").unwrap_or(s).trim_end();
    s = s.strip_suffix("clp").unwrap_or(s).trim_end();

    let mut multiplier = 1;
    if let Some(rest) = s.strip_suffix("millones") {
        s = rest.trim_end();
        multiplier = MILLION;
    }

    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    parse_grouped(&compact)
        .and_then(|v| v.checked_mul(multiplier))
        .ok_or_else(malformed)
}

/// Parse a winner-count token. Blank and dash placeholders mean "not reported".
pub fn parse_count(field: &str, token: &str) -> Result<Option<u64>, DataIntegrityError> {
    let trimmed = token.trim();
    if matches!(trimmed, "" | "-" | "–" | "—") {
        return Ok(None);
    }
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    parse_grouped(&compact)
        .map(Some)
        .ok_or_else(|| DataIntegrityError::MalformedAmount {
            field: field.to_string(),
            token: token.to_string(),
        })
}

fn parse_grouped(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok();
    }
    let sep = match (s.contains('.'), s.contains(',')) {
        (true, false) => '.',
        (false, true) => ',',
        _ => return None,
    };
    let groups: Vec<&str> = s.split(sep).collect();
    let well_formed = groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit()))
        && (1..=3).contains(&groups[0].len())
        && groups[1..].iter().all(|g| g.len() == 3);
    if !well_formed {
        return None;
    }
    groups.concat().parse().ok()
}

fn provenance_of(record: &SourceRecord) -> Provenance {
    Provenance {
        source: record.source,
        url: record.url.clone(),
        fetched_at: record.fetched_at,
    }
}

fn priority_rank(priority: &[SourceId], source: SourceId) -> usize {
    priority
        .iter()
        .position(|s| *s == source)
        .unwrap_or(priority.len())
}

/// Merge records into a [`NormalizedRecord`] using `priority` order.
pub fn merge(
    records: &[SourceRecord],
    priority: &[SourceId],
) -> Result<Merged, DataIntegrityError> {
    let mut ordered: Vec<&SourceRecord> = records.iter().collect();
    ordered.sort_by_key(|r| priority_rank(priority, r.source));

    let Some(draw_source) = ordered.iter().find(|r| r.draw_id.is_some()) else {
        return Err(DataIntegrityError::MissingRequiredField(FieldKey::DrawId.to_string()));
    };
    let draw_id = draw_source.draw_id.unwrap_or_default();

    let mut provenance: BTreeMap<String, Provenance> = BTreeMap::new();
    provenance.insert(FieldKey::DrawId.to_string(), provenance_of(draw_source));

    let mut participants = Vec::new();
    let mut excluded = Vec::new();
    for record in ordered {
        match record.draw_id {
            Some(other) if other != draw_id => {
                tracing::warn!(
                    "{} reports draw {other} but resolved draw is {draw_id}; excluding it",
                    record.source
                );
                excluded.push(record.source);
            }
            _ => participants.push(record),
        }
    }

    let mut draw_date = None;
    if let Some(r) = participants.iter().find(|r| r.draw_date.is_some()) {
        draw_date = r.draw_date;
        provenance.insert(FieldKey::DrawDate.to_string(), provenance_of(r));
    }

    let mut observations: FieldObservations = BTreeMap::new();
    let mut prizes: Vec<PrizeRow> = Vec::new();
    let mut jackpots: Vec<JackpotRow> = Vec::new();
    // Winner counts resolve independently of amounts.
    let mut winners_source: BTreeMap<String, (u64, &SourceRecord)> = BTreeMap::new();

    for record in &participants {
        for (label, raw) in record.prizes.iter() {
            let key = category_key(label);
            let amount_field = FieldKey::prize(label);
            let amount = parse_amount(&amount_field.to_string(), &raw.amount)?;
            observations
                .entry(amount_field.clone())
                .or_default()
                .push((record.source, amount));

            if !prizes.iter().any(|p| category_key(&p.category) == key) {
                prizes.push(PrizeRow {
                    category: label.to_string(),
                    amount,
                    winners: None,
                });
                provenance.insert(amount_field.to_string(), provenance_of(record));
            }

            if let Some(token) = &raw.winners {
                let winners_field = FieldKey::winners(label);
                if let Some(count) = parse_count(&winners_field.to_string(), token)? {
                    observations
                        .entry(winners_field)
                        .or_default()
                        .push((record.source, count));
                    winners_source.entry(key).or_insert((count, *record));
                }
            }
        }

        for (label, token) in record.jackpots.iter() {
            let key = category_key(label);
            let field = FieldKey::jackpot(label);
            let amount = parse_amount(&field.to_string(), token)?;
            observations
                .entry(field.clone())
                .or_default()
                .push((record.source, amount));

            if !jackpots.iter().any(|j| category_key(&j.category) == key) {
                jackpots.push(JackpotRow {
                    category: label.to_string(),
                    amount,
                });
                provenance.insert(field.to_string(), provenance_of(record));
            }
        }
    }

    for row in prizes.iter_mut() {
        if let Some((count, record)) = winners_source.get(&category_key(&row.category)) {
            row.winners = Some(*count);
            provenance.insert(
                FieldKey::winners(&row.category).to_string(),
                provenance_of(record),
            );
        }
    }

    if prizes.is_empty() && jackpots.is_empty() {
        return Err(DataIntegrityError::MissingRequiredField("amounts".to_string()));
    }

    Ok(Merged {
        record: NormalizedRecord {
            draw_id,
            draw_date,
            prizes,
            jackpots,
            provenance,
        },
        observations,
        excluded,
    })
}
