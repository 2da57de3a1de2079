//! Weekly roster CSV: `기업명, 주요사업, 투자자, 단계, 신규, 주차`.

use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::models::{ExtractedFacts, RosterEntry};
use crate::normalize::{nfc, normalize_amount, normalize_stage};

const COMPANY_HEADER: &str = "기업명";

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "기업명")]
    company: String,
    #[serde(rename = "주요사업", default)]
    sector: Option<String>,
    #[serde(rename = "투자자", default)]
    investor: Option<String>,
    #[serde(rename = "단계", default)]
    stage: Option<String>,
    #[serde(rename = "신규", default)]
    amount: Option<String>,
    #[serde(rename = "주차", default)]
    week: Option<String>,
}

fn cell(value: Option<String>) -> Option<String> {
    value.map(|v| nfc(v.trim())).filter(|v| !v.is_empty())
}

pub fn parse_roster<R: Read>(reader: R) -> Result<Vec<RosterEntry>, PipelineError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: csv::StringRecord = csv
        .headers()?
        .iter()
        .map(|h| nfc(h.trim_start_matches('\u{feff}')))
        .collect();
    csv.set_headers(headers.clone());
    if !headers.iter().any(|h| h == COMPANY_HEADER) {
        return Err(PipelineError::RosterUnparseable(format!(
            "missing {} column (found: {})",
            COMPANY_HEADER,
            headers.iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let mut entries = Vec::new();
    for row in csv.deserialize::<RosterRow>() {
        let row = row?;
        let Some(company_name) = cell(Some(row.company)) else {
            debug!("Skipping roster row without company name");
            continue;
        };
        entries.push(RosterEntry {
            company_name,
            sector: cell(row.sector),
            stage: cell(row.stage),
            listed_amount: cell(row.amount),
            primary_investor: cell(row.investor),
            week_label: cell(row.week),
        });
    }
    Ok(entries)
}

pub fn load_roster(path: &Path) -> Result<Vec<RosterEntry>, PipelineError> {
    let file = std::fs::File::open(path)
        .map_err(|e| PipelineError::RosterUnparseable(format!("{}: {}", path.display(), e)))?;
    let entries = parse_roster(file)?;
    info!("Loaded {} roster entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Fills facts the article did not state from the roster row it resolved.
pub fn enrich_from_roster(facts: &mut ExtractedFacts, entry: &RosterEntry) {
    if facts.company_name.trim().is_empty() {
        facts.company_name = entry.company_name.clone();
    }
    if facts.industry.is_none() {
        facts.industry = entry.sector.clone();
    }
    if facts.stage.is_none() {
        facts.stage = entry.stage.as_deref().and_then(normalize_stage);
    }
    if facts.investors.is_none() {
        facts.investors = entry.primary_investor.clone();
    }
    if facts.amount.is_none() {
        facts.amount = entry.listed_amount.as_deref().and_then(normalize_amount);
    }
}
