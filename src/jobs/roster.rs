//! Roster reconciliation: find an article for every curated entry the
//! store does not already cover, then store it as a deal.

use chrono::{Duration, NaiveDate};
use std::path::Path;
use tracing::{debug, info};

use super::{Pipeline, RunReport};
use crate::dates::needs_recovery;
use crate::error::PipelineError;
use crate::models::{ExtractedFacts, RosterEntry};
use crate::normalize::normalize_company;
use crate::reconcile::Resolution;
use crate::roster::{enrich_from_roster, load_roster};
use crate::store::DealRecord;

/// How far back a stored deal counts as covering a roster entry.
pub const COVERAGE_DAYS: i64 = 14;

/// The roster names the company; the article may spell it differently.
fn align_company(facts: &mut ExtractedFacts, entry: &RosterEntry) {
    if normalize_company(&facts.company_name) != normalize_company(&entry.company_name) {
        facts.company_name = entry.company_name.clone();
    }
}

impl Pipeline {
    pub async fn run_reconcile(&self, path: &Path, today: NaiveDate, report: &mut RunReport) -> Result<(), PipelineError> {
        let entries = load_roster(path)?;
        self.reconcile_entries(&entries, today, report).await
    }

    pub async fn reconcile_entries(
        &self,
        entries: &[RosterEntry],
        today: NaiveDate,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let Some(reconciler) = &self.reconciler else {
            return Err(PipelineError::MissingConfig("reconciler".to_string()));
        };
        let extractor = self.extractor()?;

        let from = today - Duration::days(COVERAGE_DAYS);
        let mut uncovered = Vec::new();
        for entry in entries {
            match self.store.find_company_between(&entry.company_name, from, today).await {
                Ok(rows) if !rows.is_empty() => debug!("{} already stored", entry.company_name),
                Ok(_) => uncovered.push(entry.clone()),
                Err(e) => {
                    report.record_error("store", &e);
                    uncovered.push(entry.clone());
                }
            }
        }
        info!("{} of {} roster entries need reconciling", uncovered.len(), entries.len());
        self.cancel.check()?;

        for outcome in reconciler.reconcile(&uncovered).await {
            self.cancel.check()?;
            let Resolution::Resolved { article, strategy } = &outcome.resolution else {
                report.unresolved.push(outcome);
                continue;
            };
            info!("{} resolved via {}: {}", outcome.entry.company_name, strategy.tag(), article.url);
            report.run.counters.articles_crawled += 1;

            let mut article = article.clone();
            if needs_recovery(article.published_date, today) {
                if let Some(dates) = &self.dates {
                    article.published_date = dates.resolve(article.published_date, &article.url, None, today).await;
                }
            }
            match self.store.save_article(&article, today).await {
                Ok(true) => report.run.counters.articles_saved += 1,
                Ok(false) => {}
                Err(e) => report.record_error("store", &e),
            }

            let mut facts = extractor.extract(&article, today).await;
            enrich_from_roster(&mut facts, &outcome.entry);
            align_company(&mut facts, &outcome.entry);
            self.write_deal(DealRecord::from_parts(&article, &facts), today, report).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> RosterEntry {
        RosterEntry {
            company_name: name.to_string(),
            sector: None,
            stage: None,
            listed_amount: None,
            primary_investor: None,
            week_label: None,
        }
    }

    #[test]
    fn roster_spelling_wins_when_names_differ() {
        let mut facts = ExtractedFacts {
            company_name: "Wrtn".to_string(),
            ..ExtractedFacts::default()
        };
        align_company(&mut facts, &entry("뤼튼테크놀로지스"));
        assert_eq!(facts.company_name, "뤼튼테크놀로지스");

        let mut facts = ExtractedFacts {
            company_name: "(주)뤼튼".to_string(),
            ..ExtractedFacts::default()
        };
        align_company(&mut facts, &entry("뤼튼"));
        assert_eq!(facts.company_name, "(주)뤼튼");
    }
}
