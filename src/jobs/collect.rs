//! Daily and weekly collection: discover, fetch, extract, select, store.

use chrono::{Duration, NaiveDate};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Pipeline, RunReport};
use crate::dates::needs_recovery;
use crate::digest::{build_daily, build_weekly, previous_week, Digest};
use crate::error::{ErrorClass, PipelineError};
use crate::models::{Article, CandidateUrl, DateWindow, ExtractedFacts};
use crate::normalize::earliest_news_date;
use crate::reconcile::is_acceptable;
use crate::roster::load_roster;
use crate::select::{score, select_canonical, ScoredArticle};
use crate::sources::ArticleFetch;
use crate::store::{DealRecord, UpsertOutcome};

/// Worth a deal row: the model was confident about something, or the
/// headline names the company next to a funding keyword.
pub fn is_deal_worthy(article: &Article, facts: &ExtractedFacts) -> bool {
    if facts.is_empty() || facts.company_name.trim().is_empty() {
        return false;
    }
    (score(facts) > 0 && facts.confidence > 0) || is_acceptable(&article.title, &facts.company_name)
}

fn group_by_source(candidates: Vec<CandidateUrl>) -> Vec<Vec<CandidateUrl>> {
    let mut by_source: BTreeMap<i32, Vec<CandidateUrl>> = BTreeMap::new();
    for candidate in candidates {
        by_source.entry(candidate.source_id).or_default().push(candidate);
    }
    by_source.into_values().collect()
}

async fn produce(
    fetch: Arc<dyn ArticleFetch>,
    candidates: Vec<CandidateUrl>,
    tx: mpsc::Sender<Article>,
    cancel: super::CancelFlag,
) -> (u32, Vec<PipelineError>) {
    let mut crawled = 0;
    let mut errors = Vec::new();
    for candidate in candidates {
        if cancel.is_cancelled() {
            break;
        }
        match fetch.fetch(&candidate).await {
            Ok(article) => {
                crawled += 1;
                if tx.send(article).await.is_err() {
                    break;
                }
            }
            Err(e) => errors.push(e),
        }
    }
    (crawled, errors)
}

impl Pipeline {
    pub async fn run_daily(&self, today: NaiveDate, report: &mut RunReport) -> Result<(), PipelineError> {
        let yesterday = today - Duration::days(1);
        self.collect(DateWindow::new(yesterday, today), &[], today, report).await?;

        let deals = self.store.list_day(yesterday).await?;
        let digest = build_daily(&deals, yesterday, report.error_count());
        info!("Daily digest for {}: {} deals", yesterday, digest.total);
        self.deliver(Digest::Daily(digest), report).await;
        Ok(())
    }

    pub async fn run_weekly(
        &self,
        today: NaiveDate,
        roster: Option<&Path>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let entries = match roster {
            Some(path) => match load_roster(path) {
                Ok(entries) => entries,
                Err(e) => {
                    report.record_error("roster", &e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let companies: Vec<String> = entries.iter().map(|e| e.company_name.clone()).collect();

        let window = DateWindow::new(today - Duration::days(7), today);
        self.collect(window, &companies, today, report).await?;

        if !entries.is_empty() {
            self.reconcile_entries(&entries, today, report).await?;
        }

        let (mon, sun) = previous_week(today);
        let deals = self.store.list_week(mon, sun).await?;
        let digest = build_weekly(&deals, mon, sun, self.config.digest_include_mna, report.error_count());
        info!("Weekly digest {}..{}: {} deals", mon, sun, digest.total_deals);
        self.deliver(Digest::Weekly(digest), report).await;
        Ok(())
    }

    async fn collect(
        &self,
        window: DateWindow,
        companies: &[String],
        today: NaiveDate,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let Some(discoverer) = &self.discoverer else {
            return Err(PipelineError::MissingConfig("discovery".to_string()));
        };
        let discovery = discoverer.discover(window, None, companies).await;
        for err in &discovery.errors {
            report.record_error("discovery", err);
        }
        info!("Discovered {} candidate articles", discovery.candidates.len());
        self.cancel.check()?;

        let scored = self.process_candidates(discovery.candidates, today, report).await?;
        self.persist(scored, today, report).await
    }

    /// Fetches candidates source by source and extracts facts as articles
    /// arrive. Articles are saved on the way through.
    pub async fn process_candidates(
        &self,
        candidates: Vec<CandidateUrl>,
        today: NaiveDate,
        report: &mut RunReport,
    ) -> Result<Vec<ScoredArticle>, PipelineError> {
        let extractor = Arc::clone(self.extractor()?);
        let (tx, mut rx) = mpsc::channel::<Article>(self.config.queue_capacity.max(1));

        let producers = join_all(group_by_source(candidates).into_iter().map(|list| {
            produce(Arc::clone(&self.fetch), list, tx.clone(), self.cancel.clone())
        }));
        drop(tx);

        let consumer = async move {
            let mut scored = Vec::new();
            let mut saved = 0u32;
            let mut errors = Vec::new();
            while let Some(mut article) = rx.recv().await {
                if self.cancel.is_cancelled() {
                    break;
                }
                if needs_recovery(article.published_date, today) {
                    article.published_date = match &self.dates {
                        Some(dates) => dates.resolve(article.published_date, &article.url, None, today).await,
                        None => None,
                    };
                }
                match self.store.save_article(&article, today).await {
                    Ok(true) => saved += 1,
                    Ok(false) => debug!("Article already stored: {}", article.url),
                    Err(e) => errors.push(e),
                }

                let facts = extractor.extract(&article, today).await;
                if !is_deal_worthy(&article, &facts) {
                    debug!("No deal in {}", article.url);
                    continue;
                }
                let rank = self.registry.rank_of(article.source_id);
                scored.push(ScoredArticle::new(article, facts, rank));
            }
            (scored, saved, errors)
        };

        let (results, (scored, saved, consumer_errors)) = tokio::join!(producers, consumer);

        for (crawled, errors) in results {
            report.run.counters.articles_crawled += crawled;
            for e in &errors {
                report.record_error("fetch", e);
            }
        }
        report.run.counters.articles_saved += saved;
        for e in &consumer_errors {
            report.record_error("store", e);
        }
        self.cancel.check()?;
        Ok(scored)
    }

    /// Picks one article per (company, date) and writes deals one at a time.
    pub async fn persist(
        &self,
        scored: Vec<ScoredArticle>,
        today: NaiveDate,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let canonical = select_canonical(scored);
        info!("{} canonical deals after selection", canonical.len());
        for item in canonical {
            self.cancel.check()?;
            self.write_deal(DealRecord::from_scored(&item), today, report).await?;
        }
        Ok(())
    }

    pub(crate) async fn write_deal(
        &self,
        record: DealRecord,
        today: NaiveDate,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let company = record.company_name.clone();
        let known = match self.store.find_company_between(&company, earliest_news_date(), today).await {
            Ok(rows) => !rows.is_empty(),
            Err(e) if e.class() == ErrorClass::Fatal => return Err(e),
            Err(e) => {
                report.record_error("store", &e);
                true
            }
        };
        match self.store.upsert_deal(record, today).await {
            Ok(outcome) => {
                report.deals_written += 1;
                if let UpsertOutcome::Inserted { number, .. } = outcome {
                    report.run.counters.deals_created += 1;
                    if !known {
                        report.run.counters.companies_new += 1;
                    }
                    debug!("Deal #{} created for {}", number, company);
                }
                Ok(())
            }
            Err(e) if e.class() == ErrorClass::Fatal => Err(e),
            Err(e) => {
                warn!("Could not store deal for {}: {}", company, e);
                report.record_error("store", &e);
                Ok(())
            }
        }
    }
}
