//! Completeness scoring and canonical article selection.

use chrono::{Datelike, Duration, NaiveDate};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{Article, ExtractedFacts};
use crate::normalize::normalize_company;

/// Highest possible [`score`].
pub const MAX_SCORE: u8 = 11;

/// Field completeness: amount 3, investors 3, stage 2, industry, location and employees 1 each.
pub fn score(facts: &ExtractedFacts) -> u8 {
    let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    let mut total = 0;
    if facts.amount.is_some() {
        total += 3;
    }
    if filled(&facts.investors) {
        total += 3;
    }
    if facts.stage.is_some() {
        total += 2;
    }
    if filled(&facts.industry) {
        total += 1;
    }
    if filled(&facts.location) {
        total += 1;
    }
    if facts.employees.is_some() {
        total += 1;
    }
    total
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// An article together with what was extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredArticle {
    pub article: Article,
    pub facts: ExtractedFacts,
    pub score: u8,
    /// Registry rank of the source, 1 most authoritative.
    pub source_rank: u32,
}

impl ScoredArticle {
    pub fn new(article: Article, facts: ExtractedFacts, source_rank: u32) -> Self {
        let score = score(&facts);
        Self {
            article,
            facts,
            score,
            source_rank,
        }
    }

    /// `(normalized company, week Monday)`; articles without a date share one bucket per company.
    pub fn group_key(&self) -> (String, Option<NaiveDate>) {
        (
            normalize_company(&self.facts.company_name),
            self.article.published_date.map(week_start),
        )
    }
}

/// Total order used to pick the canonical article; `Less` means preferred.
pub fn preference(a: &ScoredArticle, b: &ScoredArticle) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.article.title.chars().count().cmp(&a.article.title.chars().count()))
        .then_with(|| b.article.published_date.cmp(&a.article.published_date))
        .then_with(|| a.source_rank.cmp(&b.source_rank))
        .then_with(|| a.article.url.cmp(&b.article.url))
}

/// One canonical article per (company, week), ordered by group key.
///
/// Records with an empty company name are left out.
pub fn select_canonical(articles: Vec<ScoredArticle>) -> Vec<ScoredArticle> {
    let mut groups: BTreeMap<(String, Option<NaiveDate>), ScoredArticle> = BTreeMap::new();
    for candidate in articles {
        let key = candidate.group_key();
        if key.0.is_empty() {
            continue;
        }
        match groups.get(&key) {
            Some(current) if preference(&candidate, current) != Ordering::Less => {}
            _ => {
                groups.insert(key, candidate);
            }
        }
    }
    groups.into_values().collect()
}
