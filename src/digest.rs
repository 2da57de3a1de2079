//! Daily and weekly digest payloads and where they are delivered.
//!
//! Rendering and mail delivery live outside this crate; a [`DigestSink`]
//! receives the finished payload.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::info;

use crate::entities::deal;
use crate::error::PipelineError;
use crate::models::Stage;
use crate::normalize::nfc;
use crate::select::week_start;

pub const TOP_N: usize = 5;
const UNCLASSIFIED: &str = "미분류";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestItem {
    pub company: String,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub amount: Option<f64>,
    pub stage: Option<String>,
    pub investors: Option<String>,
    pub news_url: Option<String>,
    pub news_date: Option<NaiveDate>,
}

impl From<&deal::Model> for DigestItem {
    fn from(deal: &deal::Model) -> Self {
        Self {
            company: deal.company_name.clone(),
            industry: deal.industry.clone(),
            location: deal.location.clone(),
            amount: deal.amount,
            stage: deal.stage.clone(),
            investors: deal.investors.clone(),
            news_url: deal.news_url.clone(),
            news_date: deal.news_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyDigest {
    pub date: NaiveDate,
    pub total: usize,
    pub items: Vec<DigestItem>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub label: String,
    pub count: usize,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvestorCount {
    pub investor: String,
    pub deals: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyDigest {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub total_deals: usize,
    pub total_amount: f64,
    pub top_deals: Vec<DigestItem>,
    pub max_deal: Option<DigestItem>,
    pub industries: Vec<Breakdown>,
    pub stages: Vec<Breakdown>,
    pub top_investors: Vec<InvestorCount>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Digest {
    Daily(DailyDigest),
    Weekly(WeeklyDigest),
}

impl Digest {
    pub fn file_name(&self) -> String {
        match self {
            Digest::Daily(d) => format!("daily-{}.json", d.date),
            Digest::Weekly(w) => format!("weekly-{}.json", w.week_start),
        }
    }
}

/// `n errors encountered`, present only when the run had errors.
pub fn footer(errors: usize) -> Option<String> {
    (errors > 0).then(|| format!("{} errors encountered", errors))
}

/// Monday and Sunday of the week before the one containing `today`.
pub fn previous_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = week_start(today) - Duration::days(7);
    (monday, monday + Duration::days(6))
}

fn amount_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Deals dated `day`, newest first then largest first.
pub fn build_daily(deals: &[deal::Model], day: NaiveDate, errors: usize) -> DailyDigest {
    let mut selected: Vec<&deal::Model> = deals.iter().filter(|d| d.news_date == Some(day)).collect();
    selected.sort_by(|a, b| {
        b.news_date
            .cmp(&a.news_date)
            .then_with(|| amount_desc(a.amount, b.amount))
            .then_with(|| a.number.cmp(&b.number))
    });
    let items: Vec<DigestItem> = selected.into_iter().map(DigestItem::from).collect();
    DailyDigest {
        date: day,
        total: items.len(),
        items,
        footer: footer(errors),
    }
}

fn breakdown<'a>(deals: &[&'a deal::Model], key: impl Fn(&'a deal::Model) -> Option<String>) -> Vec<Breakdown> {
    let mut groups: HashMap<String, (usize, f64)> = HashMap::new();
    for deal in deals {
        let label = key(*deal)
            .map(|k| nfc(k.trim()))
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        let entry = groups.entry(label).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += deal.amount.unwrap_or(0.0);
    }
    let mut rows: Vec<Breakdown> = groups
        .into_iter()
        .map(|(label, (count, amount))| Breakdown {
            label,
            count,
            amount: round4(amount),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.amount.partial_cmp(&a.amount).unwrap_or(Ordering::Equal))
            .then_with(|| a.label.cmp(&b.label))
    });
    rows
}

/// Investors ranked by the number of deals they appear in.
pub fn top_investors(deals: &[&deal::Model], n: usize) -> Vec<InvestorCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for deal in deals {
        let names: HashSet<String> = deal
            .investors
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|name| nfc(name.trim()))
            .filter(|name| !name.is_empty())
            .collect();
        for name in names {
            *counts.entry(name).or_default() += 1;
        }
    }
    let mut ranked: Vec<InvestorCount> = counts
        .into_iter()
        .map(|(investor, deals)| InvestorCount { investor, deals })
        .collect();
    ranked.sort_by(|a, b| b.deals.cmp(&a.deals).then_with(|| a.investor.cmp(&b.investor)));
    ranked.truncate(n);
    ranked
}

/// Aggregates for the deals dated in [mon, sun].
pub fn build_weekly(
    deals: &[deal::Model],
    mon: NaiveDate,
    sun: NaiveDate,
    include_mna: bool,
    errors: usize,
) -> WeeklyDigest {
    let mna = Stage::MergerAcquisition.label();
    let mut week: Vec<&deal::Model> = deals
        .iter()
        .filter(|d| d.news_date.is_some_and(|date| date >= mon && date <= sun))
        .filter(|d| include_mna || d.stage.as_deref() != Some(mna))
        .collect();
    week.sort_by_key(|d| d.number);

    let total_amount = round4(week.iter().filter_map(|d| d.amount).sum());

    let mut by_amount: Vec<&deal::Model> = week.iter().copied().filter(|d| d.amount.is_some()).collect();
    by_amount.sort_by(|a, b| amount_desc(a.amount, b.amount).then_with(|| a.number.cmp(&b.number)));
    let top_deals: Vec<DigestItem> = by_amount.iter().take(TOP_N).map(|d| DigestItem::from(*d)).collect();

    WeeklyDigest {
        week_start: mon,
        week_end: sun,
        total_deals: week.len(),
        total_amount,
        max_deal: top_deals.first().cloned(),
        top_deals,
        industries: breakdown(&week, |d| d.industry.clone()),
        stages: breakdown(&week, |d| d.stage.clone()),
        top_investors: top_investors(&week, TOP_N),
        footer: footer(errors),
    }
}

/// Receives finished digests; mail delivery implements this outside the crate.
#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn deliver(&self, digest: &Digest) -> Result<(), PipelineError>;
}

/// Writes each digest as pretty JSON into a directory.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DigestSink for JsonFileSink {
    async fn deliver(&self, digest: &Digest) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(digest.file_name());
        let body = serde_json::to_vec_pretty(digest)?;
        tokio::fs::write(&path, body).await?;
        info!("Digest written to {}", path.display());
        Ok(())
    }
}

/// Logs the digest as a single structured event.
pub struct LogSink;

#[async_trait]
impl DigestSink for LogSink {
    async fn deliver(&self, digest: &Digest) -> Result<(), PipelineError> {
        let payload = serde_json::to_string(digest)?;
        info!(digest = %payload, "Digest ready");
        Ok(())
    }
}
