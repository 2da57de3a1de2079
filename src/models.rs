use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Closed vocabulary of investment rounds stored in `deals.stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "시드")]
    Seed,
    #[serde(rename = "프리A")]
    PreA,
    #[serde(rename = "시리즈A")]
    SeriesA,
    #[serde(rename = "시리즈B")]
    SeriesB,
    #[serde(rename = "시리즈C")]
    SeriesC,
    #[serde(rename = "시리즈D+")]
    SeriesDPlus,
    #[serde(rename = "프리IPO")]
    PreIpo,
    #[serde(rename = "브릿지")]
    Bridge,
    #[serde(rename = "M&A")]
    MergerAcquisition,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Seed,
        Stage::PreA,
        Stage::SeriesA,
        Stage::SeriesB,
        Stage::SeriesC,
        Stage::SeriesDPlus,
        Stage::PreIpo,
        Stage::Bridge,
        Stage::MergerAcquisition,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Seed => "시드",
            Stage::PreA => "프리A",
            Stage::SeriesA => "시리즈A",
            Stage::SeriesB => "시리즈B",
            Stage::SeriesC => "시리즈C",
            Stage::SeriesDPlus => "시리즈D+",
            Stage::PreIpo => "프리IPO",
            Stage::Bridge => "브릿지",
            Stage::MergerAcquisition => "M&A",
        }
    }

    pub fn from_label(label: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.label() == label)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single crawled news item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub source_id: i32,
    pub source_name: String,
    pub source_base_url: String,
    pub title: String,
    pub url: String,
    pub published_date: Option<NaiveDate>,
    pub snippet: Option<String>,
    pub raw_body: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Where a candidate URL was first seen. Lower variants are trusted more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Listing,
    Sitemap,
    SearchApi,
    WebSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateUrl {
    pub url: String,
    pub title_hint: Option<String>,
    pub source_id: i32,
    pub published_date: Option<NaiveDate>,
    pub snippet: Option<String>,
    pub origin: Origin,
}

/// Deal facts pulled out of one article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub company_name: String,
    pub ceo: Option<String>,
    pub founded: Option<NaiveDate>,
    pub industry: Option<String>,
    pub stage: Option<Stage>,
    pub investors: Option<String>,
    /// 억원
    pub amount: Option<f64>,
    /// 억원
    pub total_funding: Option<f64>,
    pub location: Option<String>,
    pub employees: Option<i32>,
    pub confidence: u8,
}

impl ExtractedFacts {
    pub fn is_empty(&self) -> bool {
        self.company_name.trim().is_empty()
    }
}

/// One row of the weekly curated funding list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub company_name: String,
    pub sector: Option<String>,
    pub stage: Option<String>,
    pub listed_amount: Option<String>,
    pub primary_investor: Option<String>,
    pub week_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub articles_crawled: u32,
    pub articles_saved: u32,
    pub deals_created: u32,
    pub companies_new: u32,
    pub errors: u32,
}

/// One invocation of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub counters: RunCounters,
}

impl CollectionRun {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::InProgress,
            counters: RunCounters::default(),
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}
