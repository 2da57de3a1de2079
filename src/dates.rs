//! Publication date recovery for articles whose listing carried no usable date.
//!
//! Evidence is tried from most to least reliable: meta tags, `<time>`,
//! date-looking elements, the URL itself, and finally a grounded model read of
//! the live page. A date that is already inside [2020-01-01, today] is never
//! replaced.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::html::{parse_selector, visible_text};
use crate::http::HttpFetcher;
use crate::llm::{strip_code_fence, LlmClient, LlmRequest};
use crate::normalize::{date_in_text, is_valid_news_date, normalize_date, ymd};
use crate::registry::SourceRegistry;
use crate::retry::with_retries;

/// Meta tags consulted in order; `(attribute, value)`.
const META_TAGS: &[(&str, &str)] = &[
    ("property", "article:published_time"),
    ("name", "pubdate"),
    ("property", "og:published_time"),
    ("itemprop", "datePublished"),
];

static DATEISH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(date|time|publish|byline)").expect("dateish regex"));
static URL_SLASHED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(20\d{2})/(\d{1,2})/(\d{1,2})(?:/|$|[?#])").expect("slashed url date regex"));
static URL_COMPACT_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(20\d{2})(\d{2})(\d{2})(?:/|$|[?#])").expect("compact url date regex"));
static URL_QUERY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]date=(\d{4})-(\d{2})-(\d{2})").expect("query url date regex"));
static URL_NUMERIC_SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/=](20\d{2})(\d{2})(\d{2})\d+(?:$|[/?&#.])").expect("numeric slug regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateEvidence {
    MetaTag,
    TimeElement,
    DateElement,
    UrlPattern,
    Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredDate {
    pub date: NaiveDate,
    pub evidence: DateEvidence,
}

impl RecoveredDate {
    fn new(date: NaiveDate, evidence: DateEvidence) -> Self {
        Self { date, evidence }
    }
}

/// True when the date is missing or outside the accepted range.
pub fn needs_recovery(date: Option<NaiveDate>, today: NaiveDate) -> bool {
    !date.is_some_and(|d| is_valid_news_date(d, today))
}

/// Strict ISO-8601 reading used for meta and `datetime` values.
fn iso_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let looks_iso = raw.len() >= 10
        && raw.as_bytes()[4] == b'-'
        && raw.as_bytes()[7] == b'-'
        && raw[..4].chars().all(|c| c.is_ascii_digit());
    if !looks_iso {
        return None;
    }
    normalize_date(raw)
}

/// Meta tags first, then `<time datetime>`.
pub fn date_from_meta(document: &Html, today: NaiveDate) -> Option<RecoveredDate> {
    for (attr, value) in META_TAGS {
        let Some(selector) = parse_selector(&format!("meta[{}=\"{}\"]", attr, value)) else {
            continue;
        };
        let found = document
            .select(&selector)
            .filter_map(|m| m.value().attr("content"))
            .filter_map(iso_date)
            .find(|d| is_valid_news_date(*d, today));
        if let Some(date) = found {
            return Some(RecoveredDate::new(date, DateEvidence::MetaTag));
        }
    }
    let selector = parse_selector("time[datetime]")?;
    document
        .select(&selector)
        .filter_map(|t| t.value().attr("datetime"))
        .filter_map(iso_date)
        .find(|d| is_valid_news_date(*d, today))
        .map(|date| RecoveredDate::new(date, DateEvidence::TimeElement))
}

/// Elements whose class or id looks date-related, read as Korean or numeric dates.
pub fn date_from_elements(document: &Html, today: NaiveDate) -> Option<RecoveredDate> {
    let selector = parse_selector("[class], [id]")?;
    document
        .select(&selector)
        .filter(|element| {
            let value = element.value();
            value.attr("class").is_some_and(|c| DATEISH_RE.is_match(c))
                || value.attr("id").is_some_and(|i| DATEISH_RE.is_match(i))
        })
        .filter_map(|element| date_in_text(&visible_text(element)))
        .find(|d| is_valid_news_date(*d, today))
        .map(|date| RecoveredDate::new(date, DateEvidence::DateElement))
}

pub fn date_from_html(html: &str, today: NaiveDate) -> Option<RecoveredDate> {
    let document = Html::parse_document(html);
    date_from_meta(&document, today).or_else(|| date_from_elements(&document, today))
}

/// Dates embedded in article URLs.
pub fn date_from_url(url: &str, today: NaiveDate) -> Option<RecoveredDate> {
    let slashed = URL_SLASHED_RE.captures(url);
    let compact = URL_COMPACT_SEGMENT_RE.captures(url);
    let query = URL_QUERY_RE.captures(url);
    [slashed, compact, query]
        .into_iter()
        .flatten()
        .filter_map(|caps| ymd(&caps[1], &caps[2], &caps[3]))
        .find(|d| is_valid_news_date(*d, today))
        .or_else(|| {
            URL_NUMERIC_SLUG_RE
                .captures_iter(url)
                .filter(|caps| caps[1].parse::<i32>().is_ok_and(|y| (2020..=2027).contains(&y)))
                .filter_map(|caps| ymd(&caps[1], &caps[2], &caps[3]))
                .find(|d| is_valid_news_date(*d, today))
        })
        .map(|date| RecoveredDate::new(date, DateEvidence::UrlPattern))
}

/// Reads `{"published_date": ..., "source": ...}` out of a model reply.
pub fn parse_llm_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = strip_code_fence(raw);
    let value: Value = serde_json::from_str(text).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        serde_json::from_str(text.get(start..=end)?).ok()
    })?;
    value
        .get("published_date")
        .and_then(Value::as_str)
        .and_then(normalize_date)
        .filter(|d| is_valid_news_date(*d, today))
}

pub struct DateRecoverer {
    fetcher: Arc<HttpFetcher>,
    registry: Arc<SourceRegistry>,
    llm: Option<Arc<dyn LlmClient>>,
    retry: RetryPolicy,
}

impl DateRecoverer {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        registry: Arc<SourceRegistry>,
        llm: Option<Arc<dyn LlmClient>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            registry,
            llm,
            retry,
        }
    }

    /// Keeps `current` when it is valid; otherwise tries to recover a date.
    ///
    /// An out-of-range `current` that cannot be replaced becomes `None`.
    pub async fn resolve(
        &self,
        current: Option<NaiveDate>,
        url: &str,
        html: Option<&str>,
        today: NaiveDate,
    ) -> Option<NaiveDate> {
        if !needs_recovery(current, today) {
            return current;
        }
        self.recover(url, html, today).await.map(|r| r.date)
    }

    #[tracing::instrument(skip(self, html))]
    pub async fn recover(&self, url: &str, html: Option<&str>, today: NaiveDate) -> Option<RecoveredDate> {
        let fetched;
        let html = match html {
            Some(html) => Some(html),
            None => {
                fetched = self.fetch_page(url).await;
                fetched.as_deref()
            }
        };

        let recovered = html
            .and_then(|h| date_from_html(h, today))
            .or_else(|| date_from_url(url, today));
        if let Some(found) = recovered {
            debug!("Recovered {} for {} from {:?}", found.date, url, found.evidence);
            return Some(found);
        }

        let found = self.ask_model(url, today).await.map(|date| RecoveredDate::new(date, DateEvidence::Llm));
        match found {
            Some(r) => info!("Model located publication date {} for {}", r.date, url),
            None => debug!("No publication date found for {}", url),
        }
        found
    }

    async fn fetch_page(&self, url: &str) -> Option<String> {
        let gate = match self.registry.source_for_url(url) {
            Some(source) => self.fetcher.gate_for_source(source),
            None => self.fetcher.gate_for_url(url),
        };
        match self.fetcher.fetch(url, &gate).await {
            Ok(page) => Some(page.body),
            Err(e) => {
                debug!("Could not fetch {} for date recovery: {}", url, e);
                None
            }
        }
    }

    async fn ask_model(&self, url: &str, today: NaiveDate) -> Option<NaiveDate> {
        let llm = self.llm.as_ref()?;
        let request = LlmRequest {
            system: "You look up Korean news articles and report when they were first published.".to_string(),
            prompt: format!(
                "Open the news article at {url} and find its original publication date.\n\
                 Reply with JSON only: {{\"published_date\": \"YYYY-MM-DD\", \"source\": \"<publisher name>\"}}.\n\
                 Use null for published_date if the page does not state it."
            ),
            max_output_tokens: 512,
        };
        match with_retries(&self.retry, "date lookup", || llm.complete_grounded(&request)).await {
            Ok(raw) => parse_llm_date(&raw, today),
            Err(e) => {
                warn!("Date lookup for {} failed: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn iso_date_requires_dashes() {
        assert!(iso_date("2026-01-15T09:00:00+09:00").is_some());
        assert!(iso_date("Jan 15, 2026").is_none());
    }

    #[test]
    fn compact_segment_in_url() {
        let found = date_from_url("https://example.com/news/20260110/", today()).unwrap();
        assert_eq!(found.date, NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
    }

    #[test]
    fn numeric_slug_prefix() {
        let found = date_from_url("https://example.com/articleView.html?idxno=2025121512345", today()).unwrap();
        assert_eq!(found.date, NaiveDate::from_ymd_opt(2025, 12, 15).unwrap());
    }

    #[test]
    fn llm_reply_with_prose_around_json() {
        let raw = "Here it is: {\"published_date\": \"2026-02-03\", \"source\": \"플래텀\"}";
        assert_eq!(parse_llm_date(raw, today()), NaiveDate::from_ymd_opt(2026, 2, 3));
    }
}
