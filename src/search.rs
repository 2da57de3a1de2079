//! Search back-ends used to find articles that listings did not surface.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{NewsSearchSettings, RetryPolicy, WebSearchSettings};
use crate::error::PipelineError;
use crate::http::HttpFetcher;
use crate::models::{CandidateUrl, Origin};
use crate::normalize::{bare_host, normalize_date, normalize_url};
use crate::registry::{SourceRegistry, FALLBACK_SOURCE_ID};
use crate::retry::with_retries;
use crate::sources::SourceAdapter;

/// Result page cap of the news search API.
pub const NEWS_PAGE_SIZE: u32 = 100;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

/// A search result, before it is tied to a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub pub_date: Option<NaiveDate>,
    pub snippet: Option<String>,
}

impl SearchHit {
    pub fn into_candidate(self, registry: &SourceRegistry, origin: Origin) -> Option<CandidateUrl> {
        let url = normalize_url(&self.url, None)?;
        let source_id = registry
            .source_for_url(&url)
            .map(|s| s.source_id)
            .unwrap_or(FALLBACK_SOURCE_ID);
        Some(CandidateUrl {
            url,
            title_hint: Some(self.title),
            source_id,
            published_date: self.pub_date,
            snippet: self.snippet,
            origin,
        })
    }
}

/// Site search on one registered source.
#[async_trait]
pub trait SiteSearch: Send + Sync {
    async fn search_site(&self, source_id: i32, query: &str) -> Result<Vec<CandidateUrl>, PipelineError>;
}

#[async_trait]
pub trait NewsSearch: Send + Sync {
    async fn search_news(&self, query: &str) -> Result<Vec<SearchHit>, PipelineError>;
}

/// General web search restricted to the given domains.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search_web(&self, query: &str, domains: &[String]) -> Result<Vec<SearchHit>, PipelineError>;
}

/// Site search through the registered adapters.
pub struct AdapterSiteSearch {
    adapters: HashMap<i32, SourceAdapter>,
}

impl AdapterSiteSearch {
    pub fn new(registry: &SourceRegistry, fetcher: Arc<HttpFetcher>) -> Self {
        let adapters = registry
            .enabled()
            .filter(|s| s.search_url_template.is_some())
            .map(|s| (s.source_id, SourceAdapter::new(s.clone(), Arc::clone(&fetcher))))
            .collect();
        Self { adapters }
    }
}

#[async_trait]
impl SiteSearch for AdapterSiteSearch {
    async fn search_site(&self, source_id: i32, query: &str) -> Result<Vec<CandidateUrl>, PipelineError> {
        match self.adapters.get(&source_id) {
            Some(adapter) => adapter.search(query).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Removes markup and the handful of entities the news API leaves in titles.
pub fn clean_markup(raw: &str) -> String {
    let text = TAG_RE.replace_all(raw, "");
    text.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    items: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "pubDate", default)]
    pub_date: String,
}

impl From<NewsItem> for SearchHit {
    fn from(item: NewsItem) -> Self {
        let url = if item.originallink.trim().is_empty() {
            item.link
        } else {
            item.originallink
        };
        let snippet = clean_markup(&item.description);
        SearchHit {
            title: clean_markup(&item.title),
            url,
            pub_date: normalize_date(&item.pub_date),
            snippet: Some(snippet).filter(|s| !s.is_empty()),
        }
    }
}

/// Korean news search API authenticated with a client id/secret pair.
pub struct NewsApiClient {
    client: Client,
    settings: NewsSearchSettings,
    retry: RetryPolicy,
}

impl NewsApiClient {
    pub fn new(client: Client, settings: NewsSearchSettings, retry: RetryPolicy) -> Self {
        Self {
            client,
            settings,
            retry,
        }
    }

    async fn query_once(&self, query: &str) -> Result<Vec<SearchHit>, PipelineError> {
        let display = NEWS_PAGE_SIZE.to_string();
        let response = self
            .client
            .get(&self.settings.url)
            .query(&[("query", query), ("display", display.as_str()), ("sort", "sim")])
            .header("X-Naver-Client-Id", &self.settings.client_id)
            .header("X-Naver-Client-Secret", &self.settings.client_secret)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(PipelineError::Http(format!("news search returned {}", status)));
        }
        if !status.is_success() {
            return Err(PipelineError::SourceUnavailable {
                source: "news search".to_string(),
                reason: format!("status {}", status),
            });
        }
        let body: NewsResponse = response.json().await?;
        Ok(body.items.into_iter().map(SearchHit::from).collect())
    }
}

#[async_trait]
impl NewsSearch for NewsApiClient {
    #[tracing::instrument(skip(self))]
    async fn search_news(&self, query: &str) -> Result<Vec<SearchHit>, PipelineError> {
        let hits = with_retries(&self.retry, "news search", || self.query_once(query)).await?;
        debug!("News search '{}' returned {} hits", query, hits.len());
        Ok(hits)
    }
}

#[derive(Debug, Deserialize)]
struct WebResponse {
    #[serde(rename = "webPages", default)]
    web_pages: Option<WebPages>,
}

#[derive(Debug, Deserialize)]
struct WebPages {
    #[serde(default)]
    value: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebPage {
    name: String,
    url: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(rename = "datePublished", default)]
    date_published: Option<String>,
}

/// Web search API keyed by a subscription header.
pub struct WebSearchClient {
    client: Client,
    settings: WebSearchSettings,
    retry: RetryPolicy,
}

impl WebSearchClient {
    pub fn new(client: Client, settings: WebSearchSettings, retry: RetryPolicy) -> Self {
        Self {
            client,
            settings,
            retry,
        }
    }

    async fn query_once(&self, query: &str) -> Result<Vec<SearchHit>, PipelineError> {
        let response = self
            .client
            .get(&self.settings.url)
            .query(&[("q", query), ("count", "50"), ("mkt", "ko-KR")])
            .header("Ocp-Apim-Subscription-Key", &self.settings.api_key)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(PipelineError::Http(format!("web search returned {}", status)));
        }
        if !status.is_success() {
            return Err(PipelineError::SourceUnavailable {
                source: "web search".to_string(),
                reason: format!("status {}", status),
            });
        }
        let body: WebResponse = response.json().await?;
        Ok(body
            .web_pages
            .map(|p| p.value)
            .unwrap_or_default()
            .into_iter()
            .map(|page| SearchHit {
                title: clean_markup(&page.name),
                url: page.url,
                pub_date: page.date_published.as_deref().and_then(normalize_date),
                snippet: page.snippet,
            })
            .collect())
    }
}

/// Keeps hits whose host is one of `domains` or a subdomain of one.
pub fn restrict_to_domains(hits: Vec<SearchHit>, domains: &[String]) -> Vec<SearchHit> {
    hits.into_iter()
        .filter(|hit| {
            bare_host(&hit.url)
                .map(|host| domains.iter().any(|d| host == *d || host.ends_with(&format!(".{d}"))))
                .unwrap_or(false)
        })
        .collect()
}

#[async_trait]
impl WebSearch for WebSearchClient {
    #[tracing::instrument(skip(self, domains))]
    async fn search_web(&self, query: &str, domains: &[String]) -> Result<Vec<SearchHit>, PipelineError> {
        let scoped = if domains.is_empty() {
            query.to_string()
        } else {
            let sites: Vec<String> = domains.iter().map(|d| format!("site:{d}")).collect();
            format!("{} ({})", query, sites.join(" OR "))
        };
        let hits = with_retries(&self.retry, "web search", || self.query_once(&scoped)).await?;
        let total = hits.len();
        let kept = restrict_to_domains(hits, domains);
        if kept.len() < total {
            warn!("Dropped {} web results outside the registry", total - kept.len());
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_is_removed() {
        assert_eq!(clean_markup("<b>뤼튼</b> 시리즈B &quot;투자&quot;"), "뤼튼 시리즈B \"투자\"");
    }

    #[test]
    fn domain_filter_accepts_subdomains() {
        let hits = vec![
            SearchHit {
                title: "a".into(),
                url: "https://news.platum.kr/x".into(),
                pub_date: None,
                snippet: None,
            },
            SearchHit {
                title: "b".into(),
                url: "https://blog.example.com/y".into(),
                pub_date: None,
                snippet: None,
            },
        ];
        let kept = restrict_to_domains(hits, &["platum.kr".to_string()]);
        assert_eq!(kept.len(), 1);
    }
}
