//! Listing, site search and article fetching for one media source.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use scraper::Html;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::dates::date_from_meta;
use crate::error::{PipelineError, Transience};
use crate::html::{
    first_date_within, first_href, first_matching, first_text, first_text_within, page_title, parse_selector, site_name,
    visible_text,
};
use crate::http::{Gate, HttpFetcher};
use crate::models::{Article, CandidateUrl, Origin};
use crate::normalize::{bare_host, normalize_url};
use crate::registry::{Source, SourceRegistry, FALLBACK_SOURCE_ID, FALLBACK_SOURCE_NAME};

/// Shortest body text accepted from a body selector.
pub const MIN_BODY_CHARS: usize = 200;
const MAX_EMPTY_PAGES: u32 = 3;

/// One parsed listing or search results page.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Elements matched by the article selector cascade.
    pub containers: usize,
    pub candidates: Vec<CandidateUrl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArticle {
    pub title: Option<String>,
    pub body: String,
    pub published_date: Option<NaiveDate>,
}

fn same_site(url: &str, source: &Source) -> bool {
    match (bare_host(url), source.host()) {
        (Some(host), Some(site)) => host == site || host.ends_with(&format!(".{site}")),
        _ => false,
    }
}

/// Extracts article links from a listing page using the source's cascades.
///
/// Only links on the source's own host are kept.
pub fn parse_listing(html: &str, source: &Source, page_url: &str, origin: Origin) -> Listing {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let selectors = &source.selectors;
    let containers = first_matching(&document, &selectors.article);

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for container in &containers {
        let href = first_href(*container, &selectors.link).or_else(|| {
            (container.value().name() == "a")
                .then(|| container.value().attr("href").map(str::to_string))
                .flatten()
        });
        let Some(url) = href.and_then(|h| normalize_url(&h, base.as_ref())) else {
            continue;
        };
        if !same_site(&url, source) || !seen.insert(url.clone()) {
            continue;
        }
        let title_hint = first_text_within(*container, &selectors.title);
        let published_date = first_date_within(*container, &selectors.date);
        candidates.push(CandidateUrl {
            url,
            title_hint,
            source_id: source.source_id,
            published_date,
            snippet: None,
            origin,
        });
    }

    Listing {
        containers: containers.len(),
        candidates,
    }
}

/// Title, body and date of an article page.
///
/// The body is the text of the first body selector whose text reaches
/// [`MIN_BODY_CHARS`].
pub fn parse_article(html: &str, source: &Source, url: &str, today: NaiveDate) -> Result<ParsedArticle, PipelineError> {
    let document = Html::parse_document(html);
    let selectors = &source.selectors;

    let title = first_text(&document, &selectors.article_title).or_else(|| page_title(&document));

    let body = selectors
        .body
        .iter()
        .filter_map(|raw| parse_selector(raw))
        .find_map(|selector| {
            document
                .select(&selector)
                .map(visible_text)
                .find(|text| text.chars().count() >= MIN_BODY_CHARS)
        })
        .ok_or_else(|| PipelineError::ContentSelectorMissed(url.to_string()))?;

    let published_date = first_date_within(document.root_element(), &selectors.article_date)
        .or_else(|| date_from_meta(&document, today).map(|r| r.date));

    Ok(ParsedArticle {
        title,
        body,
        published_date,
    })
}

fn unavailable(url: &str, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::ArticleUnavailable { .. } | PipelineError::ContentSelectorMissed(_) => err,
        other => PipelineError::ArticleUnavailable {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}

pub struct SourceAdapter {
    source: Source,
    fetcher: Arc<HttpFetcher>,
    gate: Gate,
}

impl SourceAdapter {
    pub fn new(source: Source, fetcher: Arc<HttpFetcher>) -> Self {
        let gate = fetcher.gate_for_source(&source);
        Self { source, fetcher, gate }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Walks listing pages newest-first until `max_pages`, an empty tail, or
    /// a page whose dated items all predate `since`.
    #[tracing::instrument(skip(self), fields(source = %self.source.display_name))]
    pub async fn list_articles(&self, since: NaiveDate, max_pages: u32) -> Result<Vec<CandidateUrl>, PipelineError> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut empty_pages = 0;

        for page in 1..=max_pages.max(1) {
            let page_url = self.source.listing_url(page);
            let fetched = match self.fetcher.fetch(&page_url, &self.gate).await {
                Ok(fetched) => fetched,
                Err(e) if page == 1 || e.is_transient() => {
                    return Err(PipelineError::SourceUnavailable {
                        source: self.source.display_name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    debug!("Listing ended at page {}: {}", page, e);
                    break;
                }
            };

            let listing = parse_listing(&fetched.body, &self.source, &fetched.final_url, Origin::Listing);
            if listing.containers == 0 {
                empty_pages += 1;
                warn!("No listing elements on page {} ({} in a row)", page, empty_pages);
                if empty_pages >= MAX_EMPTY_PAGES {
                    if found.is_empty() {
                        return Err(PipelineError::SourceUnavailable {
                            source: self.source.display_name.clone(),
                            reason: format!("listing selectors matched nothing on {} consecutive pages", MAX_EMPTY_PAGES),
                        });
                    }
                    break;
                }
                continue;
            }
            empty_pages = 0;

            let dated = listing.candidates.iter().filter(|c| c.published_date.is_some()).count();
            let stale = listing
                .candidates
                .iter()
                .filter(|c| c.published_date.is_some_and(|d| d < since))
                .count();
            for candidate in listing.candidates {
                if candidate.published_date.is_some_and(|d| d < since) {
                    continue;
                }
                if seen.insert(candidate.url.clone()) {
                    found.push(candidate);
                }
            }
            if dated > 0 && stale == dated {
                debug!("Page {} is older than {}, stopping", page, since);
                break;
            }
        }

        info!("Listed {} candidate articles", found.len());
        Ok(found)
    }

    /// Site search results, parsed with the listing cascade.
    #[tracing::instrument(skip(self), fields(source = %self.source.display_name))]
    pub async fn search(&self, query: &str) -> Result<Vec<CandidateUrl>, PipelineError> {
        let Some(search_url) = self.source.search_url(query) else {
            return Ok(Vec::new());
        };
        let fetched = self.fetcher.fetch(&search_url, &self.gate).await?;
        let listing = parse_listing(&fetched.body, &self.source, &fetched.final_url, Origin::Listing);
        debug!("Site search '{}' returned {} results", query, listing.candidates.len());
        Ok(listing.candidates)
    }

    #[tracing::instrument(skip(self, hint), fields(source = %self.source.display_name))]
    pub async fn fetch_article(&self, url: &str, hint: Option<&CandidateUrl>) -> Result<Article, PipelineError> {
        let page = self.fetcher.fetch(url, &self.gate).await.map_err(|e| unavailable(url, e))?;
        let today = Utc::now().date_naive();
        let parsed = parse_article(&page.body, &self.source, url, today)?;

        let title = parsed
            .title
            .or_else(|| hint.and_then(|h| h.title_hint.clone()))
            .ok_or_else(|| PipelineError::ArticleUnavailable {
                url: url.to_string(),
                reason: "page has no title".to_string(),
            })?;

        Ok(Article {
            source_id: self.source.source_id,
            source_name: self.source.display_name.clone(),
            source_base_url: self.source.base_url.clone(),
            title,
            url: url.to_string(),
            published_date: parsed.published_date.or_else(|| hint.and_then(|h| h.published_date)),
            snippet: hint.and_then(|h| h.snippet.clone()),
            raw_body: Some(parsed.body),
            fetched_at: Utc::now(),
        })
    }
}

/// Readable text of an arbitrary page plus its `og:site_name`.
#[derive(Debug, Clone)]
pub struct ReadablePage {
    pub title: Option<String>,
    pub text: String,
    pub site_name: Option<String>,
}

/// Readability extraction for pages outside the registry's selector tables.
pub fn readable_page(html: &str, url: &str) -> Result<ReadablePage, PipelineError> {
    let parsed_url = Url::parse(url).map_err(|e| PipelineError::ArticleUnavailable {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let document = Html::parse_document(html);
    let site = site_name(&document);
    let fallback_title = page_title(&document);

    let mut cursor = Cursor::new(html.as_bytes());
    let product = llm_readability::extractor::extract(&mut cursor, &parsed_url).map_err(|e| {
        PipelineError::ArticleUnavailable {
            url: url.to_string(),
            reason: format!("readability failed: {}", e),
        }
    })?;
    // The product carries no title of its own; read it back from the cleaned markup.
    let title = page_title(&Html::parse_document(&product.content)).or(fallback_title);
    let text = html2md::rewrite_html(&product.content, false);

    Ok(ReadablePage {
        title,
        text: text.trim().to_string(),
        site_name: site,
    })
}

/// Fetches a search hit that may live outside the registry.
///
/// Registered hosts go through their adapter; anything else is read with
/// readability and attributed through `og:site_name`, else to source 99.
#[tracing::instrument(skip(fetcher, registry, hint))]
pub async fn fetch_any(
    fetcher: &Arc<HttpFetcher>,
    registry: &SourceRegistry,
    url: &str,
    hint: Option<&CandidateUrl>,
) -> Result<Article, PipelineError> {
    if let Some(source) = registry.source_for_url(url) {
        let adapter = SourceAdapter::new(source.clone(), Arc::clone(fetcher));
        match adapter.fetch_article(url, hint).await {
            Ok(article) => return Ok(article),
            Err(PipelineError::ContentSelectorMissed(_)) => {
                debug!("Selectors missed on {}, falling back to readability", url);
            }
            Err(e) => return Err(e),
        }
    }

    let gate = fetcher.gate_for_url(url);
    let page = fetcher.fetch(url, &gate).await.map_err(|e| unavailable(url, e))?;
    let body = page.body;
    let owned_url = url.to_string();
    let readable = tokio::task::spawn_blocking(move || readable_page(&body, &owned_url))
        .await
        .map_err(|e| PipelineError::ArticleUnavailable {
            url: url.to_string(),
            reason: e.to_string(),
        })??;

    let source = registry
        .source_for_url(url)
        .or_else(|| readable.site_name.as_deref().and_then(|n| registry.source_for_site_name(n)));
    let (source_id, source_name, source_base_url) = match source {
        Some(s) => (s.source_id, s.display_name.clone(), s.base_url.clone()),
        None => {
            let origin = Url::parse(url)
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_default();
            (FALLBACK_SOURCE_ID, FALLBACK_SOURCE_NAME.to_string(), origin)
        }
    };

    let title = readable
        .title
        .or_else(|| hint.and_then(|h| h.title_hint.clone()))
        .ok_or_else(|| PipelineError::ArticleUnavailable {
            url: url.to_string(),
            reason: "page has no title".to_string(),
        })?;
    let raw_body = Some(readable.text).filter(|t| !t.is_empty());

    Ok(Article {
        source_id,
        source_name,
        source_base_url,
        title,
        url: url.to_string(),
        published_date: hint.and_then(|h| h.published_date),
        snippet: hint.and_then(|h| h.snippet.clone()),
        raw_body,
        fetched_at: Utc::now(),
    })
}

/// Turns a candidate URL into an article; the seam the reconciler fetches through.
#[async_trait]
pub trait ArticleFetch: Send + Sync {
    async fn fetch(&self, candidate: &CandidateUrl) -> Result<Article, PipelineError>;
}

/// Fetches registered hosts with their adapter and anything else with readability.
pub struct RegistryArticleFetch {
    fetcher: Arc<HttpFetcher>,
    registry: Arc<SourceRegistry>,
}

impl RegistryArticleFetch {
    pub fn new(fetcher: Arc<HttpFetcher>, registry: Arc<SourceRegistry>) -> Self {
        Self { fetcher, registry }
    }
}

#[async_trait]
impl ArticleFetch for RegistryArticleFetch {
    async fn fetch(&self, candidate: &CandidateUrl) -> Result<Article, PipelineError> {
        fetch_any(&self.fetcher, &self.registry, &candidate.url, Some(candidate)).await
    }
}

/// Article assembled from what a search result already says, without a body.
pub fn article_from_candidate(candidate: &CandidateUrl, registry: &SourceRegistry) -> Option<Article> {
    let title = candidate.title_hint.clone().filter(|t| !t.trim().is_empty())?;
    let (source_name, source_base_url) = match registry.get(candidate.source_id) {
        Some(s) => (s.display_name.clone(), s.base_url.clone()),
        None => (
            FALLBACK_SOURCE_NAME.to_string(),
            Url::parse(&candidate.url)
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_default(),
        ),
    };
    Some(Article {
        source_id: if registry.get(candidate.source_id).is_some() {
            candidate.source_id
        } else {
            FALLBACK_SOURCE_ID
        },
        source_name,
        source_base_url,
        title,
        url: candidate.url.clone(),
        published_date: candidate.published_date,
        snippet: candidate.snippet.clone(),
        raw_body: None,
        fetched_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_sources;

    fn wowtale() -> Source {
        default_sources().into_iter().find(|s| s.source_id == 1).unwrap()
    }

    #[test]
    fn off_site_links_are_dropped() {
        let html = r#"<html><body>
            <article><h2 class="entry-title"><a href="https://wowtale.net/2026/01/15/1/">A</a></h2></article>
            <article><h2 class="entry-title"><a href="https://ads.example.com/x">B</a></h2></article>
        </body></html>"#;
        let listing = parse_listing(html, &wowtale(), "https://wowtale.net/page/1/", Origin::Listing);
        assert_eq!(listing.containers, 2);
        assert_eq!(listing.candidates.len(), 1);
        assert_eq!(listing.candidates[0].title_hint.as_deref(), Some("A"));
    }

    #[test]
    fn readable_page_titles_from_markup() {
        let html = r#"<html><head><title>뤼튼, 시리즈B 투자 유치</title>
            <meta property="og:site_name" content="벤처스퀘어"></head>
            <body><article><p>뤼튼이 시리즈B 투자를 유치했다. 이번 투자에는 여러 기관이 참여했다.</p>
            <p>회사는 투자금을 연구 개발에 쓸 계획이라고 밝혔다.</p></article></body></html>"#;
        let page = readable_page(html, "https://news.example.com/article/1").unwrap();
        assert_eq!(page.title.as_deref(), Some("뤼튼, 시리즈B 투자 유치"));
        assert_eq!(page.site_name.as_deref(), Some("벤처스퀘어"));
    }

    #[test]
    fn short_bodies_miss() {
        let html = "<html><body><h1>t</h1><div class=\"entry-content\">too short</div></body></html>";
        let today = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
        let err = parse_article(html, &wowtale(), "https://wowtale.net/a", today).unwrap_err();
        assert!(matches!(err, PipelineError::ContentSelectorMissed(_)));
    }
}
