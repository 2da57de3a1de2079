//! Candidate URL discovery across listings, sitemaps and the news search API.

use futures::stream::{self, StreamExt};
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use sitemap::structs::LastMod;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use texting_robots::Robot;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::http::{Gate, HttpFetcher};
use crate::models::{CandidateUrl, DateWindow, Origin};
use crate::normalize::normalize_url;
use crate::registry::{Source, SourceRegistry};
use crate::search::NewsSearch;
use crate::sources::SourceAdapter;

const SITEMAP_GUESSES: &[&str] = &["sitemap.xml", "sitemap_index.xml"];

/// Candidate URLs keyed by normalized URL; the first insertion wins.
#[derive(Debug, Default)]
pub struct CandidateSet {
    seen: HashSet<String>,
    items: Vec<CandidateUrl>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut candidate: CandidateUrl) -> bool {
        let Some(key) = normalize_url(&candidate.url, None) else {
            return false;
        };
        if !self.seen.insert(key.clone()) {
            return false;
        }
        candidate.url = key;
        self.items.push(candidate);
        true
    }

    pub fn extend(&mut self, candidates: impl IntoIterator<Item = CandidateUrl>) -> usize {
        candidates.into_iter().filter(|c| self.insert(c.clone())).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<CandidateUrl> {
        self.items
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapPage {
    pub entries: Vec<SitemapEntry>,
    /// Child sitemaps when this document is an index.
    pub children: Vec<String>,
}

/// Parses a sitemap or sitemap index fetched from `location`.
///
/// A document that yields nothing but parse errors is malformed; stray bad
/// entities next to good ones are skipped.
pub fn parse_sitemap(location: &str, xml: &str) -> Result<SitemapPage, PipelineError> {
    let mut page = SitemapPage::default();
    let mut first_error = None;
    for entity in SiteMapReader::new(Cursor::new(xml.as_bytes())) {
        match entity {
            SiteMapEntity::Url(url_entry) => {
                let Some(loc) = url_entry.loc.get_url() else {
                    continue;
                };
                let lastmod = match url_entry.lastmod {
                    LastMod::DateTime(dt) => Some(dt.date_naive()),
                    _ => None,
                };
                page.entries.push(SitemapEntry {
                    loc: loc.to_string(),
                    lastmod,
                });
            }
            SiteMapEntity::SiteMap(sitemap_entry) => {
                if let Some(child) = sitemap_entry.loc.get_url() {
                    page.children.push(child.to_string());
                }
            }
            SiteMapEntity::Err(error) => {
                debug!("Skipping sitemap entity in {}: {}", location, error);
                first_error.get_or_insert_with(|| error.to_string());
            }
        }
    }
    match first_error {
        Some(error) if page.entries.is_empty() && page.children.is_empty() => {
            Err(PipelineError::SitemapMalformed(format!("{}: {}", location, error)))
        }
        _ => Ok(page),
    }
}

/// Everything found for one window, plus the per-source failures.
#[derive(Debug, Default)]
pub struct Discovery {
    pub candidates: Vec<CandidateUrl>,
    pub errors: Vec<PipelineError>,
}

pub struct Discoverer {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<HttpFetcher>,
    news: Option<Arc<dyn NewsSearch>>,
    max_pages: u32,
}

impl Discoverer {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Arc<HttpFetcher>,
        news: Option<Arc<dyn NewsSearch>>,
        max_pages: u32,
    ) -> Self {
        Self {
            registry,
            fetcher,
            news,
            max_pages,
        }
    }

    /// Listings in rank order, then sitemaps, then news search for `companies`.
    #[tracing::instrument(skip(self, only_sources, companies), fields(from = %window.from, to = %window.to))]
    pub async fn discover(&self, window: DateWindow, only_sources: Option<&[i32]>, companies: &[String]) -> Discovery {
        let sources: Vec<Source> = self
            .registry
            .enabled()
            .filter(|s| only_sources.map_or(true, |ids| ids.contains(&s.source_id)))
            .cloned()
            .collect();

        let mut set = CandidateSet::new();
        let mut errors = Vec::new();

        let listings: Vec<(String, Result<Vec<CandidateUrl>, PipelineError>)> = stream::iter(sources.iter().cloned())
            .map(|source| {
                let adapter = SourceAdapter::new(source, Arc::clone(&self.fetcher));
                let max_pages = self.max_pages;
                async move {
                    let name = adapter.source().display_name.clone();
                    (name, adapter.list_articles(window.from, max_pages).await)
                }
            })
            .buffered(4)
            .collect()
            .await;

        for (name, result) in listings {
            match result {
                Ok(candidates) => {
                    let in_window = candidates
                        .into_iter()
                        .filter(|c| c.published_date.map_or(true, |d| window.contains(d)));
                    let added = set.extend(in_window);
                    debug!("{}: {} new candidates from listing", name, added);
                }
                Err(e) => {
                    warn!("Skipping listing for {}: {}", name, e);
                    errors.push(e);
                }
            }
        }

        for source in &sources {
            let (entries, malformed) = self.sitemap_candidates(source, window).await;
            let added = set.extend(entries);
            if added > 0 {
                debug!("{}: {} new candidates from sitemap", source.display_name, added);
            }
            errors.extend(malformed);
        }

        if let Some(news) = &self.news {
            for company in companies {
                let query = format!("{} 투자", company);
                match news.search_news(&query).await {
                    Ok(hits) => {
                        let candidates = hits
                            .into_iter()
                            .filter(|h| h.pub_date.map_or(true, |d| window.contains(d)))
                            .filter_map(|h| h.into_candidate(&self.registry, Origin::SearchApi));
                        set.extend(candidates);
                    }
                    Err(e) => {
                        warn!("News search for {} failed: {}", company, e);
                        errors.push(e);
                    }
                }
            }
        }

        info!("Discovered {} candidate URLs ({} errors)", set.len(), errors.len());
        Discovery {
            candidates: set.into_vec(),
            errors,
        }
    }

    /// Sitemap URLs declared in robots.txt.
    async fn sitemaps_from_robots(&self, base: &str, gate: &Gate) -> Vec<String> {
        let robots_url = format!("{}/robots.txt", base);
        match self.fetcher.fetch(&robots_url, gate).await {
            Ok(page) => match Robot::new("*", page.body.as_bytes()) {
                Ok(robot) => robot.sitemaps,
                Err(e) => {
                    warn!("Failed to parse robots.txt ({}): {}", robots_url, e);
                    Vec::new()
                }
            },
            Err(e) => {
                debug!("No robots.txt at {}: {}", robots_url, e);
                Vec::new()
            }
        }
    }

    /// Sitemap entries with `lastmod` in the window, following an index one level.
    /// Malformed documents are excluded and returned alongside.
    async fn sitemap_candidates(
        &self,
        source: &Source,
        window: DateWindow,
    ) -> (Vec<CandidateUrl>, Vec<PipelineError>) {
        let gate = self.fetcher.gate_for_source(source);
        let base = source.base_url.trim_end_matches('/').to_string();

        let mut roots = self.sitemaps_from_robots(&base, &gate).await;
        let declared = !roots.is_empty();
        if !declared {
            roots = SITEMAP_GUESSES.iter().map(|g| format!("{}/{}", base, g)).collect();
        }

        let mut entries = Vec::new();
        let mut malformed = Vec::new();
        for root in roots {
            let page = match self.fetcher.fetch(&root, &gate).await {
                Ok(page) => match parse_sitemap(&root, &page.body) {
                    Ok(page) => page,
                    // A guessed path that serves something else is not a sitemap at all.
                    Err(e) if !declared => {
                        debug!("Ignoring guessed sitemap: {}", e);
                        continue;
                    }
                    Err(e) => {
                        warn!("Excluding sitemap: {}", e);
                        malformed.push(e);
                        continue;
                    }
                },
                Err(e) => {
                    debug!("Sitemap {} unavailable: {}", root, e);
                    continue;
                }
            };
            entries.extend(page.entries);
            for child in page.children {
                match self.fetcher.fetch(&child, &gate).await {
                    Ok(sub) => match parse_sitemap(&child, &sub.body) {
                        Ok(sub) => {
                            if !sub.children.is_empty() {
                                debug!("Not following nested index inside {}", child);
                            }
                            entries.extend(sub.entries);
                        }
                        Err(e) => {
                            warn!("Excluding sub-sitemap: {}", e);
                            malformed.push(e);
                        }
                    },
                    Err(e) => warn!("Skipping sub-sitemap {}: {}", child, e),
                }
            }
            if !entries.is_empty() {
                break;
            }
        }

        let candidates = entries
            .into_iter()
            .filter(|e| e.lastmod.is_some_and(|d| window.contains(d)))
            .map(|e| CandidateUrl {
                url: e.loc,
                title_hint: None,
                source_id: source.source_id,
                published_date: e.lastmod,
                snippet: None,
                origin: Origin::Sitemap,
            })
            .collect();
        (candidates, malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, origin: Origin) -> CandidateUrl {
        CandidateUrl {
            url: url.to_string(),
            title_hint: None,
            source_id: 1,
            published_date: None,
            snippet: None,
            origin,
        }
    }

    #[test]
    fn first_insertion_wins() {
        let mut set = CandidateSet::new();
        assert!(set.insert(candidate("https://wowtale.net/a/?utm_source=x", Origin::Listing)));
        assert!(!set.insert(candidate("https://wowtale.net/a/", Origin::Sitemap)));
        let items = set.into_vec();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].origin, Origin::Listing);
    }

    #[test]
    fn sitemap_index_children() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://platum.kr/sitemap-1.xml</loc></sitemap>
</sitemapindex>"#;
        let page = parse_sitemap("https://platum.kr/sitemap_index.xml", xml).unwrap();
        assert_eq!(page.children, vec!["https://platum.kr/sitemap-1.xml".to_string()]);
        assert!(page.entries.is_empty());
    }

    #[test]
    fn garbage_sitemap_is_malformed() {
        let result = parse_sitemap("https://platum.kr/sitemap-2.xml", "<<not a sitemap");
        assert!(matches!(result, Err(PipelineError::SitemapMalformed(msg)) if msg.contains("sitemap-2.xml")));
    }
}
