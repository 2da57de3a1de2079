//! Roster reconciliation: find a news article for every company on the weekly
//! roster that the crawl did not already cover.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{Article, CandidateUrl, Origin, RosterEntry};
use crate::normalize::nfc;
use crate::registry::{AliasMap, SourceRegistry};
use crate::search::{NewsSearch, SiteSearch, WebSearch};
use crate::sources::{article_from_candidate, ArticleFetch};

/// Sources consulted by the site-search strategies.
pub const TOP_SOURCES: usize = 5;

const FUNDING_KEYWORDS: &[&str] = &["투자", "유치", "펀딩", "시리즈", "series", "라운드", "vc", "m&a", "인수"];
const NOTICE_KEYWORDS: &[&str] = &["[공지]", "공지", "행사", "세미나", "채용", "모집", "초대", "mou", "협약", "상장", "ipo"];

/// Title test for a search hit: names the company, talks about funding, is not a notice.
pub fn is_acceptable(title: &str, company: &str) -> bool {
    let company = nfc(company.trim()).to_lowercase();
    if company.is_empty() {
        return false;
    }
    let title = nfc(title).to_lowercase();
    title.contains(&company)
        && FUNDING_KEYWORDS.iter().any(|k| title.contains(k))
        && !NOTICE_KEYWORDS.iter().any(|k| title.contains(k))
}

/// Upper bound on search attempts for one roster entry.
pub fn attempt_bound(alias_count: usize) -> u32 {
    5 + 6 + 3 * alias_count as u32 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Site,
    SiteInvestor,
    NewsApi,
    Alias,
    Web,
}

impl Strategy {
    pub fn tag(&self) -> &'static str {
        match self {
            Strategy::Site => "site",
            Strategy::SiteInvestor => "site_investor",
            Strategy::NewsApi => "news_api",
            Strategy::Alias => "alias",
            Strategy::Web => "web",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved { article: Article, strategy: Strategy },
    Unresolved { attempted: Vec<Strategy> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub entry: RosterEntry,
    pub resolution: Resolution,
    pub attempts: u32,
}

impl ReconcileOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved { .. })
    }
}

/// Attempts left for the entry being reconciled.
struct SearchBudget {
    limit: u32,
    used: u32,
}

impl SearchBudget {
    fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    fn take(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Per-entry search progress.
struct Attempt {
    budget: SearchBudget,
    tried: Vec<Strategy>,
}

impl Attempt {
    fn begin(&mut self, strategy: Strategy) -> bool {
        if !self.budget.take() {
            return false;
        }
        if !self.tried.contains(&strategy) {
            self.tried.push(strategy);
        }
        true
    }
}

fn first_investor_token(entry: &RosterEntry) -> Option<String> {
    entry
        .primary_investor
        .as_deref()
        .and_then(|i| i.split(|c: char| c == ',' || c.is_whitespace()).find(|t| !t.is_empty()))
        .map(str::to_string)
}

/// News search queries for a company, most specific first, without repeats.
pub fn news_queries(company: &str, investor: Option<&str>) -> Vec<String> {
    let mut queries = Vec::new();
    if let Some(investor) = investor {
        queries.push(format!("{company} {investor} 투자"));
        queries.push(format!("{company} {investor}"));
    }
    queries.push(format!("{company} 투자유치"));
    queries.push(format!("{company} 시리즈"));
    queries.push(format!("{company} 펀딩"));
    queries.push(company.to_string());
    queries.dedup();
    queries
}

pub struct Reconciler {
    registry: Arc<SourceRegistry>,
    aliases: Arc<AliasMap>,
    site: Arc<dyn SiteSearch>,
    news: Option<Arc<dyn NewsSearch>>,
    web: Option<Arc<dyn WebSearch>>,
    fetch: Arc<dyn ArticleFetch>,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(
        registry: Arc<SourceRegistry>,
        aliases: Arc<AliasMap>,
        site: Arc<dyn SiteSearch>,
        fetch: Arc<dyn ArticleFetch>,
    ) -> Self {
        Self {
            registry,
            aliases,
            site,
            news: None,
            web: None,
            fetch,
            concurrency: 4,
        }
    }

    pub fn with_news(mut self, news: Arc<dyn NewsSearch>) -> Self {
        self.news = Some(news);
        self
    }

    /// Enables the web search strategy.
    pub fn with_web(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Reconciles every entry; outcomes come back in roster order.
    #[tracing::instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn reconcile(&self, entries: &[RosterEntry]) -> Vec<ReconcileOutcome> {
        let mut outcomes: Vec<(usize, ReconcileOutcome)> = stream::iter(entries.iter().enumerate())
            .map(|(index, entry)| async move { (index, self.reconcile_entry(entry).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let resolved = outcomes.iter().filter(|(_, o)| o.is_resolved()).count();
        info!("Reconciled {} of {} roster entries", resolved, entries.len());
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    #[tracing::instrument(skip(self, entry), fields(company = %entry.company_name))]
    pub async fn reconcile_entry(&self, entry: &RosterEntry) -> ReconcileOutcome {
        let company = nfc(entry.company_name.trim());
        let aliases = self.aliases.aliases_for(&company);
        let investor = first_investor_token(entry);
        let mut attempt = Attempt {
            budget: SearchBudget::new(attempt_bound(aliases.len())),
            tried: Vec::new(),
        };

        let found = self.search_primary(&company, investor.as_deref(), &mut attempt).await;
        let found = match found {
            Some(hit) => Some(hit),
            None => self.search_aliases(aliases, investor.as_deref(), &mut attempt).await,
        };
        let found = match found {
            Some(hit) => Some(hit),
            None => self.search_web(&company, &mut attempt).await,
        };

        let resolution = match found {
            Some((candidate, strategy)) => match self.materialize(&candidate).await {
                Some(article) => Resolution::Resolved { article, strategy },
                None => Resolution::Unresolved {
                    attempted: attempt.tried.clone(),
                },
            },
            None => Resolution::Unresolved {
                attempted: attempt.tried.clone(),
            },
        };
        if let Resolution::Unresolved { attempted } = &resolution {
            let tags: Vec<&str> = attempted.iter().map(Strategy::tag).collect();
            warn!("No article found for {} after {:?}", company, tags);
        }

        ReconcileOutcome {
            entry: entry.clone(),
            resolution,
            attempts: attempt.budget.used,
        }
    }

    async fn search_primary(
        &self,
        company: &str,
        investor: Option<&str>,
        attempt: &mut Attempt,
    ) -> Option<(CandidateUrl, Strategy)> {
        if attempt.begin(Strategy::Site) {
            if let Some(hit) = self.site_search(company, company).await {
                return Some((hit, Strategy::Site));
            }
        }
        if let Some(investor) = investor {
            if attempt.begin(Strategy::SiteInvestor) {
                let query = format!("{company} {investor}");
                if let Some(hit) = self.site_search(&query, company).await {
                    return Some((hit, Strategy::SiteInvestor));
                }
            }
        }
        if self.news.is_some() {
            for query in news_queries(company, investor) {
                if !attempt.begin(Strategy::NewsApi) {
                    break;
                }
                if let Some(hit) = self.news_search(&query, company).await {
                    return Some((hit, Strategy::NewsApi));
                }
            }
        }
        None
    }

    /// Site search, site search with the investor, and a bare news query per alias.
    async fn search_aliases(
        &self,
        aliases: &[String],
        investor: Option<&str>,
        attempt: &mut Attempt,
    ) -> Option<(CandidateUrl, Strategy)> {
        for alias in aliases {
            let alias = nfc(alias.trim());
            if alias.is_empty() {
                continue;
            }
            if attempt.begin(Strategy::Alias) {
                if let Some(hit) = self.site_search(&alias, &alias).await {
                    return Some((hit, Strategy::Alias));
                }
            }
            if let Some(investor) = investor {
                if attempt.begin(Strategy::Alias) {
                    if let Some(hit) = self.site_search(&format!("{alias} {investor}"), &alias).await {
                        return Some((hit, Strategy::Alias));
                    }
                }
            }
            if self.news.is_some() && attempt.begin(Strategy::Alias) {
                if let Some(hit) = self.news_search(&alias, &alias).await {
                    return Some((hit, Strategy::Alias));
                }
            }
        }
        None
    }

    async fn search_web(&self, company: &str, attempt: &mut Attempt) -> Option<(CandidateUrl, Strategy)> {
        let web = self.web.as_ref()?;
        if !attempt.begin(Strategy::Web) {
            return None;
        }
        let domains = self.registry.domains();
        match web.search_web(&format!("{company} 투자"), &domains).await {
            Ok(hits) => hits
                .into_iter()
                .filter(|h| is_acceptable(&h.title, company))
                .find_map(|h| h.into_candidate(&self.registry, Origin::WebSearch))
                .map(|c| (c, Strategy::Web)),
            Err(e) => {
                warn!("Web search for {} failed: {}", company, e);
                None
            }
        }
    }

    /// One query across the Top-5 searchable sources; the best-ranked accepted hit wins.
    async fn site_search(&self, query: &str, company: &str) -> Option<CandidateUrl> {
        let sources = self.registry.top_searchable(TOP_SOURCES);
        let results = join_all(sources.iter().map(|s| self.site.search_site(s.source_id, query))).await;
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(candidates) => {
                    let hit = candidates
                        .into_iter()
                        .find(|c| c.title_hint.as_deref().is_some_and(|t| is_acceptable(t, company)));
                    if hit.is_some() {
                        return hit;
                    }
                }
                Err(e) => debug!("Site search on {} failed: {}", source.display_name, e),
            }
        }
        None
    }

    async fn news_search(&self, query: &str, company: &str) -> Option<CandidateUrl> {
        let news = self.news.as_ref()?;
        match news.search_news(query).await {
            Ok(hits) => hits
                .into_iter()
                .filter(|h| is_acceptable(&h.title, company))
                .find_map(|h| h.into_candidate(&self.registry, Origin::SearchApi)),
            Err(e) => {
                debug!("News search '{}' failed: {}", query, e);
                None
            }
        }
    }

    /// Full article for an accepted hit, or the hit itself when the page cannot be read.
    async fn materialize(&self, candidate: &CandidateUrl) -> Option<Article> {
        match self.fetch.fetch(candidate).await {
            Ok(article) => Some(article),
            Err(e) => {
                debug!("Using search result for {} without body: {}", candidate.url, e);
                article_from_candidate(candidate, &self.registry)
            }
        }
    }
}
