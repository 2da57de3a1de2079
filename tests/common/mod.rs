#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dealintel::error::PipelineError;
use dealintel::llm::{LlmClient, LlmError, LlmRequest};
use dealintel::models::{Article, CandidateUrl, Origin};
use dealintel::registry::SourceRegistry;
use dealintel::search::{NewsSearch, SearchHit, SiteSearch, WebSearch};
use dealintel::sources::ArticleFetch;
use dealintel::store::{self, DealStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

// Tracing for tests, initialised once
pub fn setup() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub async fn memory_store() -> DealStore {
    let db = store::connect("sqlite::memory:").await.unwrap();
    store::bootstrap_schema(&db).await.unwrap();
    DealStore::new(db, Arc::new(SourceRegistry::default()))
}

pub fn article(source_id: i32, source_name: &str, title: &str, url: &str, published: Option<NaiveDate>) -> Article {
    Article {
        source_id,
        source_name: source_name.to_string(),
        source_base_url: "https://wowtale.net".to_string(),
        title: title.to_string(),
        url: url.to_string(),
        published_date: published,
        snippet: None,
        raw_body: Some(format!("{title}. 본문입니다.")),
        fetched_at: Utc::now(),
    }
}

pub fn candidate(url: &str, title: &str, source_id: i32) -> CandidateUrl {
    CandidateUrl {
        url: url.to_string(),
        title_hint: Some(title.to_string()),
        source_id,
        published_date: None,
        snippet: None,
        origin: Origin::Listing,
    }
}

pub fn hit(title: &str, url: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        pub_date: None,
        snippet: None,
    }
}

type Reply = Box<dyn Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync>;

/// Model stand-in answering every request through a closure.
pub struct FakeLlm {
    reply: Reply,
    grounded: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new(reply: impl Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            grounded: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answering(json: &str) -> Self {
        let json = json.to_string();
        Self::new(move |_| Ok(json.clone()))
    }

    pub fn with_grounded(mut self, answer: &str) -> Self {
        self.grounded = Some(answer.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete_json(&self, request: &LlmRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(request)
    }

    async fn complete_grounded(&self, request: &LlmRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.grounded {
            Some(answer) => Ok(answer.clone()),
            None => (self.reply)(request),
        }
    }
}

/// Site search keyed by (source_id, query).
#[derive(Default)]
pub struct FakeSiteSearch {
    results: HashMap<(i32, String), Vec<CandidateUrl>>,
    pub queries: Mutex<Vec<(i32, String)>>,
}

impl FakeSiteSearch {
    pub fn with(mut self, source_id: i32, query: &str, found: Vec<CandidateUrl>) -> Self {
        self.results.insert((source_id, query.to_string()), found);
        self
    }

    pub fn distinct_queries(&self) -> usize {
        let mut queries: Vec<String> = self.queries.lock().unwrap().iter().map(|(_, q)| q.clone()).collect();
        queries.sort();
        queries.dedup();
        queries.len()
    }
}

#[async_trait]
impl SiteSearch for FakeSiteSearch {
    async fn search_site(&self, source_id: i32, query: &str) -> Result<Vec<CandidateUrl>, PipelineError> {
        self.queries.lock().unwrap().push((source_id, query.to_string()));
        Ok(self
            .results
            .get(&(source_id, query.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeNews {
    results: HashMap<String, Vec<SearchHit>>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeNews {
    pub fn with(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.results.insert(query.to_string(), hits);
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl NewsSearch for FakeNews {
    async fn search_news(&self, query: &str) -> Result<Vec<SearchHit>, PipelineError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeWeb {
    hits: Vec<SearchHit>,
    pub calls: AtomicUsize,
}

impl FakeWeb {
    pub fn returning(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WebSearch for FakeWeb {
    async fn search_web(&self, _query: &str, _domains: &[String]) -> Result<Vec<SearchHit>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

/// Article fetcher serving a fixed set of pages.
#[derive(Default)]
pub struct FakeFetch {
    pages: HashMap<String, Article>,
}

impl FakeFetch {
    pub fn with(mut self, article: Article) -> Self {
        self.pages.insert(article.url.clone(), article);
        self
    }
}

#[async_trait]
impl ArticleFetch for FakeFetch {
    async fn fetch(&self, candidate: &CandidateUrl) -> Result<Article, PipelineError> {
        self.pages
            .get(&candidate.url)
            .cloned()
            .ok_or_else(|| PipelineError::ArticleUnavailable {
                url: candidate.url.clone(),
                reason: "not served".to_string(),
            })
    }
}
