//! Run modes: daily and weekly collection, roster reconciliation and date backfill.

pub mod backfill;
pub mod collect;
pub mod roster;

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dates::DateRecoverer;
use crate::digest::{Digest, DigestSink, JsonFileSink, LogSink};
use crate::discovery::Discoverer;
use crate::error::{ErrorClass, PipelineError};
use crate::extract::Extractor;
use crate::http::HttpFetcher;
use crate::llm::{AzureOpenAiClient, LlmClient};
use crate::models::{CollectionRun, RunStatus};
use crate::reconcile::{ReconcileOutcome, Reconciler, Resolution};
use crate::registry::{AliasMap, SourceRegistry};
use crate::search::{AdapterSiteSearch, NewsApiClient, NewsSearch, SiteSearch, WebSearch, WebSearchClient};
use crate::sources::{ArticleFetch, RegistryArticleFetch};
use crate::store::{self, DealStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Daily,
    Weekly,
    Reconcile,
    BackfillDates,
}

/// Set from Ctrl-C; checked between articles.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn listen_for_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current article");
                flag.cancel();
            }
        });
    }
}

/// Outcome of one run: the CollectionRun record plus what went wrong.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    pub run: CollectionRun,
    pub errors: Vec<String>,
    pub unresolved: Vec<ReconcileOutcome>,
    pub deals_written: u32,
    pub dates_updated: u32,
    pub digests: u32,
}

impl RunReport {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            run: CollectionRun::start(),
            errors: Vec::new(),
            unresolved: Vec::new(),
            deals_written: 0,
            dates_updated: 0,
            digests: 0,
        }
    }

    pub fn record_error(&mut self, stage: &str, err: &PipelineError) {
        warn!(stage, class = ?err.class(), "{}", err);
        self.errors.push(format!("{}: {}", stage, err));
        self.run.counters.errors += 1;
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn outputs_produced(&self) -> bool {
        self.deals_written > 0 || self.dates_updated > 0 || self.digests > 0
    }

    /// 0 success, 1 partial, 2 fatal.
    pub fn exit_code(&self) -> i32 {
        match self.run.status {
            RunStatus::Completed if self.errors.is_empty() => 0,
            RunStatus::Completed => 1,
            _ if self.outputs_produced() => 1,
            _ => 2,
        }
    }

    fn log_summary(&self) {
        let c = &self.run.counters;
        info!(
            run_id = %self.run.run_id,
            mode = ?self.mode,
            status = ?self.run.status,
            articles_crawled = c.articles_crawled,
            articles_saved = c.articles_saved,
            deals_created = c.deals_created,
            companies_new = c.companies_new,
            errors = c.errors,
            "Collection run finished"
        );
        for outcome in &self.unresolved {
            if let Resolution::Unresolved { attempted } = &outcome.resolution {
                let tags: Vec<&str> = attempted.iter().map(|s| s.tag()).collect();
                warn!(company = %outcome.entry.company_name, attempts = outcome.attempts, strategies = ?tags, "Unresolved roster entry");
            }
        }
    }
}

/// Every stage wired together with explicit dependencies.
pub struct Pipeline {
    config: Config,
    registry: Arc<SourceRegistry>,
    store: Arc<DealStore>,
    fetch: Arc<dyn ArticleFetch>,
    extractor: Option<Arc<Extractor>>,
    dates: Option<Arc<DateRecoverer>>,
    discoverer: Option<Discoverer>,
    reconciler: Option<Reconciler>,
    sinks: Vec<Arc<dyn DigestSink>>,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(config: Config, registry: Arc<SourceRegistry>, store: Arc<DealStore>, fetch: Arc<dyn ArticleFetch>) -> Self {
        Self {
            config,
            registry,
            store,
            fetch,
            extractor: None,
            dates: None,
            discoverer: None,
            reconciler: None,
            sinks: Vec::new(),
            cancel: CancelFlag::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_dates(mut self, dates: Arc<DateRecoverer>) -> Self {
        self.dates = Some(dates);
        self
    }

    pub fn with_discoverer(mut self, discoverer: Discoverer) -> Self {
        self.discoverer = Some(discoverer);
        self
    }

    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DigestSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &DealStore {
        &self.store
    }

    /// Builds the production pipeline from configuration.
    pub async fn from_config(config: Config) -> Result<Self, PipelineError> {
        let registry = Arc::new(match &config.sources_path {
            Some(path) => SourceRegistry::load(path)?,
            None => SourceRegistry::default(),
        });
        let aliases = Arc::new(match &config.aliases_path {
            Some(path) => AliasMap::load(path)?,
            None => AliasMap::builtin(),
        });

        let db = store::connect(&config.database_url).await?;
        if config.db_bootstrap {
            store::bootstrap_schema(&db).await?;
        }
        let deal_store = Arc::new(DealStore::new(db, Arc::clone(&registry)));

        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        let llm: Option<Arc<dyn LlmClient>> = match &config.llm {
            Some(settings) => Some(Arc::new(AzureOpenAiClient::new(settings)?)),
            None => {
                warn!("AZURE_OPENAI_ENDPOINT or AZURE_OPENAI_API_KEY not set; extraction is unavailable");
                None
            }
        };

        let search_http = reqwest::Client::builder().timeout(config.http_timeout).build()?;
        let news: Option<Arc<dyn NewsSearch>> = config.news_search.clone().map(|settings| {
            Arc::new(NewsApiClient::new(search_http.clone(), settings, config.retry.clone())) as Arc<dyn NewsSearch>
        });
        let web: Option<Arc<dyn WebSearch>> = if config.web_search_enabled {
            config.web_search.clone().map(|settings| {
                Arc::new(WebSearchClient::new(search_http.clone(), settings, config.retry.clone())) as Arc<dyn WebSearch>
            })
        } else {
            None
        };

        let fetch: Arc<dyn ArticleFetch> = Arc::new(RegistryArticleFetch::new(Arc::clone(&fetcher), Arc::clone(&registry)));
        let site: Arc<dyn SiteSearch> = Arc::new(AdapterSiteSearch::new(&registry, Arc::clone(&fetcher)));

        let mut reconciler = Reconciler::new(Arc::clone(&registry), aliases, site, Arc::clone(&fetch))
            .with_concurrency(config.http_concurrency);
        if let Some(news) = &news {
            reconciler = reconciler.with_news(Arc::clone(news));
        }
        if let Some(web) = web {
            reconciler = reconciler.with_web(web);
        }

        let discoverer = Discoverer::new(Arc::clone(&registry), Arc::clone(&fetcher), news, config.max_pages);
        let dates = Arc::new(DateRecoverer::new(
            Arc::clone(&fetcher),
            Arc::clone(&registry),
            llm.clone(),
            config.retry.clone(),
        ));

        let mut pipeline = Pipeline::new(config.clone(), registry, deal_store, fetch)
            .with_dates(dates)
            .with_discoverer(discoverer)
            .with_reconciler(reconciler)
            .with_sink(Arc::new(LogSink));
        if let Some(llm) = llm {
            pipeline = pipeline.with_extractor(Arc::new(Extractor::new(
                llm,
                config.retry.clone(),
                config.title_amount_fallback,
            )));
        }
        if let Some(dir) = &config.digest_dir {
            pipeline = pipeline.with_sink(Arc::new(JsonFileSink::new(dir.clone())));
        }
        Ok(pipeline)
    }

    fn extractor(&self) -> Result<&Arc<Extractor>, PipelineError> {
        self.extractor
            .as_ref()
            .ok_or_else(|| PipelineError::MissingConfig("AZURE_OPENAI_ENDPOINT / AZURE_OPENAI_API_KEY".to_string()))
    }

    async fn deliver(&self, digest: Digest, report: &mut RunReport) {
        let mut delivered = false;
        for sink in &self.sinks {
            match sink.deliver(&digest).await {
                Ok(()) => delivered = true,
                Err(e) => report.record_error("digest", &e),
            }
        }
        if delivered {
            report.digests += 1;
        }
    }

    /// Runs one mode to completion and returns its report.
    ///
    /// Fatal errors and cancellation end the run as failed; everything else
    /// is recorded and the run carries on.
    pub async fn run(&self, mode: RunMode, roster: Option<&std::path::Path>, today: NaiveDate) -> RunReport {
        let mut report = RunReport::new(mode);
        info!(run_id = %report.run.run_id, ?mode, %today, "Starting run");

        let roster_path = roster.map(|p| p.to_path_buf()).or_else(|| self.config.roster_path.clone());
        let result = match mode {
            RunMode::Daily => self.run_daily(today, &mut report).await,
            RunMode::Weekly => self.run_weekly(today, roster_path.as_deref(), &mut report).await,
            RunMode::Reconcile => match roster_path.as_deref() {
                Some(path) => self.run_reconcile(path, today, &mut report).await,
                None => Err(PipelineError::MissingConfig("--roster or ROSTER_PATH".to_string())),
            },
            RunMode::BackfillDates => self.run_backfill_dates(today, &mut report).await,
        };

        let status = match result {
            Ok(()) => RunStatus::Completed,
            Err(e) => {
                if e.class() == ErrorClass::Fatal {
                    error!("Run aborted: {}", e);
                }
                report.record_error("run", &e);
                RunStatus::Failed
            }
        };
        report.run.finish(status);
        report.log_summary();
        report
    }
}
