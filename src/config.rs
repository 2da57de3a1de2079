use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;

/// Retry schedule for transient failures: 1 s, 2 s, 4 s by default.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Millisecond intervals, for tests.
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        let max_interval = self
            .initial_interval
            .mul_f64(self.multiplier.powi(self.max_retries.saturating_sub(1) as i32));
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_interval(max_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub requests_per_minute: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NewsSearchSettings {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct WebSearchSettings {
    pub url: String,
    pub api_key: String,
}

/// Runtime configuration, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_bootstrap: bool,
    pub llm: Option<LlmSettings>,
    pub news_search: Option<NewsSearchSettings>,
    pub web_search: Option<WebSearchSettings>,
    pub web_search_enabled: bool,
    pub sources_path: Option<PathBuf>,
    pub aliases_path: Option<PathBuf>,
    pub roster_path: Option<PathBuf>,
    pub digest_dir: Option<PathBuf>,
    pub http_concurrency: usize,
    pub http_timeout: Duration,
    pub source_delay: Duration,
    pub throttled_delay: Duration,
    pub queue_capacity: usize,
    pub max_pages: u32,
    pub title_amount_fallback: bool,
    pub digest_include_mna: bool,
    pub retry: RetryPolicy,
}

/// Politeness floor between two requests to the same source.
pub const MIN_SOURCE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on simultaneous HTTP requests.
pub const MAX_HTTP_CONCURRENCY: usize = 64;

impl Config {
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| {
            get(key)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };
        let number = |key: &str, default: u64| -> Result<u64, PipelineError> {
            match get(key) {
                Some(v) => v
                    .parse::<u64>()
                    .map_err(|_| PipelineError::MissingConfig(format!("{key} must be a number, got '{v}'"))),
                None => Ok(default),
            }
        };

        let database_url = get("DATABASE_URL").ok_or_else(|| PipelineError::MissingConfig("DATABASE_URL".into()))?;

        let llm = match (get("AZURE_OPENAI_ENDPOINT"), get("AZURE_OPENAI_API_KEY")) {
            (Some(endpoint), Some(api_key)) => Some(LlmSettings {
                endpoint,
                api_key,
                deployment: get("AZURE_OPENAI_DEPLOYMENT").unwrap_or_else(|| "gpt-4o".to_string()),
                requests_per_minute: number("LLM_RPM", 60)?.max(1) as u32,
                timeout: Duration::from_secs(number("LLM_TIMEOUT_SECS", 30)?),
            }),
            _ => None,
        };

        let news_search = match (
            get("NEWS_SEARCH_URL"),
            get("NEWS_SEARCH_CLIENT_ID"),
            get("NEWS_SEARCH_CLIENT_SECRET"),
        ) {
            (url, Some(client_id), Some(client_secret)) => Some(NewsSearchSettings {
                url: url.unwrap_or_else(|| "https://openapi.naver.com/v1/search/news.json".to_string()),
                client_id,
                client_secret,
            }),
            _ => None,
        };

        let web_search = match (get("WEB_SEARCH_URL"), get("WEB_SEARCH_KEY")) {
            (Some(url), Some(api_key)) => Some(WebSearchSettings { url, api_key }),
            _ => None,
        };

        let source_delay = Duration::from_millis(number("SOURCE_DELAY_MS", 100)?).max(MIN_SOURCE_DELAY);
        let throttled_delay = Duration::from_millis(number("THROTTLED_DELAY_MS", 500)?).max(source_delay);

        Ok(Self {
            database_url,
            db_bootstrap: flag("DB_BOOTSTRAP", false),
            llm,
            news_search,
            web_search,
            web_search_enabled: flag("WEB_SEARCH_ENABLED", false),
            sources_path: get("SOURCES_PATH").map(PathBuf::from),
            aliases_path: get("ALIASES_PATH").map(PathBuf::from),
            roster_path: get("ROSTER_PATH").map(PathBuf::from),
            digest_dir: get("DIGEST_DIR").map(PathBuf::from),
            http_concurrency: number("HTTP_CONCURRENCY", 8)?.clamp(1, MAX_HTTP_CONCURRENCY as u64) as usize,
            http_timeout: Duration::from_secs(number("HTTP_TIMEOUT_SECS", 10)?),
            source_delay,
            throttled_delay,
            queue_capacity: number("QUEUE_CAPACITY", 64)?.max(1) as usize,
            max_pages: number("MAX_PAGES", 5)?.max(1) as u32,
            title_amount_fallback: flag("TITLE_AMOUNT_FALLBACK", false),
            digest_include_mna: flag("DIGEST_INCLUDE_MNA", true),
            retry: RetryPolicy::default(),
        })
    }
}
