use dealintel::config::{Config, MAX_HTTP_CONCURRENCY, MIN_SOURCE_DELAY};
use dealintel::error::PipelineError;
use std::collections::HashMap;
use std::time::Duration;

fn config_from(pairs: &[(&str, &str)]) -> Result<Config, PipelineError> {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}

/// Test the defaults with only a database configured
#[test]
fn test_minimal_config() {
    let config = config_from(&[("DATABASE_URL", "sqlite::memory:")]).unwrap();
    assert!(config.llm.is_none());
    assert!(config.news_search.is_none());
    assert!(!config.web_search_enabled);
    assert_eq!(config.http_concurrency, 8);
    assert_eq!(config.max_pages, 5);
    assert_eq!(config.source_delay, Duration::from_millis(100));
    assert!(config.digest_include_mna);
}

#[test]
fn test_database_url_is_required() {
    assert!(matches!(config_from(&[]), Err(PipelineError::MissingConfig(_))));
}

#[test]
fn test_api_credentials_come_in_pairs() {
    let config = config_from(&[
        ("DATABASE_URL", "sqlite::memory:"),
        ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
        ("NEWS_SEARCH_CLIENT_ID", "id"),
    ])
    .unwrap();
    assert!(config.llm.is_none());
    assert!(config.news_search.is_none());

    let config = config_from(&[
        ("DATABASE_URL", "sqlite::memory:"),
        ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
        ("AZURE_OPENAI_API_KEY", "key"),
        ("NEWS_SEARCH_CLIENT_ID", "id"),
        ("NEWS_SEARCH_CLIENT_SECRET", "secret"),
    ])
    .unwrap();
    assert_eq!(config.llm.unwrap().deployment, "gpt-4o");
    assert!(config.news_search.unwrap().url.contains("news.json"));
}

#[test]
fn test_delays_respect_floor() {
    let config = config_from(&[
        ("DATABASE_URL", "sqlite::memory:"),
        ("SOURCE_DELAY_MS", "10"),
        ("THROTTLED_DELAY_MS", "50"),
    ])
    .unwrap();
    assert_eq!(config.source_delay, MIN_SOURCE_DELAY);
    assert_eq!(config.throttled_delay, MIN_SOURCE_DELAY);
}

#[test]
fn test_concurrency_is_clamped() {
    let config = config_from(&[("DATABASE_URL", "sqlite::memory:"), ("HTTP_CONCURRENCY", "18446744073709551615")]).unwrap();
    assert_eq!(config.http_concurrency, MAX_HTTP_CONCURRENCY);

    let config = config_from(&[("DATABASE_URL", "sqlite::memory:"), ("HTTP_CONCURRENCY", "0")]).unwrap();
    assert_eq!(config.http_concurrency, 1);
}

#[test]
fn test_bad_numbers_are_reported() {
    let result = config_from(&[("DATABASE_URL", "sqlite::memory:"), ("MAX_PAGES", "many")]);
    assert!(matches!(result, Err(PipelineError::MissingConfig(msg)) if msg.contains("MAX_PAGES")));
}

#[test]
fn test_flags() {
    let config = config_from(&[
        ("DATABASE_URL", "sqlite::memory:"),
        ("WEB_SEARCH_ENABLED", "true"),
        ("DIGEST_INCLUDE_MNA", "0"),
        ("TITLE_AMOUNT_FALLBACK", "yes"),
    ])
    .unwrap();
    assert!(config.web_search_enabled);
    assert!(!config.digest_include_mna);
    assert!(config.title_amount_fallback);
}
