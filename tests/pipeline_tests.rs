use dealintel::config::{Config, RetryPolicy};
use dealintel::dates::DateRecoverer;
use dealintel::extract::Extractor;
use dealintel::http::HttpFetcher;
use dealintel::jobs::collect::is_deal_worthy;
use dealintel::jobs::{CancelFlag, RunReport};
use dealintel::models::{ExtractedFacts, RunStatus};
use dealintel::reconcile::Reconciler;
use dealintel::registry::{AliasMap, SourceRegistry};
use dealintel::store::DealRecord;
use dealintel::{Pipeline, PipelineError, RunMode};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{article, candidate, date, memory_store, setup, FakeFetch, FakeLlm, FakeSiteSearch};

const DEAL_REPLY: &str = r#"{"company_name": "뤼튼", "stage": "Series A", "investors": ["알토스벤처스"],
    "amount": "100억원", "industry": "AI", "confidence": 9}"#;

fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "QUEUE_CAPACITY" => Some("1".to_string()),
        _ => None,
    })
    .unwrap()
}

fn extractor(reply: &str) -> Arc<Extractor> {
    Arc::new(Extractor::new(Arc::new(FakeLlm::answering(reply)), RetryPolicy::fast(), false))
}

fn fetcher() -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::with_client(
        reqwest::Client::new(),
        2,
        Duration::from_millis(1),
        Duration::from_millis(1),
        RetryPolicy::fast(),
    ))
}

/// Test the collection path: two sources cover one deal, one page is gone
#[tokio::test]
async fn test_collection_writes_one_deal_per_event() {
    setup();
    let store = Arc::new(memory_store().await);
    let wowtale = "https://wowtale.net/2026/03/02/1001/";
    let platum = "https://platum.kr/archives/5001";
    let fetch = FakeFetch::default()
        .with(article(1, "WOWTALE", "뤼튼, 100억원 시리즈A 투자 유치", wowtale, Some(date(2026, 3, 2))))
        .with(article(10, "플래텀", "뤼튼, 시리즈A 투자 유치", platum, Some(date(2026, 3, 2))));

    let pipeline = Pipeline::new(test_config(), Arc::new(SourceRegistry::default()), store.clone(), Arc::new(fetch))
        .with_extractor(extractor(DEAL_REPLY));

    let candidates = vec![
        candidate(wowtale, "뤼튼, 100억원 시리즈A 투자 유치", 1),
        candidate(platum, "뤼튼, 시리즈A 투자 유치", 10),
        candidate("https://platum.kr/archives/404", "사라진 기사", 10),
    ];
    let today = date(2026, 3, 3);
    let mut report = RunReport::new(RunMode::Daily);
    let scored = pipeline.process_candidates(candidates, today, &mut report).await.unwrap();
    assert_eq!(scored.len(), 2);
    pipeline.persist(scored, today, &mut report).await.unwrap();

    let deals = store.list_day(date(2026, 3, 2)).await.unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].news_url.as_deref(), Some(wowtale));
    assert_eq!(deals[0].amount, Some(100.0));

    let counters = &report.run.counters;
    assert_eq!(counters.articles_crawled, 2);
    assert_eq!(counters.articles_saved, 2);
    assert_eq!(counters.deals_created, 1);
    assert_eq!(counters.companies_new, 1);
    assert_eq!(report.error_count(), 1);
}

#[tokio::test]
async fn test_second_deal_for_known_company_is_not_new() {
    setup();
    let store = Arc::new(memory_store().await);
    store
        .upsert_deal(DealRecord {
            company_name: "뤼튼".to_string(),
            news_url: Some("https://wowtale.net/2025/06/01/1/".to_string()),
            news_date: Some(date(2025, 6, 1)),
            site_name: Some("WOWTALE".to_string()),
            ..DealRecord::default()
        }, date(2026, 3, 3))
        .await
        .unwrap();

    let url = "https://wowtale.net/2026/03/02/1001/";
    let fetch = FakeFetch::default().with(article(1, "WOWTALE", "뤼튼, 시리즈A 투자 유치", url, Some(date(2026, 3, 2))));
    let pipeline = Pipeline::new(test_config(), Arc::new(SourceRegistry::default()), store, Arc::new(fetch))
        .with_extractor(extractor(DEAL_REPLY));

    let mut report = RunReport::new(RunMode::Daily);
    let today = date(2026, 3, 3);
    let scored = pipeline
        .process_candidates(vec![candidate(url, "뤼튼, 시리즈A 투자 유치", 1)], today, &mut report)
        .await
        .unwrap();
    pipeline.persist(scored, today, &mut report).await.unwrap();

    assert_eq!(report.run.counters.deals_created, 1);
    assert_eq!(report.run.counters.companies_new, 0);
}

#[tokio::test]
async fn test_non_deal_articles_are_skipped() {
    setup();
    let store = Arc::new(memory_store().await);
    let url = "https://wowtale.net/2026/03/02/2002/";
    let fetch = FakeFetch::default().with(article(1, "WOWTALE", "스타트업 행사 소식", url, Some(date(2026, 3, 2))));
    let pipeline = Pipeline::new(test_config(), Arc::new(SourceRegistry::default()), store.clone(), Arc::new(fetch))
        .with_extractor(extractor(r#"{"company_name": "", "confidence": 0}"#));

    let mut report = RunReport::new(RunMode::Daily);
    let scored = pipeline
        .process_candidates(vec![candidate(url, "스타트업 행사 소식", 1)], date(2026, 3, 3), &mut report)
        .await
        .unwrap();

    assert!(scored.is_empty());
    assert_eq!(report.run.counters.articles_saved, 1);
    assert_eq!(store.count_articles().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancelled_run_stops_processing() {
    setup();
    let store = Arc::new(memory_store().await);
    let cancel = CancelFlag::default();
    cancel.cancel();
    let pipeline = Pipeline::new(test_config(), Arc::new(SourceRegistry::default()), store, Arc::new(FakeFetch::default()))
        .with_extractor(extractor(DEAL_REPLY))
        .with_cancel(cancel);

    let mut report = RunReport::new(RunMode::Daily);
    let result = pipeline
        .process_candidates(vec![candidate("https://wowtale.net/x/", "뤼튼, 투자 유치", 1)], date(2026, 3, 3), &mut report)
        .await;
    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(report.run.counters.articles_crawled, 0);
}

#[test]
fn test_deal_worthiness() {
    let item = article(1, "WOWTALE", "뤼튼, 시리즈A 투자 유치", "https://wowtale.net/1/", None);
    let named = ExtractedFacts {
        company_name: "뤼튼".to_string(),
        ..ExtractedFacts::default()
    };
    assert!(is_deal_worthy(&item, &named));

    let unrelated = article(1, "WOWTALE", "스타트업 행사 소식", "https://wowtale.net/2/", None);
    assert!(!is_deal_worthy(&unrelated, &named));
    assert!(!is_deal_worthy(&item, &ExtractedFacts::default()));
}

/// Test exit codes for success, partial success and failure
#[test]
fn test_exit_codes() {
    let mut clean = RunReport::new(RunMode::Daily);
    clean.run.finish(RunStatus::Completed);
    assert_eq!(clean.exit_code(), 0);

    let mut partial = RunReport::new(RunMode::Daily);
    partial.record_error("fetch", &PipelineError::Http("503".into()));
    partial.run.finish(RunStatus::Completed);
    assert_eq!(partial.exit_code(), 1);

    let mut failed_late = RunReport::new(RunMode::Weekly);
    failed_late.deals_written = 3;
    failed_late.record_error("run", &PipelineError::StoreUnreachable("gone".into()));
    failed_late.run.finish(RunStatus::Failed);
    assert_eq!(failed_late.exit_code(), 1);

    let mut failed = RunReport::new(RunMode::Weekly);
    failed.record_error("run", &PipelineError::StoreUnreachable("gone".into()));
    failed.run.finish(RunStatus::Failed);
    assert_eq!(failed.exit_code(), 2);
}

#[tokio::test]
async fn test_reconcile_without_roster_fails() {
    setup();
    let store = Arc::new(memory_store().await);
    let pipeline = Pipeline::new(test_config(), Arc::new(SourceRegistry::default()), store, Arc::new(FakeFetch::default()));

    let report = pipeline.run(RunMode::Reconcile, None, date(2026, 3, 10)).await;
    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), 2);
}

/// Test a roster run: one entry resolved and stored, one left unresolved
#[tokio::test]
async fn test_reconcile_run_stores_resolved_entries() {
    setup();
    let store = Arc::new(memory_store().await);
    let registry = Arc::new(SourceRegistry::default());
    let url = "https://wowtale.net/2026/03/03/777/";
    let title = "Wrtn, 100억 시리즈A 투자 유치 뤼튼";
    let site = FakeSiteSearch::default().with(1, "뤼튼", vec![candidate(url, title, 1)]);
    let fetch = Arc::new(FakeFetch::default().with(article(1, "WOWTALE", title, url, Some(date(2026, 3, 3)))));
    let reconciler = Reconciler::new(registry.clone(), Arc::new(AliasMap::default()), Arc::new(site), fetch.clone());

    let reply = r#"{"company_name": "Wrtn", "amount": "100억원", "confidence": 8}"#;
    let pipeline = Pipeline::new(test_config(), registry, store.clone(), fetch)
        .with_extractor(extractor(reply))
        .with_reconciler(reconciler);

    let mut roster = tempfile::NamedTempFile::new().unwrap();
    writeln!(roster, "기업명,주요사업,투자자,단계,신규,주차").unwrap();
    writeln!(roster, "뤼튼,AI,알토스벤처스,시리즈A,100억,3월 1주").unwrap();
    writeln!(roster, "없는회사,바이오,,시드,,3월 1주").unwrap();

    let report = pipeline.run(RunMode::Reconcile, Some(roster.path()), date(2026, 3, 10)).await;

    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.deals_written, 1);
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].entry.company_name, "없는회사");
    assert_eq!(report.exit_code(), 0);

    let deals = store.list_day(date(2026, 3, 3)).await.unwrap();
    assert_eq!(deals[0].company_name, "뤼튼");
    assert_eq!(deals[0].industry.as_deref(), Some("AI"));
    assert_eq!(deals[0].stage.as_deref(), Some("시리즈A"));
}

/// Test the backfill mode against a page carrying its date in meta tags
#[tokio::test]
async fn test_backfill_recovers_dates_from_pages() {
    setup();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news/77"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><meta property="article:published_time" content="2026-03-05T08:00:00+09:00"></head>
            <body><p>본문</p></body></html>"#,
        ))
        .mount(&server)
        .await;

    let store = Arc::new(memory_store().await);
    let registry = Arc::new(SourceRegistry::default());
    for (company, url) in [("뤼튼", format!("{}/news/77", server.uri())), ("업스테이지", format!("{}/news/404", server.uri()))] {
        store
            .upsert_deal(DealRecord {
                company_name: company.to_string(),
                news_url: Some(url),
                site_name: Some("WOWTALE".to_string()),
                ..DealRecord::default()
            }, date(2026, 3, 3))
            .await
            .unwrap();
    }

    let dates = Arc::new(DateRecoverer::new(fetcher(), registry.clone(), None, RetryPolicy::fast()));
    let pipeline = Pipeline::new(test_config(), registry, store.clone(), Arc::new(FakeFetch::default())).with_dates(dates);

    let report = pipeline.run(RunMode::BackfillDates, None, date(2026, 3, 10)).await;

    assert_eq!(report.dates_updated, 1);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.list_day(date(2026, 3, 5)).await.unwrap()[0].company_name, "뤼튼");
    assert_eq!(store.list_needing_dates(date(2026, 3, 10)).await.unwrap().len(), 1);
}
