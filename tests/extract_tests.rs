use dealintel::config::RetryPolicy;
use dealintel::extract::{build_prompt, facts_from_value, parse_response, post_validate, Extractor, BODY_PROMPT_CHARS};
use dealintel::llm::LlmError;
use dealintel::models::Stage;
use dealintel::select::score;
use serde_json::json;
use std::sync::Arc;

mod common;
use common::{article, date, setup, FakeLlm};

fn extractor(llm: FakeLlm) -> Extractor {
    Extractor::new(Arc::new(llm), RetryPolicy::fast(), false)
}

/// Test the happy path: a funding article becomes a scored record
#[tokio::test]
async fn test_happy_path_extraction() {
    setup();
    let llm = FakeLlm::answering(
        r#"```json
{"company_name": "뤼튼", "stage": "Series A", "investors": ["알토스벤처스", "삼성벤처투자"],
 "amount": "100억원", "founded": "2020", "confidence": 9}
```"#,
    );
    let item = article(
        1,
        "WOWTALE",
        "뤼튼, 100억원 시리즈A 투자 유치",
        "https://wowtale.net/2026/03/02/1001/",
        Some(date(2026, 3, 2)),
    );

    let facts = extractor(llm).extract(&item, date(2026, 3, 2)).await;

    assert_eq!(facts.company_name, "뤼튼");
    assert_eq!(facts.stage, Some(Stage::SeriesA));
    assert_eq!(facts.investors.as_deref(), Some("알토스벤처스, 삼성벤처투자"));
    assert_eq!(facts.amount, Some(100.0));
    assert_eq!(facts.founded, Some(date(2020, 1, 1)));
    assert_eq!(facts.confidence, 9);
    assert_eq!(score(&facts), 8);
}

/// Test that a dollar figure copied verbatim is converted to 억원
#[tokio::test]
async fn test_usd_amount_is_coerced() {
    setup();
    let llm = FakeLlm::answering(r#"{"company_name": "Rebellions", "amount": 100, "confidence": 8}"#);
    let item = article(
        1,
        "WOWTALE",
        "Rebellions raises $100M in Series C",
        "https://wowtale.net/2026/03/03/1002/",
        Some(date(2026, 3, 3)),
    );

    let facts = extractor(llm).extract(&item, date(2026, 3, 3)).await;
    assert_eq!(facts.amount, Some(1300.0));
}

#[tokio::test]
async fn test_malformed_reply_gives_empty_facts() {
    setup();
    let llm = FakeLlm::answering("I could not find a deal in this article.");
    let item = article(1, "WOWTALE", "뤼튼, 신규 서비스 출시", "https://wowtale.net/x/", None);

    let facts = extractor(llm).extract(&item, date(2026, 3, 3)).await;
    assert!(facts.is_empty());
    assert_eq!(facts.confidence, 0);
}

#[tokio::test]
async fn test_exhausted_retries_keep_headline_company() {
    setup();
    let llm = Arc::new(FakeLlm::new(|_| Err(LlmError::Timeout("slow".to_string()))));
    let extractor = Extractor::new(llm.clone(), RetryPolicy::fast(), false);
    let item = article(1, "WOWTALE", "[투자] 업스테이지, 시리즈B 유치", "https://wowtale.net/y/", None);

    let facts = extractor.extract(&item, date(2026, 3, 3)).await;
    assert_eq!(facts.company_name, "업스테이지");
    assert_eq!(facts.confidence, 0);
    assert_eq!(facts.amount, None);
    // first call plus three retries
    assert_eq!(llm.call_count(), 4);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    setup();
    let llm = Arc::new(FakeLlm::new(|_| {
        Err(LlmError::Status {
            status: 400,
            body: "bad request".to_string(),
        })
    }));
    let extractor = Extractor::new(llm.clone(), RetryPolicy::fast(), false);
    let item = article(1, "WOWTALE", "뤼튼, 투자 유치", "https://wowtale.net/z/", None);

    extractor.extract(&item, date(2026, 3, 3)).await;
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_title_only_confidence_is_capped() {
    setup();
    let llm = FakeLlm::answering(r#"{"company_name": "뤼튼", "confidence": 10}"#);
    let mut item = article(1, "WOWTALE", "뤼튼, 투자 유치", "https://wowtale.net/t/", None);
    item.raw_body = None;

    let facts = extractor(llm).extract(&item, date(2026, 3, 3)).await;
    assert_eq!(facts.confidence, 5);
}

#[tokio::test]
async fn test_title_amount_fallback_is_opt_in() {
    setup();
    let reply = r#"{"company_name": "뤼튼", "amount": null, "confidence": 7}"#;
    let item = article(1, "WOWTALE", "뤼튼, 50억 규모 투자 유치", "https://wowtale.net/f/", None);

    let off = Extractor::new(Arc::new(FakeLlm::answering(reply)), RetryPolicy::fast(), false);
    assert_eq!(off.extract(&item, date(2026, 3, 3)).await.amount, None);

    let on = Extractor::new(Arc::new(FakeLlm::answering(reply)), RetryPolicy::fast(), true);
    assert_eq!(on.extract(&item, date(2026, 3, 3)).await.amount, Some(50.0));
}

#[test]
fn test_prompt_truncates_body() {
    let body = "가".repeat(BODY_PROMPT_CHARS + 500);
    let request = build_prompt("제목", Some(&body));
    assert!(request.prompt.contains("Title: 제목"));
    let excerpt = request.prompt.split("Body:\n").nth(1).unwrap();
    assert_eq!(excerpt.chars().count(), BODY_PROMPT_CHARS);

    let title_only = build_prompt("제목", None);
    assert!(title_only.prompt.contains("Only the headline"));
}

#[test]
fn test_post_validation_rules() {
    let today = date(2026, 3, 3);
    let raw = parse_response(
        r#"Here you go: {"company_name": "A", "amount": 10000000, "total_funding": 500000,
            "employees": 0, "founded": "1975", "confidence": 14}"#,
    )
    .unwrap();
    let facts = post_validate(facts_from_value(&raw), "A, 투자 유치", today);

    assert_eq!(facts.amount, Some(1000.0));
    // 500000 is below the raw-won threshold and above the ceiling
    assert_eq!(facts.total_funding, None);
    assert_eq!(facts.employees, None);
    assert_eq!(facts.founded, None);
    assert_eq!(facts.confidence, 10);
}

#[test]
fn test_lenient_field_reading() {
    let value = json!({
        "company_name": " 뤼튼 ",
        "ceo": "null",
        "investors": "알토스벤처스,  ,삼성벤처투자",
        "employees": "120명",
        "confidence": "7"
    });
    let facts = facts_from_value(&value);
    assert_eq!(facts.company_name, "뤼튼");
    assert_eq!(facts.ceo, None);
    assert_eq!(facts.investors.as_deref(), Some("알토스벤처스, 삼성벤처투자"));
    assert_eq!(facts.employees, Some(120));
    assert_eq!(facts.confidence, 7);
}
