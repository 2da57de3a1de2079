use chrono::{NaiveDate, Utc};
use dealintel::digest::{
    build_daily, build_weekly, footer, previous_week, Digest, DigestSink, JsonFileSink, TOP_N,
};
use dealintel::entities::deal;

mod common;
use common::{date, setup};

fn deal(number: i32, company: &str, news_date: NaiveDate, amount: Option<f64>) -> deal::Model {
    deal::Model {
        id: number,
        number,
        company_name: company.to_string(),
        ceo: None,
        founded: None,
        industry: None,
        stage: None,
        investors: None,
        amount,
        total_funding: None,
        location: None,
        employees: None,
        news_title: Some(format!("{company}, 투자 유치")),
        news_url: Some(format!("https://wowtale.net/{number}/")),
        news_date: Some(news_date),
        site_name: Some("WOWTALE".to_string()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn tagged(mut model: deal::Model, industry: Option<&str>, stage: Option<&str>, investors: &str) -> deal::Model {
    model.industry = industry.map(str::to_string);
    model.stage = stage.map(str::to_string);
    model.investors = Some(investors.to_string()).filter(|s| !s.is_empty());
    model
}

/// Test the daily list: one day only, largest amount first
#[test]
fn test_daily_digest_orders_by_amount() {
    let day = date(2026, 3, 3);
    let deals = vec![
        deal(1, "뤼튼", day, Some(50.0)),
        deal(2, "업스테이지", day, None),
        deal(3, "리벨리온", day, Some(300.0)),
        deal(4, "퓨리오사", date(2026, 3, 2), Some(800.0)),
    ];
    let digest = build_daily(&deals, day, 0);

    let names: Vec<&str> = digest.items.iter().map(|i| i.company.as_str()).collect();
    assert_eq!(names, vec!["리벨리온", "뤼튼", "업스테이지"]);
    assert_eq!(digest.total, 3);
    assert_eq!(digest.footer, None);
}

#[test]
fn test_footer_only_with_errors() {
    assert_eq!(footer(0), None);
    assert_eq!(footer(3).as_deref(), Some("3 errors encountered"));
    let digest = build_daily(&[], date(2026, 3, 3), 2);
    assert_eq!(digest.total, 0);
    assert_eq!(digest.footer.as_deref(), Some("2 errors encountered"));
}

#[test]
fn test_previous_week_bounds() {
    assert_eq!(previous_week(date(2026, 3, 11)), (date(2026, 3, 2), date(2026, 3, 8)));
    assert_eq!(previous_week(date(2026, 3, 9)), (date(2026, 3, 2), date(2026, 3, 8)));
}

/// Test the weekly aggregates over a mixed week
#[test]
fn test_weekly_aggregates() {
    let mon = date(2026, 3, 2);
    let sun = date(2026, 3, 8);
    let deals = vec![
        tagged(deal(1, "뤼튼", date(2026, 3, 2), Some(100.0)), Some("AI"), Some("시리즈A"), "알토스벤처스, 삼성벤처투자"),
        tagged(deal(2, "업스테이지", date(2026, 3, 4), Some(250.5)), Some("AI"), Some("시리즈B"), "알토스벤처스"),
        tagged(deal(3, "마켓컬리", date(2026, 3, 5), None), None, None, ""),
        tagged(deal(4, "인수대상", date(2026, 3, 6), Some(5000.0)), Some("커머스"), Some("M&A"), "어떤PE"),
        tagged(deal(5, "다음주", date(2026, 3, 9), Some(900.0)), Some("AI"), None, "알토스벤처스"),
    ];

    let weekly = build_weekly(&deals, mon, sun, false, 1);
    assert_eq!(weekly.total_deals, 3);
    assert_eq!(weekly.total_amount, 350.5);
    assert_eq!(weekly.max_deal.as_ref().map(|d| d.company.as_str()), Some("업스테이지"));
    assert_eq!(weekly.top_deals.len(), 2);
    assert!(weekly.top_deals.len() <= TOP_N);

    assert_eq!(weekly.industries[0].label, "AI");
    assert_eq!(weekly.industries[0].count, 2);
    assert_eq!(weekly.industries[1].label, "미분류");
    assert!(weekly.stages.iter().any(|s| s.label == "미분류" && s.count == 1));

    assert_eq!(weekly.top_investors[0].investor, "알토스벤처스");
    assert_eq!(weekly.top_investors[0].deals, 2);
    assert_eq!(weekly.footer.as_deref(), Some("1 errors encountered"));

    let with_mna = build_weekly(&deals, mon, sun, true, 0);
    assert_eq!(with_mna.total_deals, 4);
    assert_eq!(with_mna.max_deal.map(|d| d.company), Some("인수대상".to_string()));
}

#[test]
fn test_empty_week() {
    let weekly = build_weekly(&[], date(2026, 3, 2), date(2026, 3, 8), false, 0);
    assert_eq!(weekly.total_deals, 0);
    assert_eq!(weekly.total_amount, 0.0);
    assert!(weekly.max_deal.is_none());
    assert!(weekly.industries.is_empty());
}

#[tokio::test]
async fn test_json_sink_writes_file() {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonFileSink::new(dir.path().join("digests"));
    let digest = Digest::Daily(build_daily(&[deal(1, "뤼튼", date(2026, 3, 3), Some(50.0))], date(2026, 3, 3), 0));

    sink.deliver(&digest).await.unwrap();

    let written = std::fs::read_to_string(dir.path().join("digests").join("daily-2026-03-03.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(value["kind"], "daily");
    assert_eq!(value["items"][0]["company"], "뤼튼");
}
