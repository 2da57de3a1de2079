//! Deal fact extraction from an article title and body.
//!
//! The model is asked for one JSON object; everything it returns is then
//! checked against the same rules the store enforces, so a bad answer costs a
//! field rather than a record.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::llm::{strip_code_fence, LlmClient, LlmError, LlmRequest};
use crate::models::{Article, ExtractedFacts};
use crate::normalize::{
    amount_from_title, nfc, normalize_amount, normalize_founded, normalize_stage, usd_amount_in_title,
    within_currency_ceiling, MAX_PLAUSIBLE_AMOUNT,
};
use crate::retry::with_retries;

/// Body characters included in the prompt.
pub const BODY_PROMPT_CHARS: usize = 3000;
/// Confidence ceiling when only the headline was available.
pub const TITLE_ONLY_MAX_CONFIDENCE: u8 = 5;
const MAX_EMPLOYEES: i64 = 1_000_000;
const RAW_WON_THRESHOLD: f64 = 1_000_000.0;

const SYSTEM_PROMPT: &str = "You extract startup investment facts from Korean news articles. \
Reply with a single JSON object and nothing else.";

const RULES: &str = "Rules:
1. company_name is the company that RECEIVED the investment, never an investor.
2. amount and total_funding are numbers in 억원 (100 million KRW). Convert: 1조 = 10000, 50억 = 50, $1M = 13. Use null if undisclosed.
3. stage must be one of: 시드, 프리A, 시리즈A, 시리즈B, 시리즈C, 시리즈D+, 프리IPO, 브릿지, M&A, or null.
4. investors is a comma-separated string of investor names, or null.
5. founded is YYYY-MM-DD or YYYY; employees is an integer; unknown values are null.
6. confidence is an integer 0-10 for how sure you are this article reports one funding deal.
Keys: company_name, ceo, founded, industry, stage, investors, amount, total_funding, location, employees, confidence.";

static BRACKET_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[\[【(<][^\]】)>]*[\]】)>]\s*)+").expect("bracket prefix regex"));
static TRAILING_PARTICLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(은|는|이|가|에)$").expect("particle regex"));

/// Prompt for one article; the body is cut to [`BODY_PROMPT_CHARS`].
pub fn build_prompt(title: &str, body: Option<&str>) -> LlmRequest {
    let prompt = match body {
        Some(body) => {
            let excerpt: String = body.chars().take(BODY_PROMPT_CHARS).collect();
            format!("{RULES}\n\nTitle: {title}\n\nBody:\n{excerpt}")
        }
        None => format!("{RULES}\n\nOnly the headline is available.\n\nTitle: {title}"),
    };
    LlmRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        max_output_tokens: 600,
    }
}

/// Parses the model reply, tolerating code fences and prose around the object.
pub fn parse_response(raw: &str) -> Option<Value> {
    let text = strip_code_fence(raw);
    let value = serde_json::from_str::<Value>(text).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        serde_json::from_str(text.get(start..=end)?).ok()
    })?;
    value.is_object().then_some(value)
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => {
            let s = nfc(s.trim());
            let blank = s.is_empty() || matches!(s.to_lowercase().as_str(), "null" | "none" | "n/a" | "-" | "unknown");
            (!blank).then_some(s)
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn amount_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64().filter(|v| *v > 0.0),
        Value::String(s) => normalize_amount(s),
        _ => None,
    }
}

fn investors_field(value: &Value) -> Option<String> {
    let names: Vec<String> = match value.get("investors")? {
        Value::String(s) => s.split(',').map(|n| nfc(n.trim())).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|n| nfc(n.trim()))
            .collect(),
        _ => return None,
    };
    let names: Vec<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
    (!names.is_empty()).then(|| names.join(", "))
}

fn employees_field(value: &Value) -> Option<i64> {
    match value.get("employees")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.chars().filter(char::is_ascii_digit).collect::<String>().parse().ok(),
        _ => None,
    }
}

/// Reads model output into facts without judging plausibility.
pub fn facts_from_value(value: &Value) -> ExtractedFacts {
    let confidence = value
        .get("confidence")
        .and_then(|c| c.as_f64().or_else(|| c.as_str().and_then(|s| s.trim().parse().ok())))
        .map(|c| c.round().clamp(0.0, 10.0) as u8)
        .unwrap_or(0);

    ExtractedFacts {
        company_name: text_field(value, "company_name").unwrap_or_default(),
        ceo: text_field(value, "ceo"),
        founded: text_field(value, "founded").and_then(|f| normalize_founded(&f)),
        industry: text_field(value, "industry"),
        stage: text_field(value, "stage").and_then(|s| normalize_stage(&s)),
        investors: investors_field(value),
        amount: amount_field(value, "amount"),
        total_funding: amount_field(value, "total_funding"),
        location: text_field(value, "location"),
        employees: employees_field(value)
            .filter(|e| (1..=MAX_EMPLOYEES).contains(e))
            .map(|e| e as i32),
        confidence,
    }
}

/// One corrective ÷10,000 for amounts that look like raw won or 만원.
fn rescale(amount: f64) -> Option<f64> {
    if amount <= RAW_WON_THRESHOLD {
        return Some(amount);
    }
    let corrected = amount / 10_000.0;
    (0.1..=MAX_PLAUSIBLE_AMOUNT).contains(&corrected).then_some(corrected)
}

fn checked_amount(amount: Option<f64>, title: &str) -> Option<f64> {
    amount
        .and_then(rescale)
        .filter(|a| within_currency_ceiling(*a, title))
}

fn earliest_founding() -> NaiveDate {
    NaiveDate::from_ymd_opt(1980, 1, 1).expect("valid constant date")
}

/// Field checks applied to every model answer.
pub fn post_validate(mut facts: ExtractedFacts, title: &str, today: NaiveDate) -> ExtractedFacts {
    if let (Some(amount), Some((raw, converted))) = (facts.amount, usd_amount_in_title(title)) {
        if (amount - raw).abs() < f64::EPSILON && (raw - converted).abs() > f64::EPSILON {
            debug!("Converting dollar figure {} to {} 억원", raw, converted);
            facts.amount = Some(converted);
        }
    }
    facts.amount = checked_amount(facts.amount, title);
    facts.total_funding = checked_amount(facts.total_funding, title);
    facts.employees = facts
        .employees
        .filter(|e| (1..=MAX_EMPLOYEES).contains(&i64::from(*e)));
    facts.founded = facts
        .founded
        .filter(|d| *d >= earliest_founding() && *d <= today);
    facts.confidence = facts.confidence.min(10);
    facts
}

/// Best guess at the funded company from a headline such as `뤼튼, 100억원 투자 유치`.
pub fn company_from_title(title: &str) -> Option<String> {
    let title = nfc(title);
    let stripped = BRACKET_PREFIX_RE.replace(&title, "");
    let stripped = stripped.trim();
    if let Some((head, _)) = stripped.split_once(',') {
        let head = head.trim();
        if !head.is_empty() && head.chars().count() <= 30 {
            return Some(head.to_string());
        }
    }
    let first = stripped.split_whitespace().next()?;
    let name = TRAILING_PARTICLE_RE.replace(first, "");
    (name.chars().count() >= 2).then(|| name.to_string())
}

pub struct Extractor {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    title_amount_fallback: bool,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy, title_amount_fallback: bool) -> Self {
        Self {
            llm,
            retry,
            title_amount_fallback,
        }
    }

    async fn ask(&self, request: &LlmRequest) -> Result<Value, LlmError> {
        let raw = self.llm.complete_json(request).await?;
        parse_response(&raw).ok_or_else(|| LlmError::Malformed(raw.chars().take(200).collect()))
    }

    #[tracing::instrument(skip(self, article), fields(url = %article.url))]
    pub async fn extract(&self, article: &Article, today: NaiveDate) -> ExtractedFacts {
        let body = article.raw_body.as_deref().map(str::trim).filter(|b| !b.is_empty());
        let request = build_prompt(&article.title, body);

        let value = match with_retries(&self.retry, "extraction", || self.ask(&request)).await {
            Ok(value) => value,
            Err(LlmError::Malformed(snippet)) => {
                warn!("Model returned malformed JSON for {}: {}", article.url, snippet);
                return ExtractedFacts::default();
            }
            Err(e) => {
                warn!("Extraction failed for {}, keeping headline guess: {}", article.url, e);
                return ExtractedFacts {
                    company_name: company_from_title(&article.title).unwrap_or_default(),
                    confidence: 0,
                    ..ExtractedFacts::default()
                };
            }
        };

        let mut facts = post_validate(facts_from_value(&value), &article.title, today);
        if body.is_none() {
            facts.confidence = facts.confidence.min(TITLE_ONLY_MAX_CONFIDENCE);
        }
        if facts.amount.is_none() && self.title_amount_fallback {
            facts.amount = checked_amount(amount_from_title(&article.title), &article.title);
        }
        facts
    }
}
