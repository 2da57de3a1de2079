//! Shared parsing for amounts, dates, company names, stages and URLs.
//!
//! Every stage that reads a monetary amount or a date goes through these
//! functions so the stored values agree regardless of where they came from.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::models::Stage;

/// KRW per USD used for every dollar conversion.
pub const KRW_PER_USD: f64 = 1300.0;

/// Largest amount (억원, i.e. 10조) accepted unless the title mentions 조.
pub const MAX_PLAUSIBLE_AMOUNT: f64 = 100_000.0;

const UNDISCLOSED: &[&str] = &["n/a", "na", "none", "null", "없음", "미정", "undisclosed"];

// One term such as `3억`, `5천만` or `천억`; adjacent terms add up.
static KOREAN_TERM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\d+(?:\.\d+)?)\s*)?([천백])?\s*([조억만])").expect("korean unit regex")
});
// The unit may run straight into Hangul, as in `10M달러`.
static ENGLISH_UNITS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(billion|million|thousand|bn|mn|b|m|k)(?:[^a-z0-9]|$)")
        .expect("english unit regex")
});
static PLAIN_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("number regex"));
static USD_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\$|달러|usd|us\s*dollars?)").expect("usd marker regex"));
static AMOUNT_PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\$\s?\d[\d,]*(?:\.\d+)?(?:\s*(?:billion|million|bn|mn|b|m|k)(?:[^a-z0-9]|$))?|\d[\d,]*(?:\.\d+)?\s*[천백]?\s*조(?:\s*\d[\d,]*(?:\.\d+)?\s*[천백]?\s*억)?(?:\s*\d[\d,]*(?:\.\d+)?\s*[천백]?\s*만)?\s*(?:원|달러)?|\d[\d,]*(?:\.\d+)?\s*[천백]?\s*억(?:\s*\d[\d,]*(?:\.\d+)?\s*[천백]?\s*만)?\s*(?:원|달러)?|\d[\d,]*(?:\.\d+)?\s*[천백]?\s*만\s*(?:원|달러))",
    )
    .expect("amount phrase regex")
});

static KOREAN_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\s*년\s*(\d{1,2})\s*월\s*(\d{1,2})\s*일").expect("korean date regex"));
static SEPARATED_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\s*[./\-]\s*(\d{1,2})\s*[./\-]\s*(\d{1,2})").expect("separated date regex"));
static COMPACT_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").expect("compact date regex"));
static YEAR_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\s*(?:년\s*|[./\-]\s*)(\d{1,2})\s*월?").expect("year month regex"));
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(19\d{2}|20\d{2})").expect("year regex"));

static ENGLISH_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s,]+(inc\.?|corp\.?|corporation|co\.?,?\s*ltd\.?|ltd\.?|llc|co\.)$").expect("suffix regex")
});
const KOREAN_CORPORATE_MARKERS: &[&str] = &["(주)", "㈜", "주식회사", "(유)", "유한회사", "(株)"];

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "from", "ocid", "igshid", "mc_cid", "mc_eid"];

pub fn nfc(text: &str) -> String {
    text.nfc().collect()
}

/// Parses a free-form amount string into 억원.
///
/// Handles Korean units (조/억/만 with 천/백 multipliers), dollar amounts in Korean or English
/// notation and bare numbers, which are read as 억원 already.
/// Undisclosed markers yield `None`.
pub fn normalize_amount(raw: &str) -> Option<f64> {
    let text = nfc(raw).replace(',', "");
    let text = text.trim();
    let lowered = text.to_lowercase();
    if text.is_empty()
        || text.chars().all(|c| matches!(c, '-' | '—' | '–' | '.' | ' '))
        || UNDISCLOSED.contains(&lowered.as_str())
        || lowered.contains("비공개")
        || lowered.contains("미공개")
    {
        return None;
    }

    let usd = USD_MARKER_RE.is_match(text);

    if let Some(eok) = korean_units(text) {
        let value = if usd { eok * KRW_PER_USD } else { eok };
        return positive(value);
    }

    if let Some(caps) = ENGLISH_UNITS_RE.captures(text) {
        let number: f64 = caps[1].parse().ok()?;
        let multiplier = match caps[2].to_lowercase().as_str() {
            "billion" | "bn" | "b" => 1e9,
            "million" | "mn" | "m" => 1e6,
            _ => 1e3,
        };
        let units = number * multiplier;
        let won = if usd || (!lowered.contains('원') && !lowered.contains("krw")) {
            units * KRW_PER_USD
        } else {
            units
        };
        return positive(won / 1e8);
    }

    let number: f64 = PLAIN_NUMBER_RE.captures(text)?[1].parse().ok()?;
    if usd {
        return positive(number * KRW_PER_USD / 1e8);
    }
    if text.ends_with('원') && number >= 1e6 {
        return positive(number / 1e8);
    }
    positive(number)
}

/// Sums the first run of adjacent Korean unit terms, in 억.
///
/// `1조 5천억` is 15000, `1억2천만` is 1.2. A term needs a number or a
/// 천/백 multiplier, so a stray `만` inside a word is ignored.
fn korean_units(text: &str) -> Option<f64> {
    let mut total: Option<f64> = None;
    let mut last_end = 0;
    for caps in KOREAN_TERM_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let number = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
        let multiplier = match caps.get(2).map(|m| m.as_str()) {
            Some("천") => Some(1_000.0),
            Some("백") => Some(100.0),
            _ => None,
        };
        if total.is_some() && !text[last_end..whole.start()].trim().is_empty() {
            break;
        }
        if number.is_none() && multiplier.is_none() {
            if total.is_some() {
                break;
            }
            continue;
        }
        let count = number.unwrap_or(1.0) * multiplier.unwrap_or(1.0);
        let term = match &caps[3] {
            "조" => count * 10_000.0,
            "억" => count,
            _ => count / 10_000.0,
        };
        total = Some(total.unwrap_or(0.0) + term);
        last_end = whole.end();
    }
    total
}

fn positive(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let rounded = (value * 10_000.0).round() / 10_000.0;
    (rounded > 0.0).then_some(rounded)
}

/// First amount phrase found in a headline, e.g. `100억원` or `$10M`.
pub fn amount_phrase(title: &str) -> Option<String> {
    AMOUNT_PHRASE_RE.find(title).map(|m| m.as_str().trim().to_string())
}

/// Amount phrase in a headline, normalized to 억원.
pub fn amount_from_title(title: &str) -> Option<f64> {
    amount_phrase(title).and_then(|phrase| normalize_amount(&phrase))
}

/// Raw dollar figure and its 억원 value when the headline states a USD amount.
///
/// Used to catch a model that copied `$100M` as `100`.
pub fn usd_amount_in_title(title: &str) -> Option<(f64, f64)> {
    let phrase = amount_phrase(title)?;
    if !USD_MARKER_RE.is_match(&phrase) {
        return None;
    }
    let raw: f64 = PLAIN_NUMBER_RE.captures(&phrase.replace(',', ""))?[1].parse().ok()?;
    Some((raw, normalize_amount(&phrase)?))
}

/// Applies the 10조 ceiling: larger amounts survive only when the headline says 조.
pub fn within_currency_ceiling(amount: f64, title: &str) -> bool {
    amount <= MAX_PLAUSIBLE_AMOUNT || title.contains('조')
}

/// Parses the date formats seen in Korean news pages and feeds.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let text = nfc(raw);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.date_naive());
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    if let Some(caps) = KOREAN_DATE_RE.captures(text) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }
    if let Some(caps) = SEPARATED_DATE_RE.captures(text) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }
    if let Some(caps) = COMPACT_DATE_RE.captures(text) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }
    None
}

/// First `YYYY년 M월 D일` or `YYYY.MM.DD`-style date inside running text.
pub fn date_in_text(text: &str) -> Option<NaiveDate> {
    let text = nfc(text);
    KOREAN_DATE_RE
        .captures(&text)
        .and_then(|caps| ymd(&caps[1], &caps[2], &caps[3]))
        .or_else(|| {
            SEPARATED_DATE_RE
                .captures(&text)
                .and_then(|caps| ymd(&caps[1], &caps[2], &caps[3]))
        })
}

/// Founding dates are often only a year (`2020년 설립`); missing parts become 1.
pub fn normalize_founded(raw: &str) -> Option<NaiveDate> {
    if let Some(date) = normalize_date(raw) {
        return Some(date);
    }
    let text = nfc(raw);
    if let Some(caps) = YEAR_MONTH_RE.captures(&text) {
        if let Some(date) = ymd(&caps[1], &caps[2], "1") {
            return Some(date);
        }
    }
    YEAR_RE.captures(&text).and_then(|caps| ymd(&caps[1], "1", "1"))
}

pub(crate) fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

pub fn earliest_news_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid constant date")
}

/// News dates must fall in [2020-01-01, today].
pub fn is_valid_news_date(date: NaiveDate, today: NaiveDate) -> bool {
    date >= earliest_news_date() && date <= today
}

/// Grouping key for company names: NFC, corporate markers and whitespace removed.
pub fn normalize_company(raw: &str) -> String {
    let mut name = nfc(raw.trim());
    for marker in KOREAN_CORPORATE_MARKERS {
        name = name.replace(marker, " ");
    }
    let mut name = name.trim().to_string();
    loop {
        let stripped = ENGLISH_SUFFIX_RE.replace(&name, "").trim().to_string();
        if stripped == name || stripped.is_empty() {
            break;
        }
        name = stripped;
    }
    name.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

/// Maps free-form round names onto the closed stage vocabulary.
pub fn normalize_stage(raw: &str) -> Option<Stage> {
    let key: String = nfc(raw)
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect();
    if key.is_empty() {
        return None;
    }
    if let Some(stage) = Stage::from_label(&nfc(raw.trim())) {
        return Some(stage);
    }
    if key.contains("m&a") || key.contains("인수") || key.contains("합병") || key.contains("acquisition") {
        return Some(Stage::MergerAcquisition);
    }
    if key.contains("프리ipo") || key.contains("preipo") {
        return Some(Stage::PreIpo);
    }
    if key.contains("프리시리즈a") || key.contains("프리a") || key.contains("preseriesa") || key.contains("prea") {
        return Some(Stage::PreA);
    }
    if key.contains("브릿지") || key.contains("브리지") || key.contains("bridge") {
        return Some(Stage::Bridge);
    }
    if key.contains("시드") || key.contains("씨드") || key.contains("seed") || key.contains("엔젤") || key.contains("angel") {
        return Some(Stage::Seed);
    }
    for (marker, stage) in [
        ("a", Stage::SeriesA),
        ("b", Stage::SeriesB),
        ("c", Stage::SeriesC),
        ("d", Stage::SeriesDPlus),
        ("e", Stage::SeriesDPlus),
        ("f", Stage::SeriesDPlus),
        ("g", Stage::SeriesDPlus),
    ] {
        if key.contains(&format!("시리즈{marker}")) || key.contains(&format!("series{marker}")) {
            return Some(stage);
        }
    }
    None
}

/// Canonical form of an article URL used as the deduplication key.
///
/// Protocol-relative links become https, relative links are resolved against
/// `base`, fragments and tracking parameters are dropped.
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("javascript:") || raw.starts_with("mailto:") {
        return None;
    }
    let absolute = if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        raw.to_string()
    };
    let mut url = match Url::parse(&absolute) {
        Ok(url) => url,
        Err(_) => base?.join(&absolute).ok()?,
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

/// Host without a leading `www.`.
pub fn bare_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}
