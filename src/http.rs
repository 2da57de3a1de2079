//! Polite HTTP fetching shared by every stage that touches the network.
//!
//! A global semaphore caps in-flight requests; each source (or host, for
//! unregistered URLs) has its own gate so requests to it are serialized and
//! spaced by the configured delay.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, EUC_KR, UTF_8};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

use crate::config::{Config, RetryPolicy, MAX_HTTP_CONCURRENCY};
use crate::error::PipelineError;
use crate::normalize::bare_host;
use crate::registry::Source;
use crate::retry::with_retries;

const SPOOFED_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static META_CHARSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9_\-]+)"#).expect("meta charset regex"));

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub body: String,
}

/// Spacing rule for one source or host.
#[derive(Debug, Clone)]
pub struct Gate {
    pub key: String,
    pub delay: Duration,
    pub legacy_encoding: bool,
}

pub struct HttpFetcher {
    client: Client,
    in_flight: Semaphore,
    gates: Mutex<HashMap<String, Arc<AsyncMutex<Option<Instant>>>>>,
    source_delay: Duration,
    throttled_delay: Duration,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(SPOOFED_USER_AGENT)
            .build()?;
        Ok(Self::with_client(
            client,
            config.http_concurrency,
            config.source_delay,
            config.throttled_delay,
            config.retry.clone(),
        ))
    }

    pub fn with_client(
        client: Client,
        concurrency: usize,
        source_delay: Duration,
        throttled_delay: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            in_flight: Semaphore::new(concurrency.clamp(1, MAX_HTTP_CONCURRENCY)),
            gates: Mutex::new(HashMap::new()),
            source_delay,
            throttled_delay,
            retry,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn gate_for_source(&self, source: &Source) -> Gate {
        Gate {
            key: format!("source:{}", source.source_id),
            delay: if source.throttled { self.throttled_delay } else { self.source_delay },
            legacy_encoding: source.legacy_encoding,
        }
    }

    pub fn gate_for_url(&self, url: &str) -> Gate {
        Gate {
            key: format!("host:{}", bare_host(url).unwrap_or_default()),
            delay: self.source_delay,
            legacy_encoding: false,
        }
    }

    fn gate_lock(&self, key: &str) -> Arc<AsyncMutex<Option<Instant>>> {
        let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        gates.entry(key.to_string()).or_default().clone()
    }

    /// GET with retries on 5xx, 429, timeouts and connection failures.
    #[tracing::instrument(skip(self, gate), fields(gate = %gate.key))]
    pub async fn fetch(&self, url: &str, gate: &Gate) -> Result<FetchedPage, PipelineError> {
        with_retries(&self.retry, url, || self.fetch_once(url, gate)).await
    }

    async fn fetch_once(&self, url: &str, gate: &Gate) -> Result<FetchedPage, PipelineError> {
        let lock = self.gate_lock(&gate.key);
        let mut last = lock.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < gate.delay {
                tokio::time::sleep(gate.delay - elapsed).await;
            }
        }
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|e| PipelineError::Http(e.to_string()))?;

        tracing::debug!("Fetching: {}", url);
        let result = self.client.get(url).send().await;
        *last = Some(Instant::now());
        let response = result?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(PipelineError::Http(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(PipelineError::ArticleUnavailable {
                url: url.to_string(),
                reason: format!("status {}", status),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        let body = decode_body(&bytes, content_type.as_deref(), gate.legacy_encoding);

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            body,
        })
    }
}

/// Decodes a response body.
///
/// Order: `Content-Type` charset, `<meta charset>`, valid UTF-8, EUC-KR for
/// the legacy CMS family, statistical detection.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>, legacy_default: bool) -> String {
    if let Some(encoding) = content_type.and_then(charset_param).and_then(|label| Encoding::for_label(label.as_bytes())) {
        return encoding.decode(bytes).0.into_owned();
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(2048)]);
    if let Some(encoding) = META_CHARSET_RE
        .captures(&head)
        .and_then(|caps| Encoding::for_label(caps[1].as_bytes()))
    {
        return encoding.decode(bytes).0.into_owned();
    }
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8.decode(bytes).0.into_owned();
    }
    if legacy_default {
        return EUC_KR.decode(bytes).0.into_owned();
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(Some(b"kr"), true).decode(bytes).0.into_owned()
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_charset_wins() {
        let (bytes, _, _) = EUC_KR.encode("투자 유치");
        let decoded = decode_body(&bytes, Some("text/html; charset=EUC-KR"), false);
        assert_eq!(decoded, "투자 유치");
    }

    #[test]
    fn legacy_sources_default_to_euc_kr() {
        let (bytes, _, _) = EUC_KR.encode("<p>시리즈A 투자</p>");
        assert_eq!(decode_body(&bytes, Some("text/html"), true), "<p>시리즈A 투자</p>");
    }

    #[test]
    fn meta_charset_is_honoured() {
        let html = "<html><head><meta charset=\"euc-kr\"></head><body>펀딩</body></html>";
        let (bytes, _, _) = EUC_KR.encode(html);
        assert!(decode_body(&bytes, None, false).contains("펀딩"));
    }

    #[test]
    fn utf8_passes_through() {
        assert_eq!(decode_body("라운드".as_bytes(), None, true), "라운드");
    }
}
