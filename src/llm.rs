//! Chat completion client used for fact extraction and date lookups.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::LlmSettings;
use crate::error::{PipelineError, Transience};

#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system: String,
    pub prompt: String,
    pub max_output_tokens: u32,
}

#[derive(Debug)]
pub enum LlmError {
    RateLimited(String),
    Timeout(String),
    Transport(String),
    Status { status: u16, body: String },
    Malformed(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            LlmError::Timeout(msg) => write!(f, "LLM call timed out: {}", msg),
            LlmError::Transport(msg) => write!(f, "LLM transport error: {}", msg),
            LlmError::Status { status, body } => write!(f, "LLM API returned {}: {}", status, body),
            LlmError::Malformed(msg) => write!(f, "Malformed LLM response: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

impl Transience for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited(_) | LlmError::Timeout(_) | LlmError::Transport(_) | LlmError::Malformed(_) => true,
            LlmError::Status { status, .. } => *status >= 500,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        PipelineError::Llm(err.to_string())
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// JSON-mode completion at temperature 0.
    async fn complete_json(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// Completion grounded with web search, for reading a live page.
    async fn complete_grounded(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

/// Azure OpenAI Responses API client with a process-wide request budget.
pub struct AzureOpenAiClient {
    http: Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    timeout: Duration,
    limiter: DefaultDirectRateLimiter,
}

impl AzureOpenAiClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, PipelineError> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        let rpm = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            deployment: settings.deployment.clone(),
            timeout: settings.timeout,
            limiter: RateLimiter::direct(Quota::per_minute(rpm)),
        })
    }

    fn responses_url(&self) -> String {
        format!("{}/openai/responses?api-version=2025-03-01-preview", self.endpoint)
    }

    async fn call(&self, body: Value) -> Result<String, LlmError> {
        self.limiter.until_ready().await;

        let full_url = self.responses_url();
        tracing::debug!("Calling OpenAI API: {}", full_url);
        let response = self
            .http
            .post(&full_url)
            .header("api-key", &self.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited(format!("status {}", status)));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            tracing::error!("OpenAI API error: Status {}, Body: {}", status, error_text);
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let value: Value = response.json().await?;
        output_text(&value).ok_or_else(|| LlmError::Malformed("response carried no output text".to_string()))
    }

    fn input(request: &LlmRequest) -> Value {
        json!([
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.prompt },
        ])
    }
}

#[async_trait]
impl LlmClient for AzureOpenAiClient {
    async fn complete_json(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let body = json!({
            "model": self.deployment,
            "input": Self::input(request),
            "temperature": 0,
            "max_output_tokens": request.max_output_tokens,
            "text": { "format": { "type": "json_object" } },
        });
        self.call(body).await
    }

    async fn complete_grounded(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let body = json!({
            "model": self.deployment,
            "input": Self::input(request),
            "temperature": 0,
            "max_output_tokens": request.max_output_tokens,
            "tools": [{ "type": "web_search_preview" }],
        });
        self.call(body).await
    }
}

/// Text of a Responses API payload: `output_text`, or the concatenated
/// `output_text` parts of the message items.
pub fn output_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    if let Some(text) = value.get("output").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let parts: Vec<&str> = value
        .get("output")?
        .as_array()?
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

/// Removes Markdown code-fence framing around a JSON payload.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").or_else(|| rest.strip_prefix("JSON")).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
