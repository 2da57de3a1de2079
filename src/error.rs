use std::fmt;

/// How a failure is handled by the stage that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff, then the current item is skipped.
    Transient,
    /// The affected source or file is excluded from the run.
    Structural,
    /// The offending field is dropped, the record survives.
    Semantic,
    /// Resolved by merge or by coercing to the fallback source.
    Invariant,
    /// The run is aborted.
    Fatal,
}

#[derive(Debug)]
pub enum PipelineError {
    SourceUnavailable { source: String, reason: String },
    ArticleUnavailable { url: String, reason: String },
    ContentSelectorMissed(String),
    Http(String),
    Timeout(String),
    Llm(String),
    SitemapMalformed(String),
    RosterUnparseable(String),
    Io(String),
    InvalidField(String),
    Database(String),
    DuplicateKey(String),
    StoreUnreachable(String),
    MissingConfig(String),
    Cancelled,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::SourceUnavailable { source, reason } => write!(f, "Source unavailable ({}): {}", source, reason),
            PipelineError::ArticleUnavailable { url, reason } => write!(f, "Article unavailable ({}): {}", url, reason),
            PipelineError::ContentSelectorMissed(url) => write!(f, "No body selector matched for {}", url),
            PipelineError::Http(msg) => write!(f, "HTTP error: {}", msg),
            PipelineError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            PipelineError::Llm(msg) => write!(f, "LLM error: {}", msg),
            PipelineError::SitemapMalformed(msg) => write!(f, "Malformed sitemap: {}", msg),
            PipelineError::RosterUnparseable(msg) => write!(f, "Roster CSV unparseable: {}", msg),
            PipelineError::Io(msg) => write!(f, "I/O error: {}", msg),
            PipelineError::InvalidField(msg) => write!(f, "Invalid field: {}", msg),
            PipelineError::Database(msg) => write!(f, "Database error: {}", msg),
            PipelineError::DuplicateKey(msg) => write!(f, "Duplicate key: {}", msg),
            PipelineError::StoreUnreachable(msg) => write!(f, "Store unreachable: {}", msg),
            PipelineError::MissingConfig(name) => write!(f, "Missing configuration: {}", name),
            PipelineError::Cancelled => write!(f, "Run cancelled"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Http(_) | PipelineError::Timeout(_) | PipelineError::Llm(_) => ErrorClass::Transient,
            PipelineError::SourceUnavailable { .. }
            | PipelineError::SitemapMalformed(_)
            | PipelineError::RosterUnparseable(_)
            | PipelineError::Io(_) => ErrorClass::Structural,
            PipelineError::ArticleUnavailable { .. }
            | PipelineError::ContentSelectorMissed(_)
            | PipelineError::InvalidField(_) => ErrorClass::Semantic,
            PipelineError::Database(_) | PipelineError::DuplicateKey(_) => ErrorClass::Invariant,
            PipelineError::StoreUnreachable(_) | PipelineError::MissingConfig(_) | PipelineError::Cancelled => {
                ErrorClass::Fatal
            }
        }
    }
}

/// Failures that are worth another attempt.
pub trait Transience {
    fn is_transient(&self) -> bool;
}

impl Transience for PipelineError {
    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Timeout(err.to_string())
        } else {
            PipelineError::Http(err.to_string())
        }
    }
}

impl From<sea_orm::DbErr> for PipelineError {
    fn from(err: sea_orm::DbErr) -> Self {
        if let Some(sea_orm::SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            return PipelineError::DuplicateKey(detail);
        }
        match err {
            sea_orm::DbErr::Conn(e) => PipelineError::StoreUnreachable(e.to_string()),
            other => PipelineError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::InvalidField(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::RosterUnparseable(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}
