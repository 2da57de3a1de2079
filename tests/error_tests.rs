use dealintel::error::{ErrorClass, PipelineError, Transience};
use dealintel::llm::LlmError;

// Test for PipelineError Display implementation
#[test]
fn test_pipeline_error_display() {
    let error = PipelineError::SourceUnavailable {
        source: "WOWTALE".to_string(),
        reason: "status 503".to_string(),
    };
    assert_eq!(error.to_string(), "Source unavailable (WOWTALE): status 503");

    let error = PipelineError::MissingConfig("DATABASE_URL".to_string());
    assert_eq!(error.to_string(), "Missing configuration: DATABASE_URL");

    assert_eq!(PipelineError::Cancelled.to_string(), "Run cancelled");
}

// Test that every failure lands in the class its stage expects
#[test]
fn test_error_classes() {
    assert_eq!(PipelineError::Timeout("x".into()).class(), ErrorClass::Transient);
    assert_eq!(PipelineError::Http("503".into()).class(), ErrorClass::Transient);
    assert_eq!(PipelineError::SitemapMalformed("x".into()).class(), ErrorClass::Structural);
    assert_eq!(PipelineError::RosterUnparseable("x".into()).class(), ErrorClass::Structural);
    assert_eq!(PipelineError::InvalidField("x".into()).class(), ErrorClass::Semantic);
    assert_eq!(PipelineError::DuplicateKey("x".into()).class(), ErrorClass::Invariant);
    assert_eq!(PipelineError::StoreUnreachable("x".into()).class(), ErrorClass::Fatal);
    assert_eq!(PipelineError::Cancelled.class(), ErrorClass::Fatal);
}

#[test]
fn test_only_transient_errors_retry() {
    assert!(PipelineError::Timeout("x".into()).is_transient());
    assert!(!PipelineError::ArticleUnavailable {
        url: "https://wowtale.net/x/".into(),
        reason: "404".into()
    }
    .is_transient());

    assert!(LlmError::Timeout("slow".into()).is_transient());
    assert!(LlmError::RateLimited("429".into()).is_transient());
    assert!(LlmError::Status { status: 503, body: String::new() }.is_transient());
    assert!(!LlmError::Status { status: 400, body: String::new() }.is_transient());
}

#[test]
fn test_conversions() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "roster.csv");
    assert!(matches!(PipelineError::from(io), PipelineError::Io(_)));

    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(PipelineError::from(json), PipelineError::InvalidField(_)));
}
