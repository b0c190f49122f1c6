use chatpass_core::config::ProviderConfig;
use chatpass_core::services::provider::{ProviderError, classify_failure};
use chatpass_core::services::OpenAiProvider;
use chatpass_core::types::Uses;

#[test]
fn quota_errors_are_recognised() {
    let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
    let err = classify_failure(Some(429), body);
    assert!(matches!(err, ProviderError::QuotaExceeded(_)));
    assert_eq!(
        err.user_message(),
        "API quota exceeded. Please try again later."
    );
}

#[test]
fn missing_models_are_recognised() {
    let by_code = classify_failure(Some(400), r#"{"error":{"code":"model_not_found"}}"#);
    assert!(matches!(by_code, ProviderError::ModelUnavailable(_)));

    let by_text = classify_failure(None, "The Model Not Found on this account");
    assert!(matches!(by_text, ProviderError::ModelUnavailable(_)));

    let by_status = classify_failure(Some(404), "nope");
    assert!(matches!(by_status, ProviderError::ModelUnavailable(_)));
    assert_eq!(
        by_status.user_message(),
        "Model access not available. Please check your API key permissions."
    );
}

#[test]
fn everything_else_is_other() {
    assert_eq!(
        classify_failure(Some(500), "boom"),
        ProviderError::Other("HTTP 500: boom".to_string())
    );
    assert_eq!(
        classify_failure(None, "connection reset"),
        ProviderError::Other("connection reset".to_string())
    );
    assert_eq!(
        ProviderError::Timeout.user_message(),
        "Error communicating with the chat provider"
    );
}

#[test]
fn provider_needs_its_key() {
    let cfg = ProviderConfig {
        api_key_env: "CHATPASS_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        ..ProviderConfig::default()
    };
    assert!(OpenAiProvider::from_config(&cfg).is_err());
    assert!(OpenAiProvider::new(&cfg, "sk-test".to_string()).is_ok());
}

#[test]
fn uses_serialize_as_count_or_word() {
    assert_eq!(serde_json::to_string(&Uses::Limited(7)).unwrap(), "7");
    assert_eq!(serde_json::to_string(&Uses::Unlimited).unwrap(), "\"unlimited\"");
    assert_eq!(serde_json::from_str::<Uses>("\"Unlimited\"").unwrap(), Uses::Unlimited);
    assert!(serde_json::from_str::<Uses>("\"many\"").is_err());
    assert!(serde_json::from_str::<Uses>("-1").is_err());

    assert_eq!(Uses::Limited(3).plus(Uses::Limited(4)), Uses::Limited(7));
    assert_eq!(Uses::Limited(u64::MAX).plus(Uses::Limited(1)), Uses::Limited(u64::MAX));
    assert_eq!(Uses::Limited(3).plus(Uses::Unlimited), Uses::Unlimited);
    assert!(Uses::Unlimited.covers(u64::MAX));
    assert!(!Uses::Limited(2).covers(3));
    assert_eq!(Uses::Unlimited.to_string(), "Unlimited");
}
