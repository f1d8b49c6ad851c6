use docqa_core::config::{GenerationConfig, GenerationProvider};
use docqa_core::traits::{GenerationRequest, Generator};
use docqa_core::GenerationError;
use docqa_llm::{build_generator, OpenAiGenerator};

fn request() -> GenerationRequest {
    GenerationRequest { system: "rules".into(), context: "[Document 1]\nx".into(), question: "q".into() }
}

#[test]
fn openai_provider_builds_without_key() {
    let config = GenerationConfig {
        provider: GenerationProvider::OpenAi,
        api_key_env: "DOCQA_UNSET_OPENAI_KEY".into(),
        base_url: Some("http://127.0.0.1:9/v1".into()),
        ..GenerationConfig::default()
    };
    let generator = build_generator(&config).expect("generator");
    assert_eq!(generator.name(), "openai");
}

#[tokio::test]
async fn unreachable_backend_is_a_transient_transport_error() {
    // Port 9 (discard) is closed on test hosts; the connection is refused.
    let config = GenerationConfig {
        provider: GenerationProvider::OpenAi,
        base_url: Some("http://127.0.0.1:9/v1".into()),
        timeout_secs: 5,
        ..GenerationConfig::default()
    };
    let generator = OpenAiGenerator::new(&config, None).expect("generator");
    let err = generator.generate(&request()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Transport(_) | GenerationError::Timeout(_)));
    assert!(err.is_transient());
}
