use super::*;

fn unreachable_config() -> OllamaConfig {
    OllamaConfig {
        protocol: "http".to_string(),
        // Reserved TEST-NET address, nothing listens there
        host: "192.0.2.1".to_string(),
        port: 9,
        model: "test-model".to_string(),
        batch_size: 4,
        embedding_dimension: 64,
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        embedding_dimension: 384,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(EmbeddingProvider::dimension(&client), 384);
    assert_eq!(EmbeddingProvider::name(&client), "test-model");
}

#[test]
fn client_builder_methods() {
    let config = OllamaConfig::default();
    let client = OllamaClient::new(&config)
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn embed_request_uses_input_field() {
    let texts = vec!["alpha".to_string(), "beta".to_string()];
    let request = EmbedRequest {
        model: "m",
        input: &texts,
    };
    let json = serde_json::to_value(&request).expect("should serialize");
    assert_eq!(json["model"], "m");
    assert_eq!(json["input"][1], "beta");
}

#[test]
fn embed_response_parses_embeddings() {
    let response: EmbedResponse =
        serde_json::from_str(r#"{"model":"m","embeddings":[[0.1,0.2],[0.3,0.4]]}"#)
            .expect("should parse");
    assert_eq!(response.embeddings.len(), 2);
    assert_eq!(response.embeddings[1], vec![0.3, 0.4]);
}

#[test]
fn dimension_check_rejects_wrong_length() {
    let client = OllamaClient::new(&unreachable_config()).expect("Failed to create client");
    assert!(client.check_dimensions(&[vec![0.0; 64]]).is_ok());
    assert!(matches!(
        client.check_dimensions(&[vec![0.0; 64], vec![0.0; 3]]),
        Err(KnowledgeError::DimensionMismatch {
            expected: 64,
            actual: 3
        })
    ));
}

#[tokio::test]
async fn embed_honours_prior_cancellation() {
    let client = OllamaClient::new(&unreachable_config()).expect("Failed to create client");
    let signal = CancellationSignal::new();
    signal.cancel();

    let result = client.embed("hello", &signal).await;
    assert!(matches!(result, Err(KnowledgeError::Cancelled)));
}

#[tokio::test]
async fn empty_batch_skips_request() {
    let client = OllamaClient::new(&unreachable_config()).expect("Failed to create client");
    let result = client
        .embed_batch(&[], &CancellationSignal::new())
        .await
        .expect("empty batch should succeed");
    assert!(result.is_empty());
}

#[test]
fn model_names_default_to_latest_tag() {
    let installed = ModelInfo {
        name: "nomic-embed-text:latest".to_string(),
        size: Some(274_302_450),
        details: None,
    };
    assert!(installed.matches("nomic-embed-text"));
    assert!(installed.matches("nomic-embed-text:latest"));
    assert!(!installed.matches("nomic-embed-text:v1.5"));
    assert!(!installed.matches("mxbai-embed-large"));
}

#[test]
fn tags_response_parses_models() {
    let response: TagsResponse = serde_json::from_str(
        r#"{"models":[{"name":"all-minilm:latest","size":45960996,"digest":"1b22","details":{"family":"bert","parameter_size":"23M"}}]}"#,
    )
    .expect("should parse");
    assert_eq!(response.models.len(), 1);
    let details = response.models[0]
        .details
        .as_ref()
        .expect("details should be present");
    assert_eq!(details.family.as_deref(), Some("bert"));
}

#[test]
fn only_server_and_transport_errors_are_retried() {
    assert!(is_transient(&ureq::Error::StatusCode(503)));
    assert!(is_transient(&ureq::Error::ConnectionFailed));
    assert!(!is_transient(&ureq::Error::StatusCode(404)));
}
