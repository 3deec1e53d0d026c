use std::time::Duration;

use serde_json::{Value, json};

use triviabees_service::client::{GenerationClient, HttpGenerationClient, USER_AGENT};
use triviabees_service::coordinator::{ErrorClassifier, Retry};
use triviabees_test::{self as test, MockEndpoint};

use crate::{API_KEY, http_client};

#[tokio::test]
async fn test_request_shape() {
    test::setup();
    let endpoint = MockEndpoint::new();
    let client = http_client(&endpoint);

    let response = client
        .generate("text-to-image", &json!({"prompt": "a bee", "style": "ink"}))
        .await
        .unwrap();
    assert_eq!(response["type"], "text-to-image");

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].body,
        json!({"type": "text-to-image", "prompt": "a bee", "style": "ink"})
    );
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some(format!("Bearer {API_KEY}").as_str())
    );
    assert_eq!(requests[0].user_agent.as_deref(), Some(USER_AGENT));
}

#[tokio::test]
async fn test_success_body() {
    test::setup();
    let endpoint = MockEndpoint::new();
    endpoint.respond(
        200,
        json!({"imageUrl": "https://cdn.example.com/bee.png", "cached": false}),
    );
    let client = http_client(&endpoint);

    let response = client
        .generate("text-to-image", &json!({"prompt": "a bee"}))
        .await
        .unwrap();
    assert_eq!(
        response,
        json!({"imageUrl": "https://cdn.example.com/bee.png", "cached": false})
    );
}

#[tokio::test]
async fn test_error_status() {
    test::setup();
    let endpoint = MockEndpoint::new();
    endpoint.respond(402, json!({"error": "Insufficient credits"}));
    endpoint.respond_raw(503, "upstream unavailable");
    let client = http_client(&endpoint);
    let payload = json!({"prompt": "a bee"});

    let error = client.generate("text-to-image", &payload).await.unwrap_err();
    assert_eq!(error.status, Some(402));
    assert_eq!(error.message, "Insufficient credits");
    assert_eq!(client.classifier().classify(&error), Retry::Terminal);

    let error = client.generate("text-to-image", &payload).await.unwrap_err();
    assert_eq!(error.status, Some(503));
    assert!(error.message.contains("503"), "{}", error.message);
    assert_eq!(client.classifier().classify(&error), Retry::Retryable);
}

#[tokio::test]
async fn test_error_in_success_body() {
    test::setup();
    let endpoint = MockEndpoint::new();
    endpoint.respond(200, json!({"error": "Rate limit exceeded", "status": 429}));
    endpoint.respond(200, json!({"error": {"message": "model overloaded"}}));
    let client = http_client(&endpoint);
    let payload = json!({"imageUrl": "https://cdn.example.com/hive.jpg"});

    let error = client.generate("describe-image", &payload).await.unwrap_err();
    assert_eq!(error.status, Some(429));
    assert_eq!(error.message, "Rate limit exceeded");

    let error = client.generate("describe-image", &payload).await.unwrap_err();
    assert_eq!(error.status, Some(200));
    assert_eq!(error.message, "model overloaded");
    assert_eq!(client.classifier().classify(&error), Retry::Retryable);
}

#[tokio::test]
async fn test_invalid_json() {
    test::setup();
    let endpoint = MockEndpoint::new();
    endpoint.respond_raw(200, "<html>oops</html>");
    let client = http_client(&endpoint);

    let error = client
        .generate("describe-video", &Value::Null)
        .await
        .unwrap_err();
    assert_eq!(error.status, Some(200));
    assert!(error.message.contains("invalid JSON"), "{}", error.message);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    test::setup();
    // a port that nothing listens on anymore
    let port = std::net::TcpListener::bind(("127.0.0.1", 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let url = format!("http://127.0.0.1:{port}/generate").parse().unwrap();
    let client = HttpGenerationClient::new(url, None, Duration::from_secs(1)).unwrap();

    let error = client
        .generate("describe-video", &json!({"videoUrl": "x"}))
        .await
        .unwrap_err();
    assert_eq!(error.status, None);
    assert!(error.message.contains("failed to reach"), "{}", error.message);
    assert_eq!(client.classifier().classify(&error), Retry::Retryable);
}
