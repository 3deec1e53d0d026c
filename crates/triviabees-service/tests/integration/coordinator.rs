use std::time::Duration;

use serde_json::json;

use triviabees_service::coordinator::{DIGEST_FIELD, GenerationError};
use triviabees_test::{self as test, MockEndpoint};

use crate::{coordinator_with, http_client, setup_coordinator};

#[tokio::test]
async fn test_coalesces_over_http() {
    test::setup();
    let endpoint = MockEndpoint::with_delay(Duration::from_millis(200));
    let coordinator = setup_coordinator(&endpoint);

    let (first, second, third) = futures::join!(
        coordinator.generate_image("a bee", Some("ink"), None),
        coordinator.generate_image("a bee", Some("ink"), None),
        coordinator.describe_image("https://cdn.example.com/hive.jpg"),
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert!(third.is_ok());
    assert_eq!(endpoint.hits(), 2);

    // served from the cache
    coordinator
        .generate_image("a bee", Some("ink"), None)
        .await
        .unwrap();
    assert_eq!(endpoint.hits(), 2);
    assert_eq!(coordinator.status().cache_size, 2);
}

#[tokio::test]
async fn test_digest_is_sent() {
    test::setup();
    let endpoint = MockEndpoint::new();
    let coordinator = setup_coordinator(&endpoint);

    coordinator
        .describe_video("https://cdn.example.com/dance.mp4")
        .await
        .unwrap();

    let body = &endpoint.requests()[0].body;
    assert_eq!(body["type"], "describe-video");
    assert_eq!(body["videoUrl"], "https://cdn.example.com/dance.mp4");
    assert_eq!(body[DIGEST_FIELD].as_str().map(str::len), Some(64));
}

#[tokio::test]
async fn test_retries_server_errors() {
    test::setup();
    let endpoint = MockEndpoint::new();
    endpoint.respond(500, json!({"error": "internal error"}));
    endpoint.respond(502, json!({"message": "bad gateway"}));
    endpoint.respond(200, json!({"imageUrl": "https://cdn.example.com/bee.png"}));
    let coordinator = coordinator_with(http_client(&endpoint));

    let result = coordinator.generate_image("a bee", None, None).await;
    assert_eq!(
        result,
        Ok(json!({"imageUrl": "https://cdn.example.com/bee.png"}))
    );
    assert_eq!(endpoint.hits(), 3);
}

#[tokio::test]
async fn test_out_of_credits_is_not_retried() {
    test::setup();
    let endpoint = MockEndpoint::new();
    endpoint.respond(200, json!({"error": "Out of credits"}));
    let coordinator = setup_coordinator(&endpoint);

    let result = coordinator.generate_image("a bee", None, None).await;
    assert_eq!(
        result,
        Err(GenerationError::Rejected {
            status: Some(200),
            message: "Out of credits".into(),
        })
    );
    assert_eq!(endpoint.hits(), 1);
    assert_eq!(coordinator.status().cache_size, 0);
}
