use std::sync::Arc;
use std::time::Duration;

use triviabees_service::client::HttpGenerationClient;
use triviabees_service::config::{Config, CoordinatorConfig, EndpointConfig};
use triviabees_service::coordinator::RequestCoordinator;
use triviabees_test::MockEndpoint;

pub const API_KEY: &str = "test-api-key";

/// A client for `endpoint` that authenticates with [`API_KEY`].
pub fn http_client(endpoint: &MockEndpoint) -> HttpGenerationClient {
    HttpGenerationClient::new(
        endpoint.url(),
        Some(API_KEY.into()),
        Duration::from_secs(5),
    )
    .unwrap()
}

/// A coordinator talking to `endpoint`, with retries that do not slow down the tests.
pub fn setup_coordinator(endpoint: &MockEndpoint) -> RequestCoordinator {
    let config = Config {
        endpoint: EndpointConfig {
            url: Some(endpoint.url()),
            api_key: Some(API_KEY.into()),
            ..Default::default()
        },
        coordinator: CoordinatorConfig {
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    };
    RequestCoordinator::from_config(&config).unwrap()
}

/// Like [`setup_coordinator`], but with an explicit client.
pub fn coordinator_with(client: HttpGenerationClient) -> RequestCoordinator {
    let config = Config {
        coordinator: CoordinatorConfig {
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    };
    RequestCoordinator::new(&config, Arc::new(client))
}
