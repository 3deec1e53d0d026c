//! Helpers for testing the coordinator against a real HTTP stack.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`MockEndpoint`], make sure that it is held until all requests to it have been
//!    made. Once it is dropped, the server stops and all connections to it fail. To avoid this,
//!    assign it to a variable: `let endpoint = MockEndpoint::new();`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `triviabees_service` crate and
///    mutes all other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("triviabees_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.addr().port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A request received by [`MockEndpoint`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub body: Value,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug)]
struct MockResponse {
    status: StatusCode,
    body: String,
}

#[derive(Debug, Default)]
struct MockState {
    delay: Duration,
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// A stand-in for the hosted generation function, serving `POST /generate`.
///
/// Responses are replayed in the order they were scripted with [`respond`](Self::respond). Once
/// the script runs dry, the endpoint answers `200` with `{"type": <type>, "echo": <body>}`.
pub struct MockEndpoint {
    server: Server,
    state: Arc<MockState>,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every response is sent after `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        let state = Arc::new(MockState {
            delay,
            ..Default::default()
        });

        let router = Router::new()
            .route("/generate", post(generate))
            .with_state(state.clone());

        Self {
            server: Server::with_router(router),
            state,
        }
    }

    /// Scripts a JSON response.
    pub fn respond(&self, status: u16, body: Value) {
        self.respond_raw(status, &body.to_string());
    }

    /// Scripts a response with an arbitrary body.
    pub fn respond_raw(&self, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap();
        self.state.responses.lock().unwrap().push_back(MockResponse {
            status,
            body: body.to_owned(),
        });
    }

    /// The URL of the generation function.
    pub fn url(&self) -> Url {
        self.server.url("generate")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

async fn generate(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    state.requests.lock().unwrap().push(RecordedRequest {
        body: body.clone(),
        authorization: header_value(header::AUTHORIZATION),
        user_agent: header_value(header::USER_AGENT),
    });

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    let scripted = state.responses.lock().unwrap().pop_front();
    let MockResponse { status, body } = scripted.unwrap_or_else(|| MockResponse {
        status: StatusCode::OK,
        body: json!({ "type": body["type"], "echo": body }).to_string(),
    });

    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
