//! Access to the remote generation endpoint.
//!
//! The [`RequestCoordinator`](crate::coordinator::RequestCoordinator) talks to the endpoint
//! exclusively through the [`GenerationClient`] trait. [`HttpGenerationClient`] is the production
//! implementation, tests substitute their own.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::coordinator::{ErrorClassifier, RemoteError, StatusClassifier};

mod http;

pub use http::HttpGenerationClient;

/// The `User-Agent` sent to the generation endpoint.
pub const USER_AGENT: &str = concat!("triviabees/", env!("CARGO_PKG_VERSION"));

/// A single remote procedure: "generate `kind` from `payload`".
pub trait GenerationClient: Send + Sync + 'static {
    /// Performs exactly one attempt. Retries are the caller's business.
    fn generate<'a>(
        &'a self,
        kind: &'a str,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<Value, RemoteError>>;

    /// The classifier that knows which errors of this client are worth retrying.
    fn classifier(&self) -> Arc<dyn ErrorClassifier> {
        Arc::new(StatusClassifier)
    }
}

/// Builds the JSON body `{"type": kind, ...payload}`.
///
/// Object payloads are flattened into the body, other non-null payloads are sent under the
/// `payload` key. The `type` field always reflects `kind`.
pub fn request_body(kind: &str, payload: &Value) -> Value {
    let mut body = Map::new();
    match payload {
        Value::Object(fields) => {
            for (key, value) in fields {
                body.insert(key.clone(), value.clone());
            }
        }
        Value::Null => {}
        other => {
            body.insert("payload".into(), other.clone());
        }
    }
    body.insert("type".into(), Value::from(kind));
    Value::Object(body)
}
