//! Support to call the generation endpoint over HTTP.

use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::config::EndpointConfig;
use crate::coordinator::RemoteError;

use super::{GenerationClient, USER_AGENT, request_body};

/// A [`GenerationClient`] that POSTs JSON to a hosted function.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    url: Url,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(
        url: Url,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url,
            api_key,
        })
    }

    pub fn from_config(config: &EndpointConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .context("no generation endpoint URL configured")?;
        Self::new(url, config.api_key.clone(), config.connect_timeout)
            .context("failed to create the HTTP client")
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send(&self, kind: &str, payload: &Value) -> Result<Value, RemoteError> {
        tracing::debug!("Calling generation endpoint `{}` for `{}`", self.url, kind);

        let mut builder = self
            .client
            .post(self.url.clone())
            .json(&request_body(kind, payload));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        let body: Option<Value> = serde_json::from_slice(&bytes).ok();

        if !status.is_success() {
            let message = body
                .as_ref()
                .and_then(|body| body_error(body).or_else(|| body_message(body)))
                .unwrap_or_else(|| format!("generation endpoint responded with {status}"));
            return Err(RemoteError::new(Some(status.as_u16()), message));
        }

        let Some(body) = body else {
            return Err(RemoteError::new(
                Some(status.as_u16()),
                "generation endpoint responded with invalid JSON",
            ));
        };
        if let Some(message) = body_error(&body) {
            return Err(RemoteError::new(error_status(status, &body), message));
        }

        Ok(body)
    }
}

impl GenerationClient for HttpGenerationClient {
    fn generate<'a>(
        &'a self,
        kind: &'a str,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<Value, RemoteError>> {
        Box::pin(self.send(kind, payload))
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    let message = format!("failed to reach the generation endpoint: {err}");
    RemoteError {
        timed_out: err.is_timeout(),
        ..RemoteError::transport(message)
    }
}

/// Extracts the `error` field of a response body.
fn body_error(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(error) => Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| Value::Object(error.clone()).to_string(), str::to_owned),
        ),
        other => Some(other.to_string()),
    }
}

fn body_message(body: &Value) -> Option<String> {
    body.get("message")?.as_str().map(str::to_owned)
}

/// Hosted functions sometimes answer `200` with an error body that carries the real status.
fn error_status(status: StatusCode, body: &Value) -> Option<u16> {
    body.get("status")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .or(Some(status.as_u16()))
}
