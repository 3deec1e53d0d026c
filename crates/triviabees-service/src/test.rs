//! Helpers for unit tests of the service crate.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::client::GenerationClient;
use crate::coordinator::RemoteError;
use crate::utils::defer::defer;

pub use triviabees_test::setup;

/// A call observed by [`ScriptedClient`].
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: String,
    pub payload: Value,
    pub at: Instant,
}

/// A [`GenerationClient`] that replays scripted responses and records every call.
///
/// Once the script runs dry, every call succeeds with `{"kind": <kind>, "call": <n>}`.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    delay: Duration,
    script: Mutex<VecDeque<Result<Value, RemoteError>>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call takes `delay` before it responds.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Appends a response to the script.
    pub fn push(&self, response: Result<Value, RemoteError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The request kinds in the order they were dispatched.
    pub fn kinds(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.kind).collect()
    }

    /// The largest number of calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl GenerationClient for ScriptedClient {
    fn generate<'a>(
        &'a self,
        kind: &'a str,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<Value, RemoteError>> {
        Box::pin(async move {
            let call_no = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Call {
                    kind: kind.to_owned(),
                    payload: payload.clone(),
                    at: Instant::now(),
                });
                calls.len()
            };
            let response = self.script.lock().unwrap().pop_front();

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            let _in_flight = defer(|| {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            });

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            response.unwrap_or_else(|| Ok(json!({ "kind": kind, "call": call_no })))
        })
    }
}
