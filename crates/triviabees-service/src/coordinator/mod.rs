//! # Generation request coordination
//!
//! Calls to the remote generation endpoint are slow, cost money, and fail every now and then.
//! Call sites therefore never talk to the endpoint directly but go through a shared
//! [`RequestCoordinator`], which layers the following on top of a [`GenerationClient`]:
//!
//! - **Result caching**: successful results are kept in a [`ResultCache`] for a fixed TTL
//!   (5 minutes by default). A cache hit is returned without touching the network.
//! - **Request coalescing**: requests are identified by their [`RequestDigest`], a SHA-256 hash
//!   over the request kind and its canonicalized payload. Identical requests arriving while one is
//!   queued or in flight join that request instead of creating a new one, and all of them receive
//!   the same result or the same error.
//! - **Queueing**: at most [`max_concurrent`] requests are in flight at once. The rest wait in a
//!   [`PriorityQueue`], highest priority first and in arrival order within one priority. A waiting
//!   request is never reordered, and a request in flight is never preempted.
//! - **Retries**: failed attempts are classified by an [`ErrorClassifier`]. Terminal failures
//!   (payment required, rate limited, out of credits) are returned right away, transient ones are
//!   retried with exponential backoff (1s, 2s, 4s, … by default), up to [`max_attempts`].
//!
//! A request moves through `queued → in flight → resolved | failed`. Only a successful result
//! is cached; a failure leaves nothing behind, so the very next identical request starts over.
//!
//! ## Bounds
//!
//! Each attempt is bounded by [`attempt_timeout`], so a hung endpoint cannot hold a slot forever.
//! The queue is unbounded unless [`max_queue_length`] is configured. A full queue makes room for
//! a new request by shedding the oldest of its lowest-priority entries, provided the new request
//! has a higher priority. Otherwise the new request is rejected with
//! [`GenerationError::QueueFull`].
//!
//! ## Cancellation
//!
//! A caller can withdraw through [`RequestCoordinator::request_with_cancel`], or simply by dropping
//! the request future. This removes only that caller from its request; others waiting on the same
//! digest are unaffected. A queued request that loses all its callers is removed from the queue,
//! while a request in flight always runs to completion and its result is cached.
//!
//! ## Metrics
//!
//! - `coordinator.access`: all requests.
//! - `coordinator.cache.hit`: requests served by the result cache.
//! - `coordinator.coalesced`: requests that joined a pending request.
//! - `coordinator.dispatch`: requests sent to the endpoint.
//! - `coordinator.queue.wait`: time spent in the queue before dispatch.
//! - `coordinator.queue.length` / `coordinator.active`: gauges updated on every dispatch.
//! - `coordinator.retry`, `coordinator.failed`, `coordinator.shed`, `coordinator.rejected`,
//!   `coordinator.withdrawn`.
//!
//! [`GenerationClient`]: crate::client::GenerationClient
//! [`max_concurrent`]: crate::config::CoordinatorConfig::max_concurrent
//! [`max_attempts`]: crate::config::CoordinatorConfig::max_attempts
//! [`attempt_timeout`]: crate::config::CoordinatorConfig::attempt_timeout
//! [`max_queue_length`]: crate::config::CoordinatorConfig::max_queue_length

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{GenerationClient, HttpGenerationClient};
use crate::config::Config;
use crate::types::{CoordinatorStatus, GenerationRequest};
use crate::utils::defer::defer;

mod cache;
mod digest;
mod error;
mod queue;
mod retry;

pub use cache::ResultCache;
pub use digest::{DigestBuilder, RequestDigest};
pub use error::{ErrorClassifier, GenerationError, RemoteError, Retry, StatusClassifier};
pub use queue::PriorityQueue;
pub use retry::{RetryPolicy, execute_with_retry};

/// What every caller of the coordinator eventually receives.
pub type GenerationResult = Result<Value, GenerationError>;

/// The payload field that carries the digest to the endpoint.
pub const DIGEST_FIELD: &str = "requestHash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Queued,
    InFlight,
}

struct Waiter {
    id: u64,
    sender: oneshot::Sender<GenerationResult>,
}

/// All callers waiting on one underlying request.
struct PendingGroup {
    stage: Stage,
    /// In registration order.
    waiters: Vec<Waiter>,
}

struct QueueEntry {
    digest: RequestDigest,
    kind: String,
    payload: Value,
    enqueued_at: Instant,
}

struct State {
    pending: HashMap<RequestDigest, PendingGroup>,
    queue: PriorityQueue<QueueEntry>,
    cache: ResultCache<Value>,
    active: usize,
    next_waiter_id: u64,
}

struct Inner {
    client: Arc<dyn GenerationClient>,
    classifier: Arc<dyn ErrorClassifier>,
    policy: RetryPolicy,
    max_concurrent: usize,
    max_queue_length: Option<usize>,
    /// Never held across an `.await`.
    state: Mutex<State>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes a caller that gave up waiting.
    fn withdraw(&self, digest: &RequestDigest, waiter_id: u64) {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let Some(group) = state.pending.get_mut(digest) else {
            return;
        };
        group.waiters.retain(|waiter| waiter.id != waiter_id);

        if group.waiters.is_empty() && group.stage == Stage::Queued {
            state.pending.remove(digest);
            state.queue.remove_first(|entry| entry.digest == *digest);
            metric!(counter("coordinator.withdrawn") += 1);
            tracing::trace!(%digest, "Dropped queued request without callers");
        }
    }

    async fn run(self: Arc<Self>, entry: QueueEntry) {
        let QueueEntry {
            digest,
            kind,
            payload,
            ..
        } = entry;

        // Frees the slot and fails the callers in case the client panics.
        let panic_guard = {
            let inner = Arc::clone(&self);
            defer(move || complete(&inner, digest, Err(GenerationError::InternalError)))
        };

        let result = execute_with_retry(
            &*self.client,
            &*self.classifier,
            &self.policy,
            &kind,
            &payload,
        )
        .await;

        panic_guard.disarm();
        complete(&self, digest, result);
    }
}

/// Dispatches queued requests until all slots are taken.
fn process_queue(inner: &Arc<Inner>, state: &mut State) {
    while state.active < inner.max_concurrent {
        let Some(entry) = state.queue.pop() else {
            break;
        };
        let Some(group) = state.pending.get_mut(&entry.digest) else {
            continue;
        };

        group.stage = Stage::InFlight;
        state.active += 1;

        metric!(counter("coordinator.dispatch") += 1, "type" => &entry.kind);
        metric!(
            timer("coordinator.queue.wait") = entry.enqueued_at.elapsed(),
            "type" => &entry.kind,
        );
        tracing::debug!(digest = %entry.digest, "Dispatching `{}` request", entry.kind);

        tokio::spawn(Arc::clone(inner).run(entry));
    }

    metric!(gauge("coordinator.queue.length") = state.queue.len() as u64);
    metric!(gauge("coordinator.active") = state.active as u64);
}

/// Resolves the request for `digest`, releases its slot and dispatches more work.
fn complete(inner: &Arc<Inner>, digest: RequestDigest, result: GenerationResult) {
    let waiters = {
        let mut guard = inner.lock_state();
        let state = &mut *guard;

        state.active = state.active.saturating_sub(1);
        if let Ok(value) = &result {
            state.cache.insert(digest, value.clone(), Instant::now());
        }
        let waiters = state
            .pending
            .remove(&digest)
            .map(|group| group.waiters)
            .unwrap_or_default();

        process_queue(inner, state);
        waiters
    };

    tracing::trace!(%digest, waiters = waiters.len(), "Resolved generation request");
    for waiter in waiters {
        // the caller may have stopped waiting in the meantime
        let _ = waiter.sender.send(result.clone());
    }
}

/// The outcome of registering a request.
enum Submission {
    Ready(Value),
    Waiting(Ticket),
}

/// A registered caller. Dropping it before the result arrived withdraws the caller.
struct Ticket {
    inner: Arc<Inner>,
    digest: RequestDigest,
    waiter_id: u64,
    receiver: oneshot::Receiver<GenerationResult>,
    resolved: bool,
}

impl Ticket {
    async fn wait(&mut self) -> GenerationResult {
        let result = (&mut self.receiver).await;
        self.resolved = true;
        result.unwrap_or(Err(GenerationError::InternalError))
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.resolved {
            self.inner.withdraw(&self.digest, self.waiter_id);
        }
    }
}

/// Deduplicates, queues, retries and caches calls to the generation endpoint.
///
/// Create one coordinator per process and share it; clones are cheap and share all state.
/// See the [module documentation](self) for the full picture.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RequestCoordinator");
        debug
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("max_queue_length", &self.inner.max_queue_length)
            .field("policy", &self.inner.policy);
        if let Ok(state) = self.inner.state.try_lock() {
            debug
                .field("queued", &state.queue.len())
                .field("active", &state.active)
                .field("cached", &state.cache.len());
        }
        debug.finish()
    }
}

impl RequestCoordinator {
    /// Creates a coordinator that classifies errors the way `client` suggests.
    pub fn new(config: &Config, client: Arc<dyn GenerationClient>) -> Self {
        let classifier = client.classifier();
        Self::with_classifier(config, client, classifier)
    }

    /// Creates a coordinator with an explicit [`ErrorClassifier`].
    pub fn with_classifier(
        config: &Config,
        client: Arc<dyn GenerationClient>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        let state = State {
            pending: HashMap::new(),
            queue: PriorityQueue::default(),
            cache: ResultCache::new(config.cache.ttl, config.cache.capacity),
            active: 0,
            next_waiter_id: 0,
        };

        let inner = Inner {
            client,
            classifier,
            policy: RetryPolicy::from_config(&config.coordinator),
            max_concurrent: config.coordinator.max_concurrent.max(1),
            max_queue_length: config.coordinator.max_queue_length,
            state: Mutex::new(state),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a coordinator talking to the configured HTTP endpoint.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = HttpGenerationClient::from_config(&config.endpoint)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Requests a generation of `kind` from `payload`.
    ///
    /// Higher `priority` values are dispatched sooner; `0` is the default.
    pub async fn request(&self, kind: &str, payload: Value, priority: i32) -> GenerationResult {
        match self.submit(kind, payload, priority)? {
            Submission::Ready(value) => Ok(value),
            Submission::Waiting(mut ticket) => ticket.wait().await,
        }
    }

    /// Like [`request`](Self::request), but gives up with [`GenerationError::Cancelled`] once
    /// `cancel` is triggered.
    pub async fn request_with_cancel(
        &self,
        kind: &str,
        payload: Value,
        priority: i32,
        cancel: CancellationToken,
    ) -> GenerationResult {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        match self.submit(kind, payload, priority)? {
            Submission::Ready(value) => Ok(value),
            Submission::Waiting(mut ticket) => {
                let digest = ticket.digest;
                tokio::select! {
                    result = ticket.wait() => result,
                    _ = cancel.cancelled() => {
                        tracing::trace!(%digest, "Caller cancelled `{}` request", kind);
                        Err(GenerationError::Cancelled)
                    }
                }
            }
        }
    }

    /// Runs a [`GenerationRequest`] through [`request`](Self::request).
    pub async fn execute(&self, request: GenerationRequest) -> GenerationResult {
        self.request(&request.kind, request.payload, request.priority)
            .await
    }

    /// Drops all cached results.
    pub fn clear_cache(&self) {
        self.inner.lock_state().cache.clear();
        tracing::debug!("Cleared the result cache");
    }

    /// Returns a diagnostic snapshot.
    pub fn status(&self) -> CoordinatorStatus {
        let state = self.inner.lock_state();
        CoordinatorStatus {
            queue_length: state.queue.len(),
            active_requests: state.active,
            cache_size: state.cache.len(),
        }
    }

    /// Serves the request from the cache, or registers the caller with a new or pending request.
    fn submit(
        &self,
        kind: &str,
        payload: Value,
        priority: i32,
    ) -> Result<Submission, GenerationError> {
        if kind.is_empty() {
            return Err(GenerationError::InvalidRequest(
                "the request type must not be empty".into(),
            ));
        }

        let digest = RequestDigest::new(kind, &payload);
        metric!(counter("coordinator.access") += 1, "type" => kind);

        let mut guard = self.inner.lock_state();
        let state = &mut *guard;

        if let Some(value) = state.cache.get(&digest, Instant::now()) {
            metric!(counter("coordinator.cache.hit") += 1, "type" => kind);
            tracing::trace!(%digest, "Serving `{}` from the result cache", kind);
            return Ok(Submission::Ready(value));
        }

        let waiter_id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (sender, receiver) = oneshot::channel();
        let waiter = Waiter {
            id: waiter_id,
            sender,
        };

        if let Some(group) = state.pending.get_mut(&digest) {
            group.waiters.push(waiter);
            metric!(counter("coordinator.coalesced") += 1, "type" => kind);
            tracing::trace!(%digest, "Joining pending `{}` request", kind);
        } else {
            self.make_room(state, priority)?;

            state.pending.insert(
                digest,
                PendingGroup {
                    stage: Stage::Queued,
                    waiters: vec![waiter],
                },
            );
            state.queue.push(
                priority,
                QueueEntry {
                    digest,
                    kind: kind.to_owned(),
                    payload: with_digest(payload, &digest),
                    enqueued_at: Instant::now(),
                },
            );
            process_queue(&self.inner, state);
        }
        drop(guard);

        Ok(Submission::Waiting(Ticket {
            inner: Arc::clone(&self.inner),
            digest,
            waiter_id,
            receiver,
            resolved: false,
        }))
    }

    /// Enforces the queue bound before a new request with `priority` is enqueued.
    fn make_room(&self, state: &mut State, priority: i32) -> Result<(), GenerationError> {
        let Some(max_queue_length) = self.inner.max_queue_length else {
            return Ok(());
        };
        // a request that is dispatched right away never waits in the queue
        if state.active < self.inner.max_concurrent || state.queue.len() < max_queue_length {
            return Ok(());
        }

        match state.queue.lowest_priority() {
            Some(lowest) if lowest < priority => {
                if let Some((_, shed)) = state.queue.shed_lowest() {
                    if let Some(group) = state.pending.remove(&shed.digest) {
                        for waiter in group.waiters {
                            let _ = waiter.sender.send(Err(GenerationError::QueueFull));
                        }
                    }
                    metric!(counter("coordinator.shed") += 1, "type" => &shed.kind);
                    tracing::debug!(digest = %shed.digest, "Shed queued `{}` request", shed.kind);
                }
                Ok(())
            }
            _ => {
                metric!(counter("coordinator.rejected") += 1);
                Err(GenerationError::QueueFull)
            }
        }
    }
}

/// Adds the digest to object payloads, so the endpoint can correlate retries.
fn with_digest(payload: Value, digest: &RequestDigest) -> Value {
    match payload {
        Value::Object(mut fields) => {
            fields.insert(DIGEST_FIELD.into(), Value::from(digest.to_string()));
            Value::Object(fields)
        }
        other => other,
    }
}
