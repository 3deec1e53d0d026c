use std::time::Duration;

use thiserror::Error;

/// The failure of a single attempt against the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    /// The HTTP status of the response, if the endpoint responded at all.
    pub status: Option<u16>,
    /// A human readable explanation, usually taken from the response body.
    pub message: String,
    /// Whether the attempt was aborted because it took too long.
    pub timed_out: bool,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            timed_out: false,
        }
    }

    /// An error that happened before a response was received.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            status: None,
            message: format!("generation timed out after {after:?}"),
            timed_out: true,
        }
    }
}

/// Whether a failed attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// A transient failure, like a dropped connection or a 5xx response.
    Retryable,
    /// Repeating the request will not help, e.g. the account ran out of credits.
    Terminal,
}

/// Decides which [`RemoteError`]s are retried.
pub trait ErrorClassifier: Send + Sync + 'static {
    fn classify(&self, error: &RemoteError) -> Retry;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&RemoteError) -> Retry + Send + Sync + 'static,
{
    fn classify(&self, error: &RemoteError) -> Retry {
        self(error)
    }
}

/// Message fragments of payment, credit and rate limit failures.
const TERMINAL_MARKERS: &[&str] = &[
    "credit",
    "payment",
    "rate limit",
    "rate-limit",
    "too many requests",
    "402",
    "429",
];

/// The default classifier for the HTTP generation endpoint.
///
/// `402 Payment Required` and `429 Too Many Requests` responses are terminal, and so is any
/// error whose message talks about credits, payment or rate limits. Everything else is retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusClassifier;

impl ErrorClassifier for StatusClassifier {
    fn classify(&self, error: &RemoteError) -> Retry {
        if matches!(error.status, Some(402 | 429)) {
            return Retry::Terminal;
        }

        let message = error.message.to_lowercase();
        if TERMINAL_MARKERS.iter().any(|marker| message.contains(marker)) {
            Retry::Terminal
        } else {
            Retry::Retryable
        }
    }
}

/// The error a caller of the [`RequestCoordinator`](super::RequestCoordinator) receives.
///
/// All callers waiting on the same request receive a clone of the same error. The [`Display`]
/// output is meant to be shown to end users as is.
///
/// [`Display`]: std::fmt::Display
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The request was malformed and never sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The endpoint refused the request and retrying will not change that.
    #[error("{message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },
    /// Every attempt failed with a transient error. Contains the last one.
    #[error("generation failed after {attempts} attempts: {message}")]
    Failed { attempts: u32, message: String },
    /// The request could not be queued because too many requests are waiting.
    #[error("too many generation requests are waiting, please try again later")]
    QueueFull,
    /// The caller cancelled the request.
    #[error("the generation request was cancelled")]
    Cancelled,
    /// An unexpected error inside the coordinator.
    #[error("internal error")]
    InternalError,
}
