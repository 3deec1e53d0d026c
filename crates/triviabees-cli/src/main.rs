//! TriviaBees generation client.
//!
//! Submits image generation and media description requests to the hosted generation endpoint,
//! with deduplication, queueing, retries and caching provided by the
//! [`RequestCoordinator`](triviabees_service::coordinator::RequestCoordinator).

#![warn(missing_debug_implementations, clippy::all)]

mod batch;
mod cli;
mod output;

use triviabees_service::logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
