//! Runs a file of generation requests through one coordinator.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::json;

use triviabees_service::coordinator::RequestCoordinator;
use triviabees_service::types::GenerationRequest;

use crate::output;

/// Parses one [`GenerationRequest`] per non-empty line.
fn parse_requests(contents: &str) -> Result<Vec<GenerationRequest>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid request on line {}", index + 1))
        })
        .collect()
}

/// Submits all requests in `path` at once and prints their results in input order.
pub async fn run(coordinator: &RequestCoordinator, path: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let requests = parse_requests(&contents)?;

    tracing::info!("Submitting {} generation requests", requests.len());
    let results = futures::future::join_all(
        requests
            .into_iter()
            .map(|request| coordinator.execute(request)),
    )
    .await;

    let mut stdout = std::io::stdout().lock();
    for result in &results {
        output::write_json(&mut stdout, &output::result_line(result))?;
    }
    output::write_json(&mut stdout, &json!({ "status": coordinator.status() }))?;

    let failed = results.iter().filter(|result| result.is_err()).count();
    if failed > 0 {
        bail!("{failed} of {} requests failed", results.len());
    }
    Ok(())
}
