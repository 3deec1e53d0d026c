//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use url::Url;

use triviabees_service::config::Config;
use triviabees_service::coordinator::RequestCoordinator;
use triviabees_service::{logging, metrics};

use crate::{batch, output};

/// TriviaBees commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single generation request of any type.
    Generate {
        /// The generation type, e.g. `text-to-image`.
        kind: String,

        /// The request payload as a JSON document.
        #[arg(long, default_value = "{}", value_parser = parse_json)]
        payload: Value,

        /// Higher priorities are dispatched first.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,
    },

    /// Generate an image from a prompt.
    Image {
        /// What the image should show.
        prompt: String,

        /// An optional art style, e.g. `watercolor`.
        #[arg(long)]
        style: Option<String>,

        /// URL of an image to derive the new one from.
        #[arg(long, value_name = "URL")]
        reference: Option<String>,
    },

    /// Describe the image at a URL.
    DescribeImage {
        /// URL of the image.
        url: String,
    },

    /// Describe the video at a URL.
    DescribeVideo {
        /// URL of the video.
        url: String,
    },

    /// Run all requests of a JSON lines file concurrently.
    ///
    /// Every line holds one request: `{"type": ..., "payload": ..., "priority": ...}`. Results are
    /// printed in input order, followed by the coordinator status.
    Batch {
        /// Path to the JSON lines file.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Generates images and media descriptions through the TriviaBees generation endpoint.
#[derive(Debug, Parser)]
#[command(name = "triviabees", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// URL of the generation endpoint. Overrides the configuration file.
    #[arg(long, global = true, env = "TRIVIABEES_ENDPOINT", value_name = "URL")]
    endpoint: Option<Url>,

    /// API key for the generation endpoint. Overrides the configuration file.
    #[arg(long, global = true, env = "TRIVIABEES_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn parse_json(value: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(value)
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Some(url) = cli.endpoint {
        config.endpoint.url = Some(url);
    }
    if let Some(api_key) = cli.api_key {
        config.endpoint.api_key = Some(api_key);
    }

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is not started yet, so there is only this thread.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("triviabees")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run(cli.command, &config))
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let coordinator =
        RequestCoordinator::from_config(config).context("failed to set up the coordinator")?;

    let result = match command {
        Command::Generate {
            kind,
            payload,
            priority,
        } => coordinator.request(&kind, payload, priority).await,
        Command::Image {
            prompt,
            style,
            reference,
        } => {
            coordinator
                .generate_image(&prompt, style.as_deref(), reference.as_deref())
                .await
        }
        Command::DescribeImage { url } => coordinator.describe_image(&url).await,
        Command::DescribeVideo { url } => coordinator.describe_video(&url).await,
        Command::Batch { file } => return batch::run(&coordinator, &file).await,
    };

    let value = result.context("generation failed")?;
    output::print_json(&value)
}
