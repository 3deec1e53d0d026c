use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the coordinator.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "triviabees".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where and how to reach the remote generation endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Full URL of the `generate` function.
    pub url: Option<Url>,

    /// Bearer token sent along with every request.
    pub api_key: Option<String>,

    /// The timeout for establishing a connection to the endpoint.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Scheduling and retry behavior of the [`RequestCoordinator`](crate::coordinator::RequestCoordinator).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum number of requests in flight at once.
    ///
    /// Values below `1` are treated as `1`.
    pub max_concurrent: usize,

    /// Maximum number of attempts for a single request, including the first one.
    ///
    /// Values below `1` are treated as `1`.
    pub max_attempts: u32,

    /// The delay before the first retry. Every following retry waits twice as long as the
    /// previous one.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Upper bound for a single attempt.
    ///
    /// A timed out attempt counts as a retryable failure. `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Option<Duration>,

    /// Maximum number of requests waiting for a free slot.
    ///
    /// Once reached, a new request either displaces the lowest-priority waiting request or is
    /// rejected. `None` means the queue is unbounded.
    pub max_queue_length: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            attempt_timeout: Some(Duration::from_secs(120)),
            max_queue_length: None,
        }
    }
}

/// Fine-tuning of the in-memory result cache.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResultCacheConfig {
    /// How long a successful result is served from memory.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Maximum number of cached results. `0` disables the cache.
    pub capacity: usize,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            capacity: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The remote generation endpoint.
    pub endpoint: EndpointConfig,

    /// Queueing, concurrency and retries.
    pub coordinator: CoordinatorConfig,

    /// The in-memory result cache.
    pub cache: ResultCacheConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        // check for empty files explicitly
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.coordinator.max_concurrent, 3);
        assert_eq!(cfg.coordinator.max_attempts, 3);
        assert_eq!(cfg.coordinator.retry_base_delay, Duration::from_secs(1));
        assert_eq!(cfg.coordinator.max_queue_length, None);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
        assert_eq!(cfg.cache.capacity, 100);
        assert!(cfg.endpoint.url.is_none());
    }

    #[test]
    fn test_coordinator_config() {
        // Setting a single value keeps the defaults of everything else.
        let yaml = r#"
            coordinator:
              max_concurrent: 8
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.coordinator.max_concurrent, 8);
        assert_eq!(
            cfg.coordinator.attempt_timeout,
            Some(Duration::from_secs(120))
        );
        assert_eq!(cfg.cache, ResultCacheConfig::default());

        let yaml = r#"
            coordinator:
              retry_base_delay: 250ms
              attempt_timeout: null
              max_queue_length: 50
            cache:
              ttl: 1h
              capacity: 0
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.coordinator.retry_base_delay,
            Duration::from_millis(250)
        );
        assert_eq!(cfg.coordinator.attempt_timeout, None);
        assert_eq!(cfg.coordinator.max_queue_length, Some(50));
        assert_eq!(cfg.cache.ttl, Duration::from_secs(3600));
        assert_eq!(cfg.cache.capacity, 0);
    }

    #[test]
    fn test_endpoint_config() {
        let yaml = r#"
            endpoint:
              url: https://functions.example.com/generate
              api_key: secret
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.endpoint.url.unwrap().as_str(),
            "https://functions.example.com/generate"
        );
        assert_eq!(cfg.endpoint.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.endpoint.connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              not_a_cache:
                max_unused_for: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
