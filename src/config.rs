//! Command line flags and the validated exporter configuration.

use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;
use url::Url;

use crate::collector::queries::DEFAULT_INDEX;

/// A flag value that cannot be turned into an [`ExporterConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--es.uri` is not a URL.
    #[error("invalid elasticsearch URI {value:?}: {source}")]
    InvalidUri {
        /// The flag value.
        value: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// `--es.uri` is neither http nor https.
    #[error("unsupported elasticsearch URI scheme: {0}")]
    UnsupportedScheme(String),
    /// `--web.listen-address` is not `host:port` or `:port`.
    #[error("invalid listen address {value:?}: {source}")]
    InvalidListenAddress {
        /// The flag value.
        value: String,
        /// Parse failure.
        #[source]
        source: AddrParseError,
    },
    /// `--web.telemetry-path` is relative or `/`.
    #[error("telemetry path must start with '/' and not be the root: {0:?}")]
    InvalidTelemetryPath(String),
    /// `--es.timeout` is not a positive duration.
    #[error("invalid duration {0:?}, expected e.g. 500ms, 5s or 1m")]
    InvalidDuration(String),
}

/// Output format of the log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable `key=value` lines.
    #[default]
    Logfmt,
    /// One JSON object per line.
    Json,
}

/// Command line flags of the exporter binary.
#[derive(Debug, Parser)]
#[command(
    name = "elasticsearch-tasks-exporter",
    version,
    about = "Exports Elasticsearch task backlog and network discovery errors to Prometheus",
    long_about = None
)]
pub struct Cli {
    /// HTTP API address of an Elasticsearch node.
    #[arg(long = "es.uri", default_value = "http://localhost:9200")]
    pub es_uri: String,

    /// Timeout for requests to Elasticsearch.
    #[arg(long = "es.timeout", default_value = "5s", value_parser = parse_duration)]
    pub es_timeout: Duration,

    /// Index pattern searched for network discovery errors.
    #[arg(long = "es.query-index", default_value = DEFAULT_INDEX)]
    pub es_query_index: String,

    /// Prefix of every exported metric name.
    #[arg(long, default_value = "elasticsearch")]
    pub namespace: String,

    /// Address to listen on for telemetry.
    #[arg(long = "web.listen-address", default_value = ":9114")]
    pub listen_address: String,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    pub telemetry_path: String,

    /// Log filter directive, overridden by `RUST_LOG`.
    #[arg(long = "log.level", default_value = "info")]
    pub log_level: String,

    /// Log line format.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Logfmt)]
    pub log_format: LogFormat,
}

/// Validated, immutable exporter settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ExporterConfig {
    /// Base URL of the cluster.
    pub es_uri: Url,
    /// Per-request timeout of the shared client.
    pub timeout: Duration,
    /// Index pattern of the network discovery error search.
    pub query_index: String,
    /// Metric name prefix.
    pub namespace: String,
    /// Address the HTTP server binds to.
    pub listen_address: SocketAddr,
    /// Path of the metrics endpoint.
    pub telemetry_path: String,
}

impl TryFrom<&Cli> for ExporterConfig {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let es_uri = Url::parse(&cli.es_uri).map_err(|source| ConfigError::InvalidUri {
            value: cli.es_uri.clone(),
            source,
        })?;
        if !matches!(es_uri.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(es_uri.scheme().to_string()));
        }

        if !cli.telemetry_path.starts_with('/') || cli.telemetry_path == "/" {
            return Err(ConfigError::InvalidTelemetryPath(
                cli.telemetry_path.clone(),
            ));
        }

        Ok(Self {
            es_uri,
            timeout: cli.es_timeout,
            query_index: cli.es_query_index.clone(),
            namespace: cli.namespace.clone(),
            listen_address: parse_listen_address(&cli.listen_address)?,
            telemetry_path: cli.telemetry_path.clone(),
        })
    }
}

/// Parse `host:port`, where an empty host (`:9114`) means all interfaces.
pub fn parse_listen_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let address = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };

    address
        .parse()
        .map_err(|source| ConfigError::InvalidListenAddress {
            value: value.to_string(),
            source,
        })
}

/// Parse `<n>ms`, `<n>s`, `<n>m` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let value = value.trim();
    let (number, millis_per_unit) = if let Some(number) = value.strip_suffix("ms") {
        (number, 1)
    } else if let Some(number) = value.strip_suffix('s') {
        (number, 1_000)
    } else if let Some(number) = value.strip_suffix('m') {
        (number, 60_000)
    } else {
        (value, 1_000)
    };

    let number: u64 = number.trim().parse().map_err(|_| invalid())?;
    match number.checked_mul(millis_per_unit) {
        Some(millis) if millis > 0 => Ok(Duration::from_millis(millis)),
        _ => Err(invalid()),
    }
}
