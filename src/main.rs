use std::sync::Arc;

use clap::Parser;
use elasticsearch_tasks_exporter::client::ScrapeClient;
use elasticsearch_tasks_exporter::collector::{queries, tasks};
use elasticsearch_tasks_exporter::config::{Cli, ExporterConfig, LogFormat};
use elasticsearch_tasks_exporter::registry::ExporterRegistry;
use elasticsearch_tasks_exporter::server::{self, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)?,
    };
    match cli.log_format {
        LogFormat::Logfmt => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
    }

    let config = ExporterConfig::try_from(&cli)?;
    info!(
        es_uri = %config.es_uri,
        timeout = ?config.timeout,
        namespace = %config.namespace,
        "starting elasticsearch tasks exporter"
    );

    // Built outside the async runtime: the blocking client may not be
    // created or dropped from within one.
    let client = ScrapeClient::new(config.timeout)?;
    let mut registry = ExporterRegistry::default();
    registry.register(tasks::collector(
        &config.namespace,
        client.clone(),
        &config.es_uri,
    ))?;
    registry.register(queries::collector(
        &config.namespace,
        client,
        &config.es_uri,
        &config.query_index,
    ))?;
    let registry = Arc::new(registry);

    let state = AppState {
        registry: Arc::clone(&registry),
        telemetry_path: config.telemetry_path.clone(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server::serve(config.listen_address, server::router(state)))?;
    drop(runtime);

    // Last reference to the collectors, released outside the runtime.
    drop(registry);
    Ok(())
}
