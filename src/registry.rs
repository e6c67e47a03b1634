//! Collector registry of the exporter.
//!
//! See [`ExporterRegistry`] for details.

use std::collections::HashSet;
use std::fmt;

use prometheus_client::collector::Collector;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use thiserror::Error;

use crate::collector::{Describe, MetricDescriptor};

/// Content type of [`ExporterRegistry::encode_text`] output.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Why a collector was refused by [`ExporterRegistry::register`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// A described metric name is already taken.
    #[error("duplicate metric descriptor: {name}")]
    Duplicate {
        /// The clashing name.
        name: String,
    },
}

/// A [`Registry`] that validates collector descriptors at registration.
///
/// Each collector is described once when it is registered. A collector
/// describing a metric name that is already taken, by itself or by an earlier
/// collector, is rejected and never pulled.
///
/// ```no_run
/// # use std::time::Duration;
/// # use elasticsearch_tasks_exporter::client::ScrapeClient;
/// # use elasticsearch_tasks_exporter::collector::tasks;
/// # use elasticsearch_tasks_exporter::registry::ExporterRegistry;
/// # use url::Url;
/// let client = ScrapeClient::new(Duration::from_secs(5)).unwrap();
/// let base = Url::parse("http://localhost:9200").unwrap();
///
/// let mut registry = ExporterRegistry::default();
/// registry
///     .register(tasks::collector("elasticsearch", client.clone(), &base))
///     .unwrap();
///
/// // A second collector with the same namespace clashes with the first.
/// assert!(registry
///     .register(tasks::collector("elasticsearch", client, &base))
///     .is_err());
///
/// let exposition = registry.encode_text().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct ExporterRegistry {
    registry: Registry,
    descriptors: Vec<MetricDescriptor>,
}

impl ExporterRegistry {
    /// Describe `collector` and register it unless one of its metric names is
    /// already taken. A rejected collector leaves the registry unchanged.
    pub fn register<C>(&mut self, collector: C) -> Result<(), RegisterError>
    where
        C: Collector + Describe,
    {
        let mut names: HashSet<&str> = self.descriptors.iter().map(|d| d.name()).collect();
        let described = collector.describe();
        for descriptor in &described {
            if !names.insert(descriptor.name()) {
                return Err(RegisterError::Duplicate {
                    name: descriptor.name().to_string(),
                });
            }
        }

        let described: Vec<MetricDescriptor> = described.into_iter().cloned().collect();
        self.descriptors.extend(described);
        self.registry.register_collector(Box::new(collector));
        Ok(())
    }

    /// Descriptors of all registered collectors, in registration order.
    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    /// Pull every registered collector and encode the result in the
    /// OpenMetrics text format.
    pub fn encode_text(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
