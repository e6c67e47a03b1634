#![deny(dead_code)]
#![deny(missing_docs)]
#![deny(unused)]
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

//! Prometheus exporter for the task backlog and network connectivity of an
//! Elasticsearch cluster.
//!
//! Each collector issues one request against the cluster's HTTP API per
//! scrape and derives its metrics from the decoded response:
//!
//! - [`collector::tasks`] counts in-flight and long-running tasks reported by
//!   `GET /_tasks`.
//! - [`collector::queries`] counts recent network discovery errors found by a
//!   search over the cluster's log index.
//!
//! Both are built on [`collector::ScrapeCollector`], which also exports
//! `up`, `total_scrapes` and `json_parse_failures` for its endpoint, and are
//! registered with an [`registry::ExporterRegistry`].
//!
//! Metric names follow `<namespace>_<subsystem>_<name>`. The OpenMetrics text
//! exposition appends `_total` to counter samples, so the counter described
//! as `elasticsearch_tasks_total_scrapes` is scraped as
//! `elasticsearch_tasks_total_scrapes_total`, and likewise for
//! `json_parse_failures`. Gauges keep their described name.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use elasticsearch_tasks_exporter::client::ScrapeClient;
//! use elasticsearch_tasks_exporter::collector::{queries, tasks};
//! use elasticsearch_tasks_exporter::registry::ExporterRegistry;
//! use url::Url;
//!
//! let client = ScrapeClient::new(Duration::from_secs(5)).unwrap();
//! let base = Url::parse("http://localhost:9200").unwrap();
//!
//! let mut registry = ExporterRegistry::default();
//! registry
//!     .register(tasks::collector("elasticsearch", client.clone(), &base))
//!     .unwrap();
//! registry
//!     .register(queries::collector(
//!         "elasticsearch",
//!         client,
//!         &base,
//!         queries::DEFAULT_INDEX,
//!     ))
//!     .unwrap();
//!
//! println!("{}", registry.encode_text().unwrap());
//! ```

pub mod client;
pub mod collector;
pub mod config;
pub mod registry;
pub mod response;
pub mod server;
