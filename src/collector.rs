//! Scrape-driven collector implementation.
//!
//! See [`ScrapeCollector`] for details.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::counter::{ConstCounter, Counter};
use prometheus_client::metrics::gauge::{ConstGauge, Gauge};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::client::{ScrapeClient, ScrapeError, ScrapeRequest};
use crate::response;

pub mod queries;
pub mod tasks;

/// Kind of value a [`MetricDescriptor`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A value that can go up and down.
    Gauge,
    /// A monotonically increasing count, exposed with a `_total` suffix.
    Counter,
}

/// Static identity of a metric, known before any value is measured.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricDescriptor {
    name: String,
    help: String,
    kind: MetricKind,
}

impl MetricDescriptor {
    /// Create a descriptor named `<namespace>_<subsystem>_<name>`.
    ///
    /// Empty components are skipped, so an empty namespace yields
    /// `<subsystem>_<name>`.
    pub fn new(
        namespace: &str,
        subsystem: &str,
        name: &str,
        help: impl Into<String>,
        kind: MetricKind,
    ) -> Self {
        Self {
            name: fq_name(namespace, subsystem, name),
            help: help.into(),
            kind,
        }
    }

    /// Fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Gauge or counter.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }
}

fn fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// A descriptor paired with the function computing its value from a decoded
/// response.
pub struct ExtractedMetric<R> {
    descriptor: MetricDescriptor,
    value: fn(&R) -> f64,
}

impl<R> ExtractedMetric<R> {
    /// `value` must not assume more of the response than its type guarantees;
    /// absent fields are already zero-valued.
    pub fn new(descriptor: MetricDescriptor, value: fn(&R) -> f64) -> Self {
        Self { descriptor, value }
    }

    /// Descriptor of the extracted metric.
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }
}

impl<R> fmt::Debug for ExtractedMetric<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedMetric")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// One emitted metric value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample<'a> {
    /// What the value measures.
    pub descriptor: &'a MetricDescriptor,
    /// The measured value.
    pub value: f64,
}

impl Sample<'_> {
    fn encode(&self, encoder: &mut DescriptorEncoder) -> Result<(), fmt::Error> {
        let descriptor = self.descriptor;
        match descriptor.kind() {
            MetricKind::Gauge => {
                let gauge = ConstGauge::new(self.value);
                let metric_encoder = encoder.encode_descriptor(
                    descriptor.name(),
                    descriptor.help(),
                    None,
                    gauge.metric_type(),
                )?;
                gauge.encode(metric_encoder)
            }
            MetricKind::Counter => {
                let counter = ConstCounter::new(self.value);
                let metric_encoder = encoder.encode_descriptor(
                    descriptor.name(),
                    descriptor.help(),
                    None,
                    counter.metric_type(),
                )?;
                counter.encode(metric_encoder)
            }
        }
    }
}

/// Enumerates every metric a collector can ever emit.
pub trait Describe {
    /// Descriptors are fixed at construction and independent of any scrape.
    fn describe(&self) -> Vec<&MetricDescriptor>;
}

/// Where and how a [`ScrapeCollector`] fetches its upstream document.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    /// Absolute URL of the upstream document.
    pub url: Url,
    /// Method and body sent to `url`.
    pub request: ScrapeRequest,
}

/// Bridges one upstream endpoint to the registry's pull protocol.
///
/// Every [`ScrapeCollector::collect`] issues exactly one request, decodes the
/// body into `R` and runs the extraction functions over it. Whatever the
/// outcome, the collector's own bookkeeping is emitted last:
///
/// - `up`: 1 if the most recent scrape succeeded, 0 otherwise.
/// - `total_scrapes`: number of `collect` calls so far.
/// - `json_parse_failures`: number of bodies that failed to decode.
///
/// On failure no extracted metric is emitted. Counters are atomic, so
/// overlapping pulls of the same collector are fine.
#[derive(Debug)]
pub struct ScrapeCollector<R> {
    client: ScrapeClient,
    endpoint: Endpoint,

    up: Gauge,
    up_descriptor: MetricDescriptor,
    total_scrapes: Counter,
    total_scrapes_descriptor: MetricDescriptor,
    json_parse_failures: Counter,
    json_parse_failures_descriptor: MetricDescriptor,

    metrics: Vec<ExtractedMetric<R>>,
}

impl<R: DeserializeOwned> ScrapeCollector<R> {
    /// Create a collector for `endpoint` whose bookkeeping metrics are named
    /// `<namespace>_<subsystem>_{up,total_scrapes,json_parse_failures}`.
    pub fn new(
        namespace: &str,
        subsystem: &str,
        client: ScrapeClient,
        endpoint: Endpoint,
        metrics: Vec<ExtractedMetric<R>>,
    ) -> Self {
        Self {
            client,
            endpoint,

            up: Gauge::default(),
            up_descriptor: MetricDescriptor::new(
                namespace,
                subsystem,
                "up",
                format!("Was the last scrape of the ElasticSearch {subsystem} endpoint successful"),
                MetricKind::Gauge,
            ),
            total_scrapes: Counter::default(),
            total_scrapes_descriptor: MetricDescriptor::new(
                namespace,
                subsystem,
                "total_scrapes",
                format!("Current total ElasticSearch {subsystem} scrapes"),
                MetricKind::Counter,
            ),
            json_parse_failures: Counter::default(),
            json_parse_failures_descriptor: MetricDescriptor::new(
                namespace,
                subsystem,
                "json_parse_failures",
                "Number of errors while parsing JSON",
                MetricKind::Counter,
            ),

            metrics,
        }
    }

    /// The endpoint scraped on every pull.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Liveness of the most recent scrape.
    pub fn up(&self) -> i64 {
        self.up.get()
    }

    /// Number of pulls so far.
    pub fn total_scrapes(&self) -> u64 {
        self.total_scrapes.get()
    }

    /// Number of bodies that failed to decode.
    pub fn json_parse_failures(&self) -> u64 {
        self.json_parse_failures.get()
    }

    /// Run one pull cycle and return the emitted samples, bookkeeping last.
    pub fn collect(&self) -> Vec<Sample<'_>> {
        self.total_scrapes.inc();

        let mut samples = match self.fetch_and_decode() {
            Ok(response) => match self.extract(&response) {
                Some(samples) => {
                    self.up.set(1);
                    debug!(url = %self.endpoint.url, "scrape succeeded");
                    samples
                }
                None => {
                    self.up.set(0);
                    Vec::new()
                }
            },
            Err(err) => {
                if err.is_decode() {
                    self.json_parse_failures.inc();
                }
                self.up.set(0);
                warn!(url = %err.url(), error = %err, "failed to fetch and decode response");
                Vec::new()
            }
        };

        samples.extend(self.bookkeeping());
        samples
    }

    fn fetch_and_decode(&self) -> Result<R, ScrapeError> {
        let Endpoint { url, request } = &self.endpoint;
        let body = self.client.fetch(url, request)?;

        response::decode(&body).map_err(|source| ScrapeError::Decode {
            url: url.clone(),
            source,
        })
    }

    fn extract(&self, response: &R) -> Option<Vec<Sample<'_>>> {
        let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
            self.metrics
                .iter()
                .map(|metric| Sample {
                    descriptor: &metric.descriptor,
                    value: (metric.value)(response),
                })
                .collect::<Vec<_>>()
        }));

        match extracted {
            Ok(samples) => Some(samples),
            Err(_) => {
                warn!(url = %self.endpoint.url, "metric extraction panicked");
                None
            }
        }
    }

    fn bookkeeping(&self) -> [Sample<'_>; 3] {
        [
            Sample {
                descriptor: &self.up_descriptor,
                value: self.up.get() as f64,
            },
            Sample {
                descriptor: &self.total_scrapes_descriptor,
                value: self.total_scrapes.get() as f64,
            },
            Sample {
                descriptor: &self.json_parse_failures_descriptor,
                value: self.json_parse_failures.get() as f64,
            },
        ]
    }
}

impl<R> Describe for ScrapeCollector<R> {
    fn describe(&self) -> Vec<&MetricDescriptor> {
        self.metrics
            .iter()
            .map(ExtractedMetric::descriptor)
            .chain([
                &self.up_descriptor,
                &self.total_scrapes_descriptor,
                &self.json_parse_failures_descriptor,
            ])
            .collect()
    }
}

impl<R> Collector for ScrapeCollector<R>
where
    R: DeserializeOwned + fmt::Debug + 'static,
{
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        for sample in self.collect() {
            sample.encode(&mut encoder)?;
        }

        Ok(())
    }
}
