//! Task backlog metrics from `GET /_tasks`.

use url::Url;

use super::{Endpoint, ExtractedMetric, MetricDescriptor, MetricKind, ScrapeCollector};
use crate::client::{join_path, ScrapeClient, ScrapeRequest};
use crate::response::TasksResponse;

/// Middle component of every metric name of this collector.
pub const SUBSYSTEM: &str = "tasks";

/// Tasks running longer than this many milliseconds count as long-running.
pub const LONG_RUNNING_MILLIS: u64 = 1000;

/// Collector of the task backlog.
pub type TasksCollector = ScrapeCollector<TasksResponse>;

/// Create a collector scraping `<base>/_tasks`.
pub fn collector(namespace: &str, client: ScrapeClient, base: &Url) -> TasksCollector {
    let endpoint = Endpoint {
        url: join_path(base, "/_tasks"),
        request: ScrapeRequest::Get,
    };

    ScrapeCollector::new(namespace, SUBSYSTEM, client, endpoint, metrics(namespace))
}

fn metrics(namespace: &str) -> Vec<ExtractedMetric<TasksResponse>> {
    vec![
        ExtractedMetric::new(
            MetricDescriptor::new(
                namespace,
                SUBSYSTEM,
                "total",
                "Number of tasks",
                MetricKind::Gauge,
            ),
            |tasks: &TasksResponse| total(tasks) as f64,
        ),
        ExtractedMetric::new(
            MetricDescriptor::new(
                namespace,
                SUBSYSTEM,
                "total_gt_1s",
                "Number of tasks greater then 1 second",
                MetricKind::Gauge,
            ),
            |tasks: &TasksResponse| total_gt_1s(tasks) as f64,
        ),
    ]
}

/// Number of tasks across all nodes.
pub fn total(tasks: &TasksResponse) -> usize {
    tasks.nodes.values().map(|node| node.tasks.len()).sum()
}

/// Number of tasks whose running time, truncated to milliseconds, exceeds
/// one second.
pub fn total_gt_1s(tasks: &TasksResponse) -> usize {
    tasks
        .nodes
        .values()
        .flat_map(|node| node.tasks.values())
        .filter(|task| task.running_time_millis() > LONG_RUNNING_MILLIS)
        .count()
}
