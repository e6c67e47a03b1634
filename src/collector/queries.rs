//! Network discovery error count from a log index search.

use serde_json::{json, Value};
use url::Url;

use super::{Endpoint, ExtractedMetric, MetricDescriptor, MetricKind, ScrapeCollector};
use crate::client::{join_path, ScrapeClient, ScrapeRequest};
use crate::response::ErrorQueryResponse;

/// Middle component of every metric name of this collector.
pub const SUBSYSTEM: &str = "queries";

/// Index pattern searched unless configured otherwise.
pub const DEFAULT_INDEX: &str = "elasticsearch-*";

/// Collector of network discovery errors.
pub type ErrorQueryCollector = ScrapeCollector<ErrorQueryResponse>;

/// Create a collector searching `<base>/<index>/_search` for network
/// discovery errors.
pub fn collector(
    namespace: &str,
    client: ScrapeClient,
    base: &Url,
    index: &str,
) -> ErrorQueryCollector {
    let endpoint = Endpoint {
        url: join_path(base, &format!("{}/_search", index.trim_matches('/'))),
        request: ScrapeRequest::PostJson(network_discovery_error_query().to_string()),
    };

    let metrics = vec![ExtractedMetric::new(
        MetricDescriptor::new(
            namespace,
            SUBSYSTEM,
            "total_network_discovery_error",
            "Number of total network discovery",
            MetricKind::Gauge,
        ),
        |response: &ErrorQueryResponse| total_network_discovery_error(response) as f64,
    )];

    ScrapeCollector::new(namespace, SUBSYSTEM, client, endpoint, metrics)
}

/// Log messages of failed node-to-node sends or disconnected nodes within
/// the last five minutes, ignoring those about the unbound `0.0.0.0` address.
pub fn network_discovery_error_query() -> Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    { "match_all": {} },
                    {
                        "bool": {
                            "should": [
                                { "match_phrase": { "message": "send message failed" } },
                                { "match_phrase": { "message": "NodeNotConnectedException" } }
                            ]
                        }
                    },
                    {
                        "range": {
                            "@timestamp": {
                                "gt": "now-5m",
                                "format": "epoch_millis"
                            }
                        }
                    }
                ],
                "must_not": [
                    { "match_phrase": { "message": { "query": "0.0.0.0" } } }
                ]
            }
        }
    })
}

/// Number of matching log messages.
pub fn total_network_discovery_error(response: &ErrorQueryResponse) -> u64 {
    response.hits.total.value()
}
