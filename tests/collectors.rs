//! Collector pull cycles against a fake Elasticsearch served on localhost.

use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use elasticsearch_tasks_exporter::client::{ScrapeClient, ScrapeRequest};
use elasticsearch_tasks_exporter::collector::{
    queries, tasks, Describe, Endpoint, ExtractedMetric, MetricDescriptor, MetricKind,
    Sample, ScrapeCollector,
};
use elasticsearch_tasks_exporter::registry::ExporterRegistry;
use elasticsearch_tasks_exporter::response::TasksResponse;
use tokio::net::TcpListener;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

#[derive(Clone, Debug)]
struct Recorded {
    method: Method,
    path: String,
    content_type: Option<String>,
    body: String,
}

#[derive(Clone)]
struct Upstream {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

async fn respond(
    State(upstream): State<Upstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    upstream.requests.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_string(),
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    });
    (upstream.status, upstream.body.clone())
}

/// Serve `body` with `status` for every request on a background runtime.
fn spawn_upstream(status: StatusCode, body: &str) -> (Url, Arc<Mutex<Vec<Recorded>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let upstream = Upstream {
        status,
        body: body.to_string(),
        requests: Arc::clone(&requests),
    };

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();

            let router = Router::new().fallback(respond).with_state(upstream);
            axum::serve(listener, router).await.unwrap();
        });
    });

    let addr = rx.recv().unwrap();
    (Url::parse(&format!("http://{addr}")).unwrap(), requests)
}

fn client() -> ScrapeClient {
    ScrapeClient::new(Duration::from_secs(5)).unwrap()
}

fn value(samples: &[Sample<'_>], name: &str) -> Option<f64> {
    samples
        .iter()
        .find(|sample| sample.descriptor.name() == name)
        .map(|sample| sample.value)
}

fn names(samples: &[Sample<'_>]) -> Vec<String> {
    samples
        .iter()
        .map(|sample| sample.descriptor.name().to_string())
        .collect()
}

/// Formatted log output of everything run under [`capture_logs`].
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    (result, logs)
}

const TWO_TASKS: &str = r#"{
    "nodes": {
        "n1": {
            "name": "node-1",
            "tasks": {
                "n1:1": {"node": "n1", "id": 1, "action": "indices:data/read/search", "running_time_in_nanos": 500000000},
                "n1:2": {"node": "n1", "id": 2, "action": "indices:data/write/bulk", "running_time_in_nanos": 1500000000}
            }
        }
    }
}"#;

#[test]
fn empty_tasks_response() {
    let (base, requests) = spawn_upstream(StatusCode::OK, r#"{"nodes":{}}"#);
    let collector = tasks::collector("es", client(), &base);

    let samples = collector.collect();
    assert_eq!(value(&samples, "es_tasks_total"), Some(0.0));
    assert_eq!(value(&samples, "es_tasks_total_gt_1s"), Some(0.0));
    assert_eq!(value(&samples, "es_tasks_up"), Some(1.0));
    assert_eq!(value(&samples, "es_tasks_total_scrapes"), Some(1.0));
    assert_eq!(value(&samples, "es_tasks_json_parse_failures"), Some(0.0));

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::GET);
    assert_eq!(requests[0].path, "/_tasks");
}

#[test]
fn one_node_two_tasks() {
    let (base, _) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let collector = tasks::collector("es", client(), &base);

    let samples = collector.collect();
    assert_eq!(
        names(&samples),
        vec![
            "es_tasks_total",
            "es_tasks_total_gt_1s",
            "es_tasks_up",
            "es_tasks_total_scrapes",
            "es_tasks_json_parse_failures",
        ]
    );
    assert_eq!(value(&samples, "es_tasks_total"), Some(2.0));
    assert_eq!(value(&samples, "es_tasks_total_gt_1s"), Some(1.0));
    assert_eq!(collector.up(), 1);
}

#[test]
fn server_error() {
    let (base, requests) = spawn_upstream(StatusCode::INTERNAL_SERVER_ERROR, "boom");
    let collector = tasks::collector("es", client(), &base);

    let samples = collector.collect();
    assert_eq!(
        names(&samples),
        vec![
            "es_tasks_up",
            "es_tasks_total_scrapes",
            "es_tasks_json_parse_failures",
        ]
    );
    assert_eq!(value(&samples, "es_tasks_up"), Some(0.0));
    assert_eq!(collector.total_scrapes(), 1);
    assert_eq!(collector.json_parse_failures(), 0);
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[test]
fn non_200_success_status_is_a_failure() {
    let (base, _) = spawn_upstream(StatusCode::NO_CONTENT, "");
    let collector = tasks::collector("es", client(), &base);

    let samples = collector.collect();
    assert_eq!(samples.len(), 3);
    assert_eq!(collector.up(), 0);
    assert_eq!(collector.json_parse_failures(), 0);
}

#[test]
fn malformed_json() {
    let (base, _) = spawn_upstream(StatusCode::OK, r#"{"nodes": "#);
    let collector = tasks::collector("es", client(), &base);

    let samples = collector.collect();
    assert_eq!(samples.len(), 3);
    assert_eq!(value(&samples, "es_tasks_up"), Some(0.0));
    assert_eq!(value(&samples, "es_tasks_json_parse_failures"), Some(1.0));

    collector.collect();
    assert_eq!(collector.total_scrapes(), 2);
    assert_eq!(collector.json_parse_failures(), 2);
}

#[test]
fn null_fields_are_zero_values() {
    let (base, _) = spawn_upstream(
        StatusCode::OK,
        r#"{"nodes":{"n1":{"name":null,"tasks":{
            "n1:1":{"running_time_in_nanos":null,"parent_task_id":null,"headers":null},
            "n1:2":{"running_time_in_nanos":2000000000,"cancellable":null}
        }},"n2":{"tasks":null}}}"#,
    );
    let collector = tasks::collector("es", client(), &base);

    let samples = collector.collect();
    assert_eq!(value(&samples, "es_tasks_up"), Some(1.0));
    assert_eq!(value(&samples, "es_tasks_total"), Some(2.0));
    assert_eq!(value(&samples, "es_tasks_total_gt_1s"), Some(1.0));
    assert_eq!(collector.json_parse_failures(), 0);

    let (base, _) = spawn_upstream(StatusCode::OK, r#"{"hits":{"total":null}}"#);
    let collector = queries::collector("es", client(), &base, queries::DEFAULT_INDEX);
    let samples = collector.collect();
    assert_eq!(value(&samples, "es_queries_up"), Some(1.0));
    assert_eq!(value(&samples, "es_queries_total_network_discovery_error"), Some(0.0));
}

#[test]
fn failed_scrapes_log_a_warning() {
    let (base, _) = spawn_upstream(StatusCode::INTERNAL_SERVER_ERROR, "boom");
    let collector = tasks::collector("es", client(), &base);

    let (count, logs) = capture_logs(|| collector.collect().len());
    assert_eq!(count, 3);
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("failed to fetch and decode response"), "{logs}");
    assert!(logs.contains(&format!("{base}_tasks")), "{logs}");
    assert!(logs.contains("failed with code 500"), "{logs}");

    let (base, _) = spawn_upstream(StatusCode::OK, "not json");
    let collector = tasks::collector("es", client(), &base);
    let (_, logs) = capture_logs(|| collector.collect().len());
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("failed to decode response"), "{logs}");
    assert_eq!(collector.json_parse_failures(), 1);
}

#[test]
fn successful_scrape_logs_no_warning() {
    let (base, _) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let collector = tasks::collector("es", client(), &base);

    let (count, logs) = capture_logs(|| collector.collect().len());
    assert_eq!(count, 5);
    assert!(!logs.contains("WARN"), "{logs}");
}

#[test]
fn fetch_returns_the_body_unchanged() {
    let (base, requests) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let url = base.join("/_tasks").unwrap();

    let body = client().fetch(&url, &ScrapeRequest::Get).unwrap();
    assert_eq!(&body[..], TWO_TASKS.as_bytes());
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[test]
fn unreachable_upstream() {
    let base = Url::parse("http://127.0.0.1:1").unwrap();
    let collector = queries::collector("es", client(), &base, queries::DEFAULT_INDEX);

    let samples = collector.collect();
    assert_eq!(
        names(&samples),
        vec![
            "es_queries_up",
            "es_queries_total_scrapes",
            "es_queries_json_parse_failures",
        ]
    );
    assert_eq!(collector.up(), 0);
    assert_eq!(collector.json_parse_failures(), 0);
}

#[test]
fn liveness_follows_latest_scrape() {
    let (good, _) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let (bad, _) = spawn_upstream(StatusCode::SERVICE_UNAVAILABLE, "");

    let failing = tasks::collector("es", client(), &bad);
    failing.collect();
    failing.collect();
    assert_eq!(failing.up(), 0);
    assert_eq!(failing.total_scrapes(), 2);

    let healthy = tasks::collector("es", client(), &good);
    healthy.collect();
    assert_eq!(healthy.up(), 1);
    healthy.collect();
    assert_eq!(healthy.up(), 1);
}

#[test]
fn network_discovery_errors() {
    let (base, requests) = spawn_upstream(StatusCode::OK, r#"{"hits":{"total": 7}}"#);
    let collector = queries::collector("es", client(), &base, queries::DEFAULT_INDEX);

    let samples = collector.collect();
    assert_eq!(
        value(&samples, "es_queries_total_network_discovery_error"),
        Some(7.0)
    );
    assert_eq!(value(&samples, "es_queries_up"), Some(1.0));

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/elasticsearch-*/_search");
    assert_eq!(request.content_type.as_deref(), Some("application/json"));

    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body, queries::network_discovery_error_query());
}

#[test]
fn describe_is_stable() {
    let (base, _) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let collector = tasks::collector("es", client(), &base);

    let before: Vec<MetricDescriptor> = collector.describe().into_iter().cloned().collect();
    for _ in 0..3 {
        collector.collect();
    }
    let after: Vec<MetricDescriptor> = collector.describe().into_iter().cloned().collect();
    assert_eq!(before, after);
    assert_eq!(before.len(), 5);
}

#[test]
fn concurrent_pulls() {
    let (base, requests) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let collector = Arc::new(tasks::collector("es", client(), &base));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                for _ in 0..5 {
                    let samples = collector.collect();
                    assert_eq!(samples.len(), 5);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(collector.total_scrapes(), 40);
    assert_eq!(collector.json_parse_failures(), 0);
    assert_eq!(requests.lock().unwrap().len(), 40);
}

#[test]
fn panicking_extraction_still_reports_bookkeeping() {
    let (base, _) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let endpoint = Endpoint {
        url: base.join("_tasks").unwrap(),
        request: ScrapeRequest::Get,
    };
    let metrics = vec![
        ExtractedMetric::new(
            MetricDescriptor::new("es", "custom", "nodes", "Number of nodes", MetricKind::Gauge),
            |tasks: &TasksResponse| tasks.nodes.len() as f64,
        ),
        ExtractedMetric::new(
            MetricDescriptor::new("es", "custom", "broken", "Always panics", MetricKind::Gauge),
            |_: &TasksResponse| panic!("extraction failed"),
        ),
    ];
    let collector = ScrapeCollector::new("es", "custom", client(), endpoint, metrics);

    let samples = collector.collect();
    assert_eq!(
        names(&samples),
        vec![
            "es_custom_up",
            "es_custom_total_scrapes",
            "es_custom_json_parse_failures",
        ]
    );
    assert_eq!(collector.up(), 0);
    assert_eq!(collector.total_scrapes(), 1);
}

#[test]
fn one_failing_collector_does_not_affect_another() {
    let (tasks_base, _) = spawn_upstream(StatusCode::OK, TWO_TASKS);
    let (queries_base, _) = spawn_upstream(StatusCode::BAD_GATEWAY, "");

    let mut registry = ExporterRegistry::default();
    registry
        .register(tasks::collector("es", client(), &tasks_base))
        .unwrap();
    registry
        .register(queries::collector(
            "es",
            client(),
            &queries_base,
            queries::DEFAULT_INDEX,
        ))
        .unwrap();

    let encoded = registry.encode_text().unwrap();
    let sample = |name: &str| -> Option<f64> {
        encoded
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| {
                let (metric, value) = line.split_once(' ')?;
                (metric == name).then(|| value.parse().ok())?
            })
    };

    assert_eq!(sample("es_tasks_up"), Some(1.0));
    assert_eq!(sample("es_tasks_total"), Some(2.0));
    assert_eq!(sample("es_tasks_total_gt_1s"), Some(1.0));
    assert_eq!(sample("es_tasks_total_scrapes_total"), Some(1.0));
    assert_eq!(sample("es_queries_up"), Some(0.0));
    assert_eq!(sample("es_queries_total_scrapes_total"), Some(1.0));
    assert_eq!(sample("es_queries_total_network_discovery_error"), None);
}
