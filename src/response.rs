//! Typed views of the upstream JSON documents.
//!
//! Only the fields consumed by the collectors are modeled. Unknown fields are
//! ignored, and missing or `null` fields decode to their zero value, so a
//! schema drift on the cluster side degrades to zero-valued metrics instead of
//! a failed scrape.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Decode a response body into `T`.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Treat an explicit `null` like an absent field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Response of `GET /_tasks`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TasksResponse {
    /// Nodes keyed by node identifier.
    #[serde(deserialize_with = "null_default")]
    pub nodes: HashMap<String, Node>,
}

/// A cluster node and the tasks currently running on it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Node {
    /// Node name.
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    /// Address of the transport layer, `ip:port`.
    #[serde(deserialize_with = "null_default")]
    pub transport_address: String,
    /// Host name.
    #[serde(deserialize_with = "null_default")]
    pub host: String,
    /// Publish address, `ip:port`.
    #[serde(deserialize_with = "null_default")]
    pub ip: String,
    /// Node roles such as `master` or `data`.
    #[serde(deserialize_with = "null_default")]
    pub roles: Vec<String>,
    /// Tasks keyed by `<node>:<id>` task identifier.
    #[serde(deserialize_with = "null_default")]
    pub tasks: HashMap<String, Task>,
}

/// A single running task as reported by the task management API.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Task {
    /// Identifier of the node running the task.
    #[serde(deserialize_with = "null_default")]
    pub node: String,
    /// Task number, unique per node.
    #[serde(deserialize_with = "null_default")]
    pub id: i64,
    /// Task type, e.g. `transport` or `direct`.
    #[serde(rename = "type", deserialize_with = "null_default")]
    pub kind: String,
    /// Action name, e.g. `indices:data/write/bulk`.
    #[serde(deserialize_with = "null_default")]
    pub action: String,
    /// Start time in milliseconds since the epoch.
    #[serde(deserialize_with = "null_default")]
    pub start_time_in_millis: i64,
    /// How long the task has been running.
    #[serde(deserialize_with = "null_default")]
    pub running_time_in_nanos: u64,
    /// Whether the task can be cancelled.
    #[serde(deserialize_with = "null_default")]
    pub cancellable: bool,
    /// `<node>:<id>` of the parent task, empty for top level tasks.
    #[serde(deserialize_with = "null_default")]
    pub parent_task_id: String,
    /// Request headers the task was started with.
    #[serde(deserialize_with = "null_default")]
    pub headers: HashMap<String, String>,
}

impl Task {
    /// Running time truncated to whole milliseconds.
    pub fn running_time_millis(&self) -> u64 {
        self.running_time_in_nanos / 1_000_000
    }
}

/// Response of the network discovery error search.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorQueryResponse {
    /// Search hits; only the total is modeled.
    #[serde(deserialize_with = "null_default")]
    pub hits: Hits,
}

/// The `hits` section of a search response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Hits {
    /// Number of matching documents.
    #[serde(deserialize_with = "null_default")]
    pub total: HitsTotal,
}

/// `hits.total` is a bare integer before Elasticsearch 7 and an object with a
/// `value` afterwards.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HitsTotal {
    /// Pre-7.x form.
    Count(u64),
    /// 7.x form.
    Tracked {
        /// Number of hits.
        value: u64,
        /// `eq`, or `gte` when the count is a lower bound.
        #[serde(default, deserialize_with = "null_default")]
        relation: String,
    },
}

impl HitsTotal {
    /// The hit count regardless of form.
    pub fn value(&self) -> u64 {
        match self {
            Self::Count(count) => *count,
            Self::Tracked { value, .. } => *value,
        }
    }
}

impl Default for HitsTotal {
    fn default() -> Self {
        Self::Count(0)
    }
}
