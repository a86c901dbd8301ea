//! Resource, metric and watch event types

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use super::LabelSelector;

/// Annotation carrying the CPU usage added by metrics enrichment
pub const CPU_ANNOTATION: &str = "metrics/cpu";
/// Annotation carrying the memory usage added by metrics enrichment
pub const MEMORY_ANNOTATION: &str = "metrics/memory";

/// A cluster object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource kind (e.g. "pods")
    pub kind: String,
    /// Namespace, empty for cluster-scoped kinds
    pub namespace: String,
    /// Object name, unique within kind and namespace
    pub name: String,
    /// Labels used for selection
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Free-form annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Version assigned by the backend on every write
    #[serde(default)]
    pub resource_version: u64,
    /// When the backend first stored the object
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Opaque object body
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Resource {
    /// Create a new resource with no labels or body
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            resource_version: 0,
            created_at: chrono::Utc::now(),
            spec: serde_json::Value::Null,
        }
    }

    /// Builder-style label setter
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Builder-style body setter
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// `namespace/name` identifier
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Annotate with usage from a matching metric sample
    pub fn apply_metrics(&mut self, sample: &MetricSample) {
        self.annotations.insert(CPU_ANNOTATION.to_string(), sample.cpu.clone());
        self.annotations.insert(MEMORY_ANNOTATION.to_string(), sample.memory.clone());
    }

    /// Check if metrics enrichment annotated this resource
    pub fn has_metrics(&self) -> bool {
        self.annotations.contains_key(CPU_ANNOTATION)
    }
}

/// Point-in-time usage for one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    pub namespace: String,
    pub name: String,
    /// CPU usage in backend notation (e.g. "250m")
    pub cpu: String,
    /// Memory usage in backend notation (e.g. "128Mi")
    pub memory: String,
}

impl MetricSample {
    /// Check if this sample belongs to `resource`
    pub fn matches(&self, resource: &Resource) -> bool {
        self.namespace == resource.namespace && self.name == resource.name
    }
}

/// Kind of change reported by a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchEventType::Added => write!(f, "ADDED"),
            WatchEventType::Modified => write!(f, "MODIFIED"),
            WatchEventType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A single change delivered by a backend watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: Resource,
}

/// List query sent to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub kind: String,
    pub namespace: String,
    pub selector: LabelSelector,
}

impl ResourceQuery {
    /// Create a new query
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, selector: LabelSelector) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            selector,
        }
    }

    /// Check if `resource` is in scope and selected
    pub fn matches(&self, resource: &Resource) -> bool {
        resource.kind == self.kind
            && resource.namespace == self.namespace
            && self.selector.matches(&resource.labels)
    }
}
