//! Resource Model
//!
//! Backend-neutral representation of cluster objects, metric samples,
//! watch events and label selectors.

mod selector;
mod types;

pub use selector::{LabelSelector, Requirement};
pub use types::{
    MetricSample, Resource, ResourceQuery, WatchEvent, WatchEventType, CPU_ANNOTATION,
    MEMORY_ANNOTATION,
};
