//! Cache key construction
//!
//! Keys have the shape `kind/namespace/selector`. Mutations invalidate by the
//! `kind/namespace/` prefix, so every selector variant over that scope goes.

use crate::resource::LabelSelector;

/// Cache key for a list query
pub fn resource_key(kind: &str, namespace: &str, selector: &LabelSelector) -> String {
    format!("{}{}", scope_prefix(kind, namespace), selector)
}

/// Prefix shared by every cached query over `kind` in `namespace`
pub fn scope_prefix(kind: &str, namespace: &str) -> String {
    format!("{}/{}/", kind, namespace)
}
