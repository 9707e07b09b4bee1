//! Admission policy: which Pods get resource defaults, and which defaults
//!
//! A [`Policy`] is built once at startup and shared read-only by every
//! request handler. Matching is a pure function of the Pod's namespace and
//! labels.

pub mod selector;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;

use crate::patch::ResourceDefaults;

pub use selector::{LabelSelector, LabelSelectorOperator, LabelSelectorRequirement};

/// Label predicate applied to Pods inside the target namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelMatch {
    /// Set-based selector expression (`tier=backend,env in (prod)`)
    Selector(LabelSelector),
    /// Exact key/value pair; the key must be present with exactly this value
    Pair {
        /// Label key
        key: String,
        /// Required label value
        value: String,
    },
}

impl LabelMatch {
    /// Check if a label set satisfies this predicate
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            LabelMatch::Selector(selector) => selector.matches(labels),
            LabelMatch::Pair { key, value } => labels.get(key) == Some(value),
        }
    }
}

impl Default for LabelMatch {
    fn default() -> Self {
        LabelMatch::Selector(LabelSelector::default())
    }
}

/// Process-wide admission policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Only Pods in this namespace are considered
    pub namespace: String,
    /// Label predicate for Pods in `namespace`
    pub label_match: LabelMatch,
    /// Default requests and limits to fill in
    pub defaults: ResourceDefaults,
}

impl Policy {
    /// Create a policy for `namespace` that matches every Pod in it
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_match: LabelMatch::default(),
            defaults: ResourceDefaults::default(),
        }
    }

    /// Use `label_match` as the label predicate
    pub fn with_label_match(mut self, label_match: LabelMatch) -> Self {
        self.label_match = label_match;
        self
    }

    /// Use `defaults` as the resource defaults
    pub fn with_defaults(mut self, defaults: ResourceDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Namespace check alone; namespaces are never selector-matched
    pub fn in_scope(&self, namespace: &str) -> bool {
        namespace == self.namespace
    }

    /// Check if a Pod falls within this policy
    pub fn matches(&self, pod: &Pod) -> bool {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        if !self.in_scope(namespace) {
            return false;
        }

        match pod.metadata.labels.as_ref() {
            Some(labels) => self.label_match.matches(labels),
            None => self.label_match.matches(&BTreeMap::new()),
        }
    }
}
