//! Resource default patches
//!
//! Works out which `requests`/`limits` entries each container is missing and
//! encodes the fix as an RFC 6902 JSON Patch. Two encodings are available
//! behind [`PatchBuilder`]:
//!
//! - [`AddOperations`]: one `add` per missing entry, addressed by container
//!   index (`/spec/containers/0/resources/requests/cpu`). This is the default.
//! - [`ReplaceObject`]: fills the gaps on a copy of the Pod and replaces the
//!   whole document with it.
//!
//! Entries already present on a container are never touched, so resubmitting
//! a patched Pod produces no further patch.

use std::collections::BTreeMap;
use std::fmt;

use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

use crate::quantity::{cpu_from_millis, memory_from_bytes, QuantityError};

/// `requests` or `limits`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceSection {
    /// `resources.requests`
    Requests,
    /// `resources.limits`
    Limits,
}

impl ResourceSection {
    /// Field name in the container's `resources`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Limits => "limits",
        }
    }
}

/// Resource names the webhook knows how to default
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceName {
    /// `cpu`, configured in millicores
    Cpu,
    /// `memory`, configured in bytes
    Memory,
}

impl ResourceName {
    /// Key in a resource list
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
        }
    }

    fn parse_default(&self, input: &str) -> Result<Quantity, QuantityError> {
        match self {
            Self::Cpu => cpu_from_millis(input),
            Self::Memory => memory_from_bytes(input),
        }
    }
}

/// One defaultable entry, e.g. `limits.memory`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceField {
    /// Requests or limits
    pub section: ResourceSection,
    /// CPU or memory
    pub name: ResourceName,
}

impl ResourceField {
    /// Every defaultable field, in patch order
    pub const ALL: [ResourceField; 4] = [
        ResourceField::new(ResourceSection::Requests, ResourceName::Cpu),
        ResourceField::new(ResourceSection::Requests, ResourceName::Memory),
        ResourceField::new(ResourceSection::Limits, ResourceName::Cpu),
        ResourceField::new(ResourceSection::Limits, ResourceName::Memory),
    ];

    /// Create a field from its section and resource name
    pub const fn new(section: ResourceSection, name: ResourceName) -> Self {
        Self { section, name }
    }

    /// Whether the container already declares this entry
    pub fn is_set_on(&self, container: &Container) -> bool {
        let resources = container.resources.as_ref();
        let list = match self.section {
            ResourceSection::Requests => resources.and_then(|r| r.requests.as_ref()),
            ResourceSection::Limits => resources.and_then(|r| r.limits.as_ref()),
        };
        list.is_some_and(|l| l.contains_key(self.name.as_str()))
    }
}

impl fmt::Display for ResourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section.as_str(), self.name.as_str())
    }
}

/// Configured default values, as given in the environment
///
/// CPU values are integer millicores and memory values integer bytes. An
/// empty or absent value disables that field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceDefaults {
    /// Default `requests.cpu` in millicores
    pub cpu_request: Option<String>,
    /// Default `limits.cpu` in millicores
    pub cpu_limit: Option<String>,
    /// Default `requests.memory` in bytes
    pub memory_request: Option<String>,
    /// Default `limits.memory` in bytes
    pub memory_limit: Option<String>,
}

impl ResourceDefaults {
    /// Raw configured value for `field`, if non-empty
    pub fn raw(&self, field: ResourceField) -> Option<&str> {
        let value = match (field.section, field.name) {
            (ResourceSection::Requests, ResourceName::Cpu) => &self.cpu_request,
            (ResourceSection::Requests, ResourceName::Memory) => &self.memory_request,
            (ResourceSection::Limits, ResourceName::Cpu) => &self.cpu_limit,
            (ResourceSection::Limits, ResourceName::Memory) => &self.memory_limit,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Parsed default for `field`
    ///
    /// Returns `None` when the field is not configured or its value is not an
    /// integer. An unparseable default only disables that one field.
    pub fn quantity(&self, field: ResourceField) -> Option<Quantity> {
        let raw = self.raw(field)?;
        match field.name.parse_default(raw) {
            Ok(quantity) => Some(quantity),
            Err(e) => {
                debug!(field = %field, error = %e, "Skipping unparseable default");
                None
            }
        }
    }

    /// Configured fields whose value cannot be parsed
    pub fn invalid_fields(&self) -> Vec<(ResourceField, QuantityError)> {
        ResourceField::ALL
            .into_iter()
            .filter_map(|field| {
                let raw = self.raw(field)?;
                field.name.parse_default(raw).err().map(|e| (field, e))
            })
            .collect()
    }

    /// True when no field is configured at all
    pub fn is_empty(&self) -> bool {
        ResourceField::ALL
            .into_iter()
            .all(|field| self.raw(field).is_none())
    }
}

/// Defaults the container lacks, in patch order
pub fn missing_defaults(
    container: &Container,
    defaults: &ResourceDefaults,
) -> Vec<(ResourceField, Quantity)> {
    ResourceField::ALL
        .into_iter()
        .filter(|field| !field.is_set_on(container))
        .filter_map(|field| defaults.quantity(field).map(|q| (field, q)))
        .collect()
}

/// Fill missing defaults on every container of `pod` in place
///
/// Returns the number of entries set.
pub fn apply_defaults(pod: &mut Pod, defaults: &ResourceDefaults) -> usize {
    let Some(spec) = pod.spec.as_mut() else {
        return 0;
    };

    let mut applied = 0;
    for container in &mut spec.containers {
        let missing = missing_defaults(container, defaults);
        if missing.is_empty() {
            continue;
        }

        let resources = container
            .resources
            .get_or_insert_with(ResourceRequirements::default);
        for (field, quantity) in missing {
            let list = match field.section {
                ResourceSection::Requests => resources.requests.get_or_insert_with(BTreeMap::new),
                ResourceSection::Limits => resources.limits.get_or_insert_with(BTreeMap::new),
            };
            list.insert(field.name.as_str().to_string(), quantity);
            applied += 1;
        }
    }
    applied
}

/// Strategy for turning missing defaults into a JSON Patch
pub trait PatchBuilder: Send + Sync + fmt::Debug {
    /// Build the patch for `pod`, or `None` when nothing is missing
    fn build(
        &self,
        pod: &Pod,
        defaults: &ResourceDefaults,
    ) -> Result<Option<Patch>, serde_json::Error>;
}

/// Explicit `add` operations addressed by container index
///
/// When a container has no `resources` object, or no `requests`/`limits`
/// map, an `add` of an empty object at that path precedes the first entry
/// that needs it.
#[derive(Clone, Copy, Debug, Default)]
pub struct AddOperations;

impl PatchBuilder for AddOperations {
    fn build(
        &self,
        pod: &Pod,
        defaults: &ResourceDefaults,
    ) -> Result<Option<Patch>, serde_json::Error> {
        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice());
        let mut ops = Vec::new();

        for (index, container) in containers.unwrap_or_default().iter().enumerate() {
            let missing = missing_defaults(container, defaults);
            if missing.is_empty() {
                continue;
            }

            let resources = container.resources.as_ref();
            if resources.is_none() {
                ops.push(add(container_pointer(index, &["resources"]), empty_object()));
            }

            let mut has_requests = resources.is_some_and(|r| r.requests.is_some());
            let mut has_limits = resources.is_some_and(|r| r.limits.is_some());

            for (field, quantity) in missing {
                let section = field.section.as_str();
                let exists = match field.section {
                    ResourceSection::Requests => &mut has_requests,
                    ResourceSection::Limits => &mut has_limits,
                };
                if !*exists {
                    ops.push(add(
                        container_pointer(index, &["resources", section]),
                        empty_object(),
                    ));
                    *exists = true;
                }

                ops.push(add(
                    container_pointer(index, &["resources", section, field.name.as_str()]),
                    serde_json::to_value(&quantity)?,
                ));
            }
        }

        Ok((!ops.is_empty()).then_some(Patch(ops)))
    }
}

/// Whole-object replacement with the defaulted Pod
///
/// Fields the Pod type does not model are dropped from the replacement, so
/// prefer [`AddOperations`] unless this exact encoding is required.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplaceObject;

impl PatchBuilder for ReplaceObject {
    fn build(
        &self,
        pod: &Pod,
        defaults: &ResourceDefaults,
    ) -> Result<Option<Patch>, serde_json::Error> {
        let mut mutated = pod.clone();
        if apply_defaults(&mut mutated, defaults) == 0 {
            return Ok(None);
        }

        Ok(Some(Patch(vec![PatchOperation::Replace(ReplaceOperation {
            path: PointerBuf::new(),
            value: serde_json::to_value(&mutated)?,
        })])))
    }
}

/// Selects a [`PatchBuilder`] implementation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PatchMode {
    /// Per-field `add` operations
    #[default]
    Add,
    /// Replace the whole object
    Replace,
}

impl PatchMode {
    /// Builder implementing this mode
    pub fn builder(self) -> Box<dyn PatchBuilder> {
        match self {
            PatchMode::Add => Box::new(AddOperations),
            PatchMode::Replace => Box::new(ReplaceObject),
        }
    }
}

fn container_pointer(index: usize, rest: &[&str]) -> PointerBuf {
    let index = index.to_string();
    let mut tokens = vec!["spec", "containers", index.as_str()];
    tokens.extend_from_slice(rest);
    PointerBuf::from_tokens(tokens)
}

fn add(path: PointerBuf, value: serde_json::Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;
    use serde_json::json;

    fn all_defaults() -> ResourceDefaults {
        ResourceDefaults {
            cpu_request: Some("100".into()),
            cpu_limit: Some("500".into()),
            memory_request: Some("67108864".into()),
            memory_limit: Some("134217728".into()),
        }
    }

    fn pod_from(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    fn bare_pod(containers: usize) -> Pod {
        let containers: Vec<_> = (0..containers)
            .map(|i| json!({"name": format!("c{}", i), "image": "nginx", "resources": {}}))
            .collect();
        pod_from(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"containers": containers}
        }))
    }

    fn paths(patch: &Patch) -> Vec<String> {
        patch
            .0
            .iter()
            .map(|op| match op {
                PatchOperation::Add(a) => a.path.to_string(),
                PatchOperation::Replace(r) => r.path.to_string(),
                other => panic!("unexpected operation {:?}", other),
            })
            .collect()
    }

    fn apply(pod: &Pod, patch: &Patch) -> Pod {
        let mut doc = serde_json::to_value(pod).unwrap();
        json_patch::patch(&mut doc, &patch.0).unwrap();
        serde_json::from_value(doc).unwrap()
    }

    fn resource(pod: &Pod, index: usize, field: &str) -> Option<String> {
        let (section, name) = field.split_once('.').unwrap();
        let resources = pod.spec.as_ref()?.containers[index].resources.as_ref()?;
        let list = match section {
            "requests" => resources.requests.as_ref()?,
            _ => resources.limits.as_ref()?,
        };
        list.get(name).map(|q| q.0.clone())
    }

    #[test]
    fn field_order_is_requests_then_limits_cpu_then_memory() {
        let names: Vec<String> = ResourceField::ALL.iter().map(|f| f.to_string()).collect();
        assert_eq!(
            names,
            ["requests.cpu", "requests.memory", "limits.cpu", "limits.memory"]
        );
    }

    #[test]
    fn empty_defaults_are_disabled() {
        let defaults = ResourceDefaults {
            cpu_request: Some(String::new()),
            ..Default::default()
        };
        assert!(defaults.is_empty());
        assert!(defaults.quantity(ResourceField::ALL[0]).is_none());
        assert!(!all_defaults().is_empty());
    }

    #[test]
    fn invalid_fields_reports_only_unparseable_values() {
        let defaults = ResourceDefaults {
            cpu_limit: Some("not-a-number".into()),
            memory_limit: Some("134217728".into()),
            ..Default::default()
        };
        let invalid = defaults.invalid_fields();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].0.to_string(), "limits.cpu");
        assert_eq!(invalid[0].1.input, "not-a-number");
    }

    #[test]
    fn add_operations_fill_every_field_of_bare_container() {
        let pod = bare_pod(1);
        let patch = AddOperations.build(&pod, &all_defaults()).unwrap().unwrap();

        assert_eq!(
            paths(&patch),
            [
                "/spec/containers/0/resources/requests",
                "/spec/containers/0/resources/requests/cpu",
                "/spec/containers/0/resources/requests/memory",
                "/spec/containers/0/resources/limits",
                "/spec/containers/0/resources/limits/cpu",
                "/spec/containers/0/resources/limits/memory",
            ]
        );

        let patched = apply(&pod, &patch);
        assert_eq!(resource(&patched, 0, "requests.cpu").as_deref(), Some("100m"));
        assert_eq!(resource(&patched, 0, "requests.memory").as_deref(), Some("64Mi"));
        assert_eq!(resource(&patched, 0, "limits.cpu").as_deref(), Some("500m"));
        assert_eq!(resource(&patched, 0, "limits.memory").as_deref(), Some("128Mi"));
    }

    #[test]
    fn add_operations_create_missing_resources_object() {
        let pod = pod_from(json!({
            "metadata": {"name": "web"},
            "spec": {"containers": [{"name": "app"}]}
        }));
        let defaults = ResourceDefaults {
            cpu_request: Some("250".into()),
            ..Default::default()
        };
        let patch = AddOperations.build(&pod, &defaults).unwrap().unwrap();

        assert_eq!(
            paths(&patch),
            [
                "/spec/containers/0/resources",
                "/spec/containers/0/resources/requests",
                "/spec/containers/0/resources/requests/cpu",
            ]
        );
        let patched = apply(&pod, &patch);
        assert_eq!(resource(&patched, 0, "requests.cpu").as_deref(), Some("250m"));
    }

    #[test]
    fn existing_entries_are_never_touched() {
        let pod = pod_from(json!({
            "metadata": {"name": "web"},
            "spec": {"containers": [{
                "name": "app",
                "resources": {"limits": {"cpu": "2"}}
            }]}
        }));
        let patch = AddOperations.build(&pod, &all_defaults()).unwrap().unwrap();

        let paths = paths(&patch);
        assert!(!paths.contains(&"/spec/containers/0/resources/limits/cpu".to_string()));
        assert!(!paths.contains(&"/spec/containers/0/resources/limits".to_string()));
        assert!(paths.contains(&"/spec/containers/0/resources/limits/memory".to_string()));

        let patched = apply(&pod, &patch);
        assert_eq!(resource(&patched, 0, "limits.cpu").as_deref(), Some("2"));
        assert_eq!(resource(&patched, 0, "requests.cpu").as_deref(), Some("100m"));
    }

    #[test]
    fn operations_follow_container_order() {
        let pod = bare_pod(3);
        let defaults = ResourceDefaults {
            memory_limit: Some("1073741824".into()),
            ..Default::default()
        };
        let patch = AddOperations.build(&pod, &defaults).unwrap().unwrap();
        let leaves: Vec<String> = paths(&patch)
            .into_iter()
            .filter(|p| p.ends_with("/memory"))
            .collect();
        assert_eq!(
            leaves,
            [
                "/spec/containers/0/resources/limits/memory",
                "/spec/containers/1/resources/limits/memory",
                "/spec/containers/2/resources/limits/memory",
            ]
        );
    }

    #[test]
    fn unparseable_default_skips_only_that_field() {
        let pod = bare_pod(1);
        let defaults = ResourceDefaults {
            cpu_limit: Some("not-a-number".into()),
            memory_limit: Some("134217728".into()),
            ..Default::default()
        };
        let patch = AddOperations.build(&pod, &defaults).unwrap().unwrap();
        let patched = apply(&pod, &patch);

        assert_eq!(resource(&patched, 0, "limits.cpu"), None);
        assert_eq!(resource(&patched, 0, "limits.memory").as_deref(), Some("128Mi"));
    }

    #[test]
    fn nothing_missing_means_no_patch() {
        let pod = bare_pod(2);
        assert!(AddOperations
            .build(&pod, &ResourceDefaults::default())
            .unwrap()
            .is_none());

        let patch = AddOperations.build(&pod, &all_defaults()).unwrap().unwrap();
        let patched = apply(&pod, &patch);
        assert!(AddOperations.build(&patched, &all_defaults()).unwrap().is_none());
        assert!(ReplaceObject.build(&patched, &all_defaults()).unwrap().is_none());
    }

    #[test]
    fn pod_without_spec_has_no_patch() {
        let pod = Pod::default();
        assert!(AddOperations.build(&pod, &all_defaults()).unwrap().is_none());
        assert!(ReplaceObject.build(&pod, &all_defaults()).unwrap().is_none());
    }

    #[test]
    fn apply_defaults_counts_entries_set() {
        let mut pod = bare_pod(2);
        assert_eq!(apply_defaults(&mut pod, &all_defaults()), 8);
        assert_eq!(apply_defaults(&mut pod, &all_defaults()), 0);
    }

    #[test]
    fn replace_object_emits_single_root_replace() {
        let pod = bare_pod(2);
        let patch = ReplaceObject.build(&pod, &all_defaults()).unwrap().unwrap();
        assert_eq!(paths(&patch), [""]);

        let patched = apply(&pod, &patch);
        for index in 0..2 {
            assert_eq!(resource(&patched, index, "requests.cpu").as_deref(), Some("100m"));
            assert_eq!(resource(&patched, index, "limits.memory").as_deref(), Some("128Mi"));
        }
        assert_eq!(patched.metadata.name.as_deref(), Some("web"));
    }

    #[test]
    fn both_strategies_agree_on_result() {
        let pod = pod_from(json!({
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"containers": [
                {"name": "app", "resources": {"requests": {"memory": "1Gi"}}},
                {"name": "sidecar"}
            ]}
        }));
        let defaults = all_defaults();

        let by_add = apply(&pod, &AddOperations.build(&pod, &defaults).unwrap().unwrap());
        let by_replace = apply(&pod, &ReplaceObject.build(&pod, &defaults).unwrap().unwrap());
        assert_eq!(by_add, by_replace);
        assert_eq!(resource(&by_add, 0, "requests.memory").as_deref(), Some("1Gi"));
    }

    #[test]
    fn patch_mode_selects_builder() {
        assert_eq!(PatchMode::default(), PatchMode::Add);
        let pod = bare_pod(1);
        let patch = PatchMode::Replace
            .builder()
            .build(&pod, &all_defaults())
            .unwrap()
            .unwrap();
        assert!(matches!(patch.0[0], PatchOperation::Replace(_)));

        let spec = PodSpec::default();
        let empty = Pod {
            spec: Some(spec),
            ..Default::default()
        };
        assert!(PatchMode::Add
            .builder()
            .build(&empty, &all_defaults())
            .unwrap()
            .is_none());
    }
}
