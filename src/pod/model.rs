//! Pod wire shape, restricted to the fields the breaker reads or writes.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// A worker as returned by the cluster API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// Observed pod status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PodCondition>,
}

/// A single status condition (`Ready`, `ContainersReady`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

/// List envelope used by the cluster API and the custom verdict endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

pub const PHASE_RUNNING: &str = "Running";

impl Pod {
    /// Build a pod with the given identity and labels, running and ready.
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            status: PodStatus {
                phase: Some(PHASE_RUNNING.to_string()),
                conditions: vec![PodCondition {
                    kind: "Ready".to_string(),
                    status: "True".to_string(),
                }],
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// `namespace/name`, the identity used in logs and GC counters.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.status.phase.as_deref() == Some(PHASE_RUNNING)
    }

    /// True when the `Ready` condition reports `True`.
    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }

    /// Return a copy with `patch` applied. The receiver is left untouched.
    pub fn patched(&self, patch: &MetadataPatch) -> Pod {
        let mut copy = self.clone();
        patch.apply_to(&mut copy.metadata);
        copy
    }
}

/// Label/annotation changes expressed as a merge patch: `Some` sets, `None` removes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub labels: BTreeMap<String, Option<String>>,
    pub annotations: BTreeMap<String, Option<String>>,
}

impl MetadataPatch {
    pub fn set_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), Some(value.into()));
        self
    }

    pub fn remove_label(mut self, key: &str) -> Self {
        self.labels.insert(key.to_string(), None);
        self
    }

    pub fn set_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), Some(value.into()));
        self
    }

    pub fn remove_annotation(mut self, key: &str) -> Self {
        self.annotations.insert(key.to_string(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }

    pub fn apply_to(&self, meta: &mut ObjectMeta) {
        apply_map(&mut meta.labels, &self.labels);
        apply_map(&mut meta.annotations, &self.annotations);
    }

    /// JSON merge-patch body, guarded by the resource version of the read copy.
    pub fn to_merge_patch(&self, resource_version: Option<&str>) -> serde_json::Value {
        let mut metadata = serde_json::Map::new();
        if !self.labels.is_empty() {
            let labels = serde_json::to_value(&self.labels).unwrap_or_default();
            metadata.insert("labels".into(), labels);
        }
        if !self.annotations.is_empty() {
            metadata.insert(
                "annotations".into(),
                serde_json::to_value(&self.annotations).unwrap_or_default(),
            );
        }
        if let Some(rv) = resource_version {
            metadata.insert("resourceVersion".into(), rv.into());
        }
        serde_json::json!({ "metadata": metadata })
    }
}

fn apply_map(target: &mut BTreeMap<String, String>, changes: &BTreeMap<String, Option<String>>) {
    for (key, value) in changes {
        match value {
            Some(v) => {
                target.insert(key.clone(), v.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}
