//! Objects handed to the cluster client
//!
//! A [`ResourceInfo`] is one Kubernetes object in JSON form plus the
//! reference identifying it on the cluster. Decoded instances and stored
//! state entries are both turned into resource lists before any cluster
//! call.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::{KubeError, Result};

/// Fields filled in by the API server, never part of a plan diff
const SERVER_METADATA_FIELDS: &[&str] = &[
    "uid",
    "resourceVersion",
    "creationTimestamp",
    "generation",
    "selfLink",
    "managedFields",
];

/// Built-in kinds without a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "CSIDriver",
    "CSINode",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Identity of an object on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// One object ready to be sent to the cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    pub reference: ObjectRef,
    pub object: JsonValue,
}

pub type ResourceList = Vec<ResourceInfo>;

impl ResourceInfo {
    /// Parse a JSON document, checking `apiVersion`, `kind` and `metadata.name`
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let object: JsonValue = serde_json::from_slice(bytes)?;
        Self::from_json(object)
    }

    pub fn from_json(object: JsonValue) -> Result<Self> {
        let text = |path: &[&str]| -> Result<String> {
            let mut current = &object;
            for key in path {
                current = current.get(key).unwrap_or(&JsonValue::Null);
            }
            current
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    KubeError::InvalidManifest(format!("missing string field {}", path.join(".")))
                })
        };
        let api_version = text(&["apiVersion"])?;
        let kind = text(&["kind"])?;
        let name = text(&["metadata", "name"])?;
        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        Ok(Self {
            reference: ObjectRef {
                api_version,
                kind,
                namespace,
                name,
            },
            object,
        })
    }

    /// Set the namespace unless the object already names one
    pub fn default_namespace(&mut self, namespace: &str) {
        if self.reference.namespace.is_some() {
            return;
        }
        self.reference.namespace = Some(namespace.to_string());
        if let Some(metadata) = self
            .object
            .get_mut("metadata")
            .and_then(JsonValue::as_object_mut)
        {
            metadata.insert(
                "namespace".to_string(),
                JsonValue::String(namespace.to_string()),
            );
        }
    }

    /// Drop the namespace of a cluster-scoped object
    pub fn clear_namespace(&mut self) {
        self.reference.namespace = None;
        if let Some(metadata) = self
            .object
            .get_mut("metadata")
            .and_then(JsonValue::as_object_mut)
        {
            metadata.remove("namespace");
        }
    }

    pub fn kind(&self) -> &str {
        &self.reference.kind
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }
}

/// Objects touched by a cluster operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResult {
    pub created: Vec<ObjectRef>,
    pub updated: Vec<ObjectRef>,
    pub deleted: Vec<ObjectRef>,
}

impl ApplyResult {
    pub fn append(&mut self, other: ApplyResult) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Past-tense verb describing the result, for progress lines
    pub fn operation(&self) -> &'static str {
        if !self.deleted.is_empty() {
            "Deleted"
        } else if !self.updated.is_empty() {
            "Updated"
        } else if !self.created.is_empty() {
            "Created"
        } else {
            "Unchanged"
        }
    }
}

/// Remove fields populated by the API server
pub fn strip_server_fields(object: &mut JsonValue) {
    let Some(map) = object.as_object_mut() else {
        return;
    };
    map.remove("status");
    if let Some(metadata) = map.get_mut("metadata").and_then(JsonValue::as_object_mut) {
        for field in SERVER_METADATA_FIELDS {
            metadata.remove(*field);
        }
    }
}

/// Whether a live object reached its ready state
///
/// Workloads compare replica counts from `status`, jobs need a success,
/// pods must be running and ready. Every other kind is ready once it exists.
pub fn is_ready(live: &JsonValue) -> bool {
    let kind = live.get("kind").and_then(JsonValue::as_str).unwrap_or("");
    let int = |ptr: &str| live.pointer(ptr).and_then(JsonValue::as_i64);
    match kind {
        "Deployment" => {
            let desired = int("/spec/replicas").unwrap_or(1);
            let generation = int("/metadata/generation").unwrap_or(0);
            let observed = int("/status/observedGeneration").unwrap_or(0);
            observed >= generation
                && int("/status/updatedReplicas").unwrap_or(0) >= desired
                && int("/status/availableReplicas").unwrap_or(0) >= desired
        }
        "StatefulSet" => {
            let desired = int("/spec/replicas").unwrap_or(1);
            int("/status/readyReplicas").unwrap_or(0) >= desired
        }
        "DaemonSet" => {
            let desired = int("/status/desiredNumberScheduled").unwrap_or(0);
            int("/status/numberReady").unwrap_or(0) >= desired
        }
        "Job" => int("/status/succeeded").unwrap_or(0) >= 1,
        "Pod" => {
            let phase = live.pointer("/status/phase").and_then(JsonValue::as_str);
            match phase {
                Some("Succeeded") => true,
                Some("Running") => live
                    .pointer("/status/conditions")
                    .and_then(JsonValue::as_array)
                    .is_some_and(|conditions| {
                        conditions.iter().any(|c| {
                            c.get("type").and_then(JsonValue::as_str) == Some("Ready")
                                && c.get("status").and_then(JsonValue::as_str) == Some("True")
                        })
                    }),
                _ => false,
            }
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_requires_identity() {
        let info = ResourceInfo::from_json(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "settings" }
        }))
        .unwrap();
        assert_eq!(info.reference.kind, "ConfigMap");
        assert_eq!(info.reference.namespace, None);

        let err = ResourceInfo::from_json(json!({ "apiVersion": "v1", "kind": "ConfigMap" }))
            .unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_default_namespace_keeps_explicit_one() {
        let mut info = ResourceInfo::from_json(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web", "namespace": "prod" }
        }))
        .unwrap();
        info.default_namespace("default");
        assert_eq!(info.reference.namespace.as_deref(), Some("prod"));

        let mut info = ResourceInfo::from_json(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web" }
        }))
        .unwrap();
        info.default_namespace("default");
        assert_eq!(info.object["metadata"]["namespace"], "default");
    }

    #[test]
    fn test_strip_server_fields() {
        let mut object = json!({
            "kind": "Service",
            "metadata": {
                "name": "web",
                "uid": "1234",
                "resourceVersion": "7",
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "managedFields": []
            },
            "status": { "loadBalancer": {} }
        });
        strip_server_fields(&mut object);
        assert_eq!(object, json!({ "kind": "Service", "metadata": { "name": "web" } }));
    }

    #[test]
    fn test_deployment_readiness() {
        let mut live = json!({
            "kind": "Deployment",
            "metadata": { "generation": 2 },
            "spec": { "replicas": 2 },
            "status": { "observedGeneration": 2, "updatedReplicas": 2, "availableReplicas": 1 }
        });
        assert!(!is_ready(&live));
        live["status"]["availableReplicas"] = json!(2);
        assert!(is_ready(&live));
        assert!(is_ready(&json!({ "kind": "ConfigMap" })));
    }

    #[test]
    fn test_apply_result_operation() {
        let reference = ObjectRef {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
            namespace: None,
            name: "a".into(),
        };
        let mut result = ApplyResult::default();
        assert_eq!(result.operation(), "Unchanged");
        result.created.push(reference.clone());
        assert_eq!(result.operation(), "Created");
        result.updated.push(reference);
        assert_eq!(result.operation(), "Updated");
    }
}
