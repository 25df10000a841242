//! In-memory cluster for testing
//!
//! Objects are kept as JSON keyed by their reference. Created objects get
//! a `uid` and `resourceVersion` like on a real API server.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::client::ClusterClient;
use crate::error::{KubeError, Result};
use crate::patch::apply_merge_patch;
use crate::resource::{ObjectRef, ResourceInfo, ResourceList, is_cluster_scoped_kind};

/// Counts of cluster calls for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClusterOperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
}

impl ClusterOperationCounts {
    /// Calls that changed the cluster
    pub fn mutations(&self) -> usize {
        self.creates + self.patches + self.deletes
    }
}

#[derive(Default)]
struct MockState {
    objects: BTreeMap<ObjectRef, JsonValue>,
    namespaces: BTreeSet<String>,
    counts: ClusterOperationCounts,
    next_version: u64,
    rejected: BTreeSet<String>,
}

/// [`ClusterClient`] keeping every object in memory
#[derive(Clone)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
    namespace: String,
    reachable: bool,
}

impl MockClusterClient {
    pub fn new(namespace: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            namespace: namespace.to_string(),
            reachable: true,
        }
    }

    /// A cluster whose API server never answers
    pub fn unreachable(namespace: &str) -> Self {
        Self {
            reachable: false,
            ..Self::new(namespace)
        }
    }

    /// Seed an object created outside of kubehcl
    pub fn with_object(self, object: JsonValue) -> Result<Self> {
        let mut info = ResourceInfo::from_json(object)?;
        self.scope(&mut info);
        self.lock().objects.insert(info.reference, info.object);
        Ok(self)
    }

    /// Refuse to create any object named `name`
    pub fn rejecting_create(self, name: &str) -> Self {
        self.lock().rejected.insert(name.to_string());
        self
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<JsonValue> {
        self.lock()
            .objects
            .iter()
            .find(|(r, _)| r.kind == kind && r.name == name)
            .map(|(_, o)| o.clone())
    }

    pub fn objects(&self) -> Vec<ObjectRef> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.lock().namespaces.iter().cloned().collect()
    }

    pub fn operation_counts(&self) -> ClusterOperationCounts {
        self.lock().counts.clone()
    }

    pub fn reset_counts(&self) {
        self.lock().counts = ClusterOperationCounts::default();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scope(&self, info: &mut ResourceInfo) {
        if is_cluster_scoped_kind(info.kind()) {
            info.clear_namespace();
        } else {
            info.default_namespace(&self.namespace);
        }
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn is_reachable(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(KubeError::Config("cluster unreachable".to_string()))
        }
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.lock().namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn build(&self, manifest: &[u8]) -> Result<ResourceList> {
        let mut info = ResourceInfo::from_json_slice(manifest)?;
        self.scope(&mut info);
        Ok(vec![info])
    }

    async fn fetch(&self, info: &ResourceInfo) -> Result<Option<JsonValue>> {
        let mut state = self.lock();
        state.counts.gets += 1;
        Ok(state.objects.get(&info.reference).cloned())
    }

    async fn create(&self, info: &ResourceInfo) -> Result<()> {
        let mut state = self.lock();
        state.counts.creates += 1;
        if state.rejected.contains(&info.reference.name) {
            return Err(KubeError::InvalidManifest(format!(
                "{} rejected by the API server",
                info.reference
            )));
        }
        state.next_version += 1;
        let version = state.next_version;
        let mut object = info.object.clone();
        if let Some(metadata) = object.get_mut("metadata").and_then(JsonValue::as_object_mut) {
            metadata.insert("uid".into(), JsonValue::String(format!("uid-{version}")));
            metadata.insert("resourceVersion".into(), JsonValue::String(version.to_string()));
        }
        state.objects.insert(info.reference.clone(), object);
        Ok(())
    }

    async fn patch(&self, info: &ResourceInfo, patch: &JsonValue) -> Result<()> {
        let mut state = self.lock();
        state.counts.patches += 1;
        state.next_version += 1;
        let version = state.next_version;
        let object = state
            .objects
            .get_mut(&info.reference)
            .ok_or_else(|| KubeError::NotFound(info.reference.to_string()))?;
        apply_merge_patch(object, patch);
        if let Some(metadata) = object.get_mut("metadata").and_then(JsonValue::as_object_mut) {
            metadata.insert("resourceVersion".into(), JsonValue::String(version.to_string()));
        }
        Ok(())
    }

    async fn remove(&self, info: &ResourceInfo) -> Result<bool> {
        let mut state = self.lock();
        state.counts.deletes += 1;
        Ok(state.objects.remove(&info.reference).is_some())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map(data: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "settings" },
            "data": { "key": data }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_creates_then_patches() {
        let cluster = MockClusterClient::new("default");
        let first = cluster.build(&config_map("a")).await.unwrap();
        let result = cluster.update(&Vec::new(), &first).await.unwrap();
        assert_eq!(result.created.len(), 1);
        assert_eq!(
            first[0].reference.namespace.as_deref(),
            Some("default")
        );

        let second = cluster.build(&config_map("b")).await.unwrap();
        let result = cluster.update(&first, &second).await.unwrap();
        assert_eq!(result.updated.len(), 1);
        assert_eq!(cluster.object("ConfigMap", "settings").unwrap()["data"]["key"], "b");

        let result = cluster.update(&second, &second).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_is_cluster_scoped() {
        let cluster = MockClusterClient::new("default");
        let manifest = serde_json::to_vec(&json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "demo" }
        }))
        .unwrap();
        let built = cluster.build(&manifest).await.unwrap();
        assert_eq!(built[0].reference.namespace, None);
    }

    #[tokio::test]
    async fn test_delete_and_wait() {
        let cluster = MockClusterClient::new("default");
        let list = cluster.build(&config_map("a")).await.unwrap();
        cluster.update(&Vec::new(), &list).await.unwrap();
        cluster.wait(&list, Duration::from_secs(1)).await.unwrap();

        let result = cluster.delete(&list).await.unwrap();
        assert_eq!(result.deleted.len(), 1);
        cluster
            .wait_for_delete(&list, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(cluster.delete(&list).await.unwrap().deleted.is_empty());
    }
}
