//! Release state storage
//!
//! A [`StorageDriver`] persists [`ReleaseState`] records. [`Storage`] sits
//! on top of a driver for the duration of one command: it collects the
//! resources applied in this run, answers what was applied before, and
//! commits the new set at the end.
//!
//! Drivers:
//! - **Secrets**: one Secret of type `kubehcl.sh/module.v1` per release
//! - **Mock**: in memory, for tests

mod mock;
mod secrets;

pub use mock::{MockStorageDriver, OperationCounts};
pub use secrets::SecretsDriver;

use async_trait::async_trait;
use kubehcl_core::{BackendStorageKind, Diagnostic, Diagnostics};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::ClusterClient;
use crate::error::{KubeError, Result};
use crate::release::{ReleaseState, ResourceMap};
use crate::resource::ResourceList;

/// Type of the Secret holding a release
pub const SECRET_TYPE: &str = "kubehcl.sh/module.v1";

/// Default number of previous releases kept
pub const DEFAULT_MAX_HISTORY: usize = 10;

#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Stored state, `None` when the release does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ReleaseState>>;

    /// Create or replace the stored state
    async fn put(&self, state: &ReleaseState) -> Result<()>;

    /// Remove the stored state, `false` when there was none
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Every release in `namespace`, sorted by name
    async fn list(&self, namespace: &str) -> Result<Vec<ReleaseState>>;
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub max_history: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// State of one release during a command
pub struct Storage {
    name: String,
    namespace: String,
    kind: BackendStorageKind,
    config: StorageConfig,
    driver: Arc<dyn StorageDriver>,
    client: Arc<dyn ClusterClient>,
    prior: Option<ReleaseState>,
    working: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl Storage {
    /// Load the stored state of `name`
    ///
    /// A stored storage kind differing from `kind` is reported as a warning.
    pub async fn open(
        name: &str,
        namespace: &str,
        kind: BackendStorageKind,
        config: StorageConfig,
        driver: Arc<dyn StorageDriver>,
        client: Arc<dyn ClusterClient>,
    ) -> Result<(Self, Diagnostics)> {
        let prior = driver.get(namespace, name).await?;
        let mut diags = Diagnostics::new();
        if let Some(previous) = prior.as_ref().and_then(|p| p.storage_kind)
            && previous != kind
        {
            diags.push(Diagnostic::warning(
                format!("Storage kind has changed from {} to {}", previous, kind),
                "",
            ));
        }
        tracing::debug!(
            release = name,
            namespace,
            exists = prior.is_some(),
            "release state loaded"
        );
        Ok((
            Self {
                name: name.to_string(),
                namespace: namespace.to_string(),
                kind,
                config,
                driver,
                client,
                prior,
                working: Mutex::new(BTreeMap::new()),
            },
            diags,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> BackendStorageKind {
        self.kind
    }

    /// Whether the release was stored before this run
    pub fn exists(&self) -> bool {
        self.prior.is_some()
    }

    pub fn prior(&self) -> Option<&ReleaseState> {
        self.prior.as_ref()
    }

    fn working(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.working
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a resource applied in this run
    pub fn add(&self, name: &str, manifest: Vec<u8>) {
        self.working().insert(name.to_string(), manifest);
    }

    pub fn delete(&self, name: &str) {
        self.working().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.working().get(name).cloned()
    }

    pub fn working_set(&self) -> ResourceMap {
        ResourceMap(self.working().clone())
    }

    /// Resources recorded by the previous apply; always empty when stateless
    pub fn all_state_resources(&self) -> ResourceMap {
        match (&self.prior, self.kind) {
            (Some(prior), BackendStorageKind::KubeSecret) => prior.release.clone(),
            _ => ResourceMap::new(),
        }
    }

    /// What the cluster currently holds for `wanted`
    pub async fn resource_current_state(&self, wanted: &ResourceList) -> Result<ResourceList> {
        if self.kind == BackendStorageKind::Stateless {
            return Ok(Vec::new());
        }
        self.client.get(wanted).await
    }

    /// The stored counterpart of `wanted`, the base for its update
    ///
    /// Empty for a new resource. Fails with [`KubeError::ResourceUnmanaged`]
    /// when the object exists on the cluster but was never recorded, and
    /// drops `name` from the working set. Stateless storage returns
    /// `wanted` itself.
    pub async fn build_resource_from_state(
        &self,
        wanted: &ResourceList,
        name: &str,
    ) -> Result<ResourceList> {
        if self.kind == BackendStorageKind::Stateless {
            return Ok(wanted.clone());
        }
        let current = self.resource_current_state(wanted).await?;
        let stored = match self.all_state_resources().get(name) {
            Some(bytes) => self.client.build(bytes).await?,
            None => Vec::new(),
        };
        if let Some(live) = current.first()
            && stored.is_empty()
        {
            self.delete(name);
            return Err(KubeError::ResourceUnmanaged {
                kind: live.reference.kind.clone(),
                name: live.reference.name.clone(),
            });
        }
        Ok(stored)
    }

    /// Persist the working set, rotating the previous release into history
    ///
    /// Stateless storage keeps only a marker recording the storage kind.
    pub async fn update_state(&self) -> Result<ReleaseState> {
        let mut state = self
            .prior
            .clone()
            .unwrap_or_else(|| ReleaseState::new(&self.name, &self.namespace, self.kind));
        state.storage_kind = Some(self.kind);
        match self.kind {
            BackendStorageKind::KubeSecret => {
                state.rotate(self.working_set(), self.config.max_history)
            }
            BackendStorageKind::Stateless => {
                state.release = ResourceMap::new();
                state.previous_releases.clear();
            }
        }
        self.driver.put(&state).await?;
        tracing::debug!(
            release = %self.name,
            resources = state.release.len(),
            history = state.previous_releases.len(),
            "release state committed"
        );
        Ok(state)
    }

    pub async fn delete_state(&self) -> Result<bool> {
        self.driver.delete(&self.namespace, &self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClusterClient;
    use serde_json::json;

    fn manifest(kind: &str, name: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": { "name": name }
        }))
        .unwrap()
    }

    async fn open(
        driver: &MockStorageDriver,
        cluster: &MockClusterClient,
        kind: BackendStorageKind,
    ) -> (Storage, Diagnostics) {
        Storage::open(
            "alpha",
            "default",
            kind,
            StorageConfig::default(),
            Arc::new(driver.clone()),
            Arc::new(cluster.clone()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_unmanaged_object_is_rejected() {
        let cluster = MockClusterClient::new("default")
            .with_object(json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": { "name": "foo" }
            }))
            .unwrap();
        let driver = MockStorageDriver::new();
        let (storage, _) = open(&driver, &cluster, BackendStorageKind::KubeSecret).await;

        let bytes = manifest("Service", "foo");
        storage.add("kube_resource.foo", bytes.clone());
        let wanted = cluster.build(&bytes).await.unwrap();
        let err = storage
            .build_resource_from_state(&wanted, "kube_resource.foo")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ResourceUnmanaged { .. }));
        assert!(storage.get("kube_resource.foo").is_none());
    }

    #[tokio::test]
    async fn test_stored_resource_is_returned() {
        let cluster = MockClusterClient::new("default");
        let driver = MockStorageDriver::new();
        let bytes = manifest("ConfigMap", "settings");
        let mut state = ReleaseState::new("alpha", "default", BackendStorageKind::KubeSecret);
        state.release = [("kube_resource.settings".to_string(), bytes.clone())]
            .into_iter()
            .collect();
        driver.put(&state).await.unwrap();

        let (storage, diags) = open(&driver, &cluster, BackendStorageKind::KubeSecret).await;
        assert!(diags.is_empty());
        let wanted = cluster.build(&bytes).await.unwrap();
        let stored = storage
            .build_resource_from_state(&wanted, "kube_resource.settings")
            .await
            .unwrap();
        assert_eq!(stored, wanted);
    }

    #[tokio::test]
    async fn test_storage_kind_change_warns() {
        let cluster = MockClusterClient::new("default");
        let driver = MockStorageDriver::new();
        driver
            .put(&ReleaseState::new("alpha", "default", BackendStorageKind::Stateless))
            .await
            .unwrap();
        let (storage, diags) = open(&driver, &cluster, BackendStorageKind::KubeSecret).await;
        assert!(storage.exists());
        assert_eq!(
            diags.warnings().next().unwrap().summary,
            "Storage kind has changed from stateless to kube_secret"
        );
    }

    #[tokio::test]
    async fn test_stateless_keeps_only_a_marker() {
        let cluster = MockClusterClient::new("default");
        let driver = MockStorageDriver::new();
        let (storage, _) = open(&driver, &cluster, BackendStorageKind::Stateless).await;
        let bytes = manifest("ConfigMap", "settings");
        storage.add("kube_resource.settings", bytes.clone());
        let wanted = cluster.build(&bytes).await.unwrap();
        assert_eq!(
            storage
                .build_resource_from_state(&wanted, "kube_resource.settings")
                .await
                .unwrap(),
            wanted
        );

        let committed = storage.update_state().await.unwrap();
        assert!(committed.release.is_empty());
        assert_eq!(committed.storage_kind, Some(BackendStorageKind::Stateless));
        assert_eq!(cluster.operation_counts().gets, 0);
    }
}
