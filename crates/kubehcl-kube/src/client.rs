//! Cluster access
//!
//! [`ClusterClient`] is the seam between the reconciler and the cluster.
//! Implementations provide single-object primitives; listing, updating,
//! deleting and waiting over resource lists are built on top of them.
//! [`KubeClusterClient`] talks to a real API server through kube-rs.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Client, Config,
    api::{Api, DeleteParams, DynamicObject, ObjectMeta, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{KubeError, Result};
use crate::patch::{is_empty_patch, three_way_merge_patch};
use crate::resource::{self, ApplyResult, ResourceInfo, ResourceList};

/// Default bound on every cluster operation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fail unless the API server answers
    async fn is_reachable(&self) -> Result<()>;

    /// Create `namespace`, succeeding if it already exists
    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Turn one JSON manifest into a resource list with its scope resolved
    async fn build(&self, manifest: &[u8]) -> Result<ResourceList>;

    /// Live object, `None` when it does not exist
    async fn fetch(&self, info: &ResourceInfo) -> Result<Option<JsonValue>>;

    async fn create(&self, info: &ResourceInfo) -> Result<()>;

    async fn patch(&self, info: &ResourceInfo, patch: &JsonValue) -> Result<()>;

    /// Delete one object, `false` when it was already gone
    async fn remove(&self, info: &ResourceInfo) -> Result<bool>;

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn is_ready(&self, info: &ResourceInfo) -> Result<bool> {
        Ok(self
            .fetch(info)
            .await?
            .as_ref()
            .is_some_and(resource::is_ready))
    }

    /// Live state of the objects in `resources` that exist
    async fn get(&self, resources: &ResourceList) -> Result<ResourceList> {
        let mut live = Vec::new();
        for info in resources {
            if let Some(object) = self.fetch(info).await? {
                live.push(ResourceInfo {
                    reference: info.reference.clone(),
                    object,
                });
            }
        }
        Ok(live)
    }

    /// Bring the cluster from `current` to `wanted`
    ///
    /// Missing objects are created, existing ones patched, objects only in
    /// `current` deleted.
    async fn update(&self, current: &ResourceList, wanted: &ResourceList) -> Result<ApplyResult> {
        let mut result = ApplyResult::default();
        for target in wanted {
            let original = current.iter().find(|c| c.reference == target.reference);
            match self.fetch(target).await? {
                None => {
                    self.create(target).await?;
                    tracing::info!(object = %target.reference, "created");
                    result.created.push(target.reference.clone());
                }
                Some(live) => {
                    let patch =
                        three_way_merge_patch(original.map(|o| &o.object), &target.object, &live);
                    if !is_empty_patch(&patch) {
                        self.patch(target, &patch).await?;
                        tracing::info!(object = %target.reference, "updated");
                        result.updated.push(target.reference.clone());
                    }
                }
            }
        }
        for stale in current
            .iter()
            .filter(|c| !wanted.iter().any(|w| w.reference == c.reference))
        {
            if self.remove(stale).await? {
                tracing::info!(object = %stale.reference, "deleted");
                result.deleted.push(stale.reference.clone());
            }
        }
        Ok(result)
    }

    async fn delete(&self, resources: &ResourceList) -> Result<ApplyResult> {
        let mut result = ApplyResult::default();
        for info in resources {
            if self.remove(info).await? {
                tracing::info!(object = %info.reference, "deleted");
                result.deleted.push(info.reference.clone());
            }
        }
        Ok(result)
    }

    /// Poll until every object is ready
    async fn wait(&self, resources: &ResourceList, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for info in resources {
            while !self.is_ready(info).await? {
                if Instant::now() >= deadline {
                    return Err(KubeError::Timeout(format!(
                        "{}s waiting for {} to become ready",
                        timeout.as_secs(),
                        info.reference
                    )));
                }
                tokio::time::sleep(self.poll_interval()).await;
            }
        }
        Ok(())
    }

    /// Poll until every object is gone
    async fn wait_for_delete(&self, resources: &ResourceList, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for info in resources {
            while self.fetch(info).await?.is_some() {
                if Instant::now() >= deadline {
                    return Err(KubeError::Timeout(format!(
                        "{}s waiting for {} to be deleted",
                        timeout.as_secs(),
                        info.reference
                    )));
                }
                tokio::time::sleep(self.poll_interval()).await;
            }
        }
        Ok(())
    }
}

/// How to reach the cluster, mirroring the `--kube-*` flags
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub token: Option<String>,
    pub as_user: Option<String>,
    pub as_groups: Vec<String>,
    pub apiserver: Option<String>,
    pub ca_file: Option<PathBuf>,
    pub tls_server_name: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub timeout: Option<Duration>,
}

impl ConnectionSettings {
    /// Resolve a kube-rs config: explicit kubeconfig, then the default one,
    /// then in-cluster
    pub async fn to_config(&self) -> Result<Config> {
        let options = KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        };
        let kubeconfig = match &self.kubeconfig {
            Some(path) => Some(Kubeconfig::read_from(path)?),
            None => Kubeconfig::read().ok(),
        };
        let mut config = match kubeconfig {
            Some(mut kubeconfig) => {
                if let Some(ca) = &self.ca_file {
                    for named in &mut kubeconfig.clusters {
                        if let Some(cluster) = named.cluster.as_mut() {
                            cluster.certificate_authority = Some(ca.display().to_string());
                            cluster.certificate_authority_data = None;
                        }
                    }
                }
                Config::from_custom_kubeconfig(kubeconfig, &options).await?
            }
            None => {
                if self.ca_file.is_some() {
                    tracing::warn!("no kubeconfig found, ignoring the CA file");
                }
                Config::infer().await?
            }
        };

        if let Some(server) = &self.apiserver {
            config.cluster_url = server
                .parse()
                .map_err(|e| KubeError::Config(format!("invalid API server {server}: {e}")))?;
        }
        if let Some(token) = &self.token {
            config.auth_info.token = Some(token.clone().into());
        }
        if let Some(user) = &self.as_user {
            config.auth_info.impersonate = Some(user.clone());
        }
        if !self.as_groups.is_empty() {
            config.auth_info.impersonate_groups = Some(self.as_groups.clone());
        }
        if let Some(name) = &self.tls_server_name {
            config.tls_server_name = Some(name.clone());
        }
        if self.insecure_skip_tls_verify {
            config.accept_invalid_certs = true;
        }
        if let Some(timeout) = self.timeout {
            config.connect_timeout = Some(timeout);
        }
        Ok(config)
    }
}

/// [`ClusterClient`] backed by kube-rs and API discovery
pub struct KubeClusterClient {
    client: Client,
    discovery: RwLock<Discovery>,
    namespace: String,
}

impl KubeClusterClient {
    /// Connect and run API discovery; namespaced objects without a
    /// namespace land in `namespace`
    pub async fn connect(settings: &ConnectionSettings, namespace: &str) -> Result<Self> {
        let config = settings.to_config().await?;
        let client = Client::try_from(config)?;
        Self::with_client(client, namespace).await
    }

    pub async fn with_client(client: Client, namespace: &str) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
            namespace: namespace.to_string(),
        })
    }

    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn resolve(&self, info: &ResourceInfo) -> Result<(ApiResource, ApiCapabilities)> {
        let gvk = gvk_from_api_version(&info.reference.api_version, &info.reference.kind);
        if let Some(found) = self.discovery.read().await.resolve_gvk(&gvk) {
            return Ok(found);
        }
        // Kinds registered by a CRD applied earlier in this run
        let refreshed = Discovery::new(self.client.clone()).run().await?;
        let found = refreshed.resolve_gvk(&gvk);
        *self.discovery.write().await = refreshed;
        found.ok_or_else(|| KubeError::UnknownKind {
            api_version: info.reference.api_version.clone(),
            kind: info.reference.kind.clone(),
        })
    }

    async fn api(&self, info: &ResourceInfo) -> Result<Api<DynamicObject>> {
        let (api_resource, capabilities) = self.resolve(info).await?;
        Ok(if capabilities.scope == Scope::Namespaced {
            let ns = info
                .reference
                .namespace
                .as_deref()
                .unwrap_or(&self.namespace);
            Api::namespaced_with(self.client.clone(), ns, &api_resource)
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn is_reachable(&self) -> Result<()> {
        let version = self.client.apiserver_version().await?;
        tracing::debug!(version = %version.git_version, "cluster reachable");
        Ok(())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    "name".to_string(),
                    namespace.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                tracing::info!(namespace, "namespace created");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn build(&self, manifest: &[u8]) -> Result<ResourceList> {
        let mut info = ResourceInfo::from_json_slice(manifest)?;
        let (_, capabilities) = self.resolve(&info).await?;
        if capabilities.scope == Scope::Namespaced {
            info.default_namespace(&self.namespace);
        } else {
            info.clear_namespace();
        }
        Ok(vec![info])
    }

    async fn fetch(&self, info: &ResourceInfo) -> Result<Option<JsonValue>> {
        let api = self.api(info).await?;
        match api.get_opt(info.name()).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, info: &ResourceInfo) -> Result<()> {
        let api = self.api(info).await?;
        let obj: DynamicObject = serde_json::from_value(info.object.clone())?;
        api.create(&PostParams::default(), &obj).await?;
        Ok(())
    }

    async fn patch(&self, info: &ResourceInfo, patch: &JsonValue) -> Result<()> {
        let api = self.api(info).await?;
        api.patch(info.name(), &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn remove(&self, info: &ResourceInfo) -> Result<bool> {
        let api = self.api(info).await?;
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };
        match api.delete(info.name(), &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// `apps/v1` → group `apps`, version `v1`; `v1` is the core group
fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = gvk_from_api_version("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");

        let core = gvk_from_api_version("v1", "Service");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
        assert_eq!(core.kind, "Service");
    }
}
