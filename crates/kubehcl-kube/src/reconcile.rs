//! Release operations against a cluster
//!
//! [`Reconciler`] drives install, plan, uninstall and list for the releases
//! of one namespace. Install walks the dependency graph twice: a validation
//! pass that must come back clean, then an apply pass updating every
//! instance once its dependencies are in place. Resources recorded by the
//! previous install but no longer produced are pruned before the new state
//! is committed.

use kubehcl_core::{BackendStorageKind, Diagnostic, Diagnostics, ModuleTree};
use kubehcl_engine::{CancelFlag, DEFAULT_PARALLELISM, Graph, Prepared, Vertex};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::{ClusterClient, DEFAULT_TIMEOUT};
use crate::diff::{self, PlanResult, PlannedResource};
use crate::error::{KubeError, Result};
use crate::progress::ProgressReporter;
use crate::release::ReleaseState;
use crate::resource::ApplyResult;
use crate::storage::{Storage, StorageConfig, StorageDriver};
use crate::validate::SchemaValidator;

/// Outcome of an install or uninstall
#[derive(Debug, Default)]
pub struct ReleaseOutcome {
    pub result: ApplyResult,
    pub diags: Diagnostics,
    /// State committed at the end, `None` when nothing was written
    pub state: Option<ReleaseState>,
}

impl ReleaseOutcome {
    fn failed(diags: Diagnostics) -> Self {
        Self {
            diags,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        !self.diags.has_errors()
    }
}

#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub plan: Option<PlanResult>,
    pub diags: Diagnostics,
}

/// One row of `kubehcl list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub name: String,
    pub namespace: String,
    pub storage_kind: Option<BackendStorageKind>,
    pub resources: usize,
    pub history: usize,
}

impl From<&ReleaseState> for ReleaseSummary {
    fn from(state: &ReleaseState) -> Self {
        Self {
            name: state.name.clone(),
            namespace: state.namespace.clone(),
            storage_kind: state.storage_kind,
            resources: state.release.len(),
            history: state.previous_releases.len(),
        }
    }
}

pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    validator: Arc<dyn SchemaValidator>,
    driver: Arc<dyn StorageDriver>,
    namespace: String,
    timeout: Duration,
    parallelism: usize,
    storage_config: StorageConfig,
    progress: ProgressReporter,
    cancel: CancelFlag,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        validator: Arc<dyn SchemaValidator>,
        driver: Arc<dyn StorageDriver>,
        namespace: &str,
    ) -> Self {
        Self {
            client,
            validator,
            driver,
            namespace: namespace.to_string(),
            timeout: DEFAULT_TIMEOUT,
            parallelism: DEFAULT_PARALLELISM,
            storage_config: StorageConfig::default(),
            progress: ProgressReporter::silent(),
            cancel: CancelFlag::new(),
        }
    }

    /// Bound on each cluster operation and on readiness waits
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.storage_config.max_history = max_history;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Flag stopping the graph walks from starting new resources
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Apply `prepared` as release `release`
    pub async fn install(
        &self,
        release: &str,
        prepared: &Prepared,
        create_namespace: bool,
    ) -> ReleaseOutcome {
        let mut diags = Diagnostics::new();
        if let Err(e) = self.client.is_reachable().await {
            diags.push(e.to_diagnostic("Kubernetes cluster unreachable"));
            return ReleaseOutcome::failed(diags);
        }
        if create_namespace && let Err(e) = self.client.create_namespace(&self.namespace).await {
            diags.push(e.to_diagnostic("Couldn't create namespace"));
            return ReleaseOutcome::failed(diags);
        }

        diags.append(self.validate(&prepared.graph).await);
        if diags.has_errors() {
            return ReleaseOutcome::failed(diags);
        }

        let kind = prepared.tree.root().backend_storage;
        let storage = match self.open_storage(release, kind).await {
            Ok((storage, warnings)) => {
                diags.append(warnings);
                Arc::new(storage)
            }
            Err(e) => {
                diags.push(e.to_diagnostic("Couldn't load release state"));
                return ReleaseOutcome::failed(diags);
            }
        };

        tracing::info!(release, namespace = %self.namespace, storage = %kind, "installing");
        let (mut result, apply_diags) = self.apply(&prepared.graph, storage.clone()).await;
        let apply_failed = apply_diags.has_errors();
        diags.append(apply_diags);

        if apply_failed {
            // Keep ownership of everything the failed run did not re-add
            let working = storage.working_set();
            for (key, bytes) in &storage.all_state_resources().0 {
                if working.get(key).is_none() {
                    storage.add(key, bytes.clone());
                }
            }
        } else {
            let (pruned, prune_diags) = self.prune(&storage).await;
            result.append(pruned);
            diags.append(prune_diags);
        }

        let unchanged = storage
            .prior()
            .map(|prior| prior.release.clone())
            .unwrap_or_default()
            == storage.working_set();
        if diags.has_errors() && unchanged {
            tracing::debug!(release, "nothing applied, release state left untouched");
            return ReleaseOutcome {
                result,
                diags,
                state: None,
            };
        }
        match storage.update_state().await {
            Ok(state) => ReleaseOutcome {
                result,
                diags,
                state: Some(state),
            },
            Err(e) => {
                diags.push(e.to_diagnostic("Couldn't save release state"));
                ReleaseOutcome {
                    result,
                    diags,
                    state: None,
                }
            }
        }
    }

    /// Compare `prepared` against the cluster without changing anything
    pub async fn plan(&self, release: &str, prepared: &Prepared) -> PlanOutcome {
        let mut diags = Diagnostics::new();
        let kind = prepared.tree.root().backend_storage;
        if kind == BackendStorageKind::Stateless {
            diags.push(Diagnostic::error(
                "Can't use plan in stateless mode",
                "Plan compares against the stored release state, which stateless storage does not keep",
            ));
            return PlanOutcome { plan: None, diags };
        }
        if let Err(e) = self.client.is_reachable().await {
            diags.push(e.to_diagnostic("Kubernetes cluster unreachable"));
            return PlanOutcome { plan: None, diags };
        }
        diags.append(self.validate(&prepared.graph).await);
        if diags.has_errors() {
            return PlanOutcome { plan: None, diags };
        }

        let (storage, warnings) = match self.open_storage(release, kind).await {
            Ok(opened) => opened,
            Err(e) => {
                diags.push(e.to_diagnostic("Couldn't load release state"));
                return PlanOutcome { plan: None, diags };
            }
        };
        diags.append(warnings);

        match self.collect_plan(&prepared.graph, &storage).await {
            Ok((wanted, current)) => PlanOutcome {
                plan: Some(diff::compare(&wanted, &current)),
                diags,
            },
            Err(e) => {
                diags.push(e.to_diagnostic("Couldn't build resource"));
                PlanOutcome { plan: None, diags }
            }
        }
    }

    async fn collect_plan(
        &self,
        graph: &Graph,
        storage: &Storage,
    ) -> Result<(BTreeMap<String, JsonValue>, BTreeMap<String, PlannedResource>)> {
        let stored = storage.all_state_resources();
        let mut wanted = BTreeMap::new();
        let mut current = BTreeMap::new();

        for resource in graph.resources() {
            for (key, value) in &resource.config {
                let bytes = value
                    .to_canonical_json()
                    .map_err(|e| KubeError::Serialization(e.to_string()))?;
                let list = self.client.build(&bytes).await?;
                let Some(info) = list.first() else { continue };
                let live = self.client.fetch(info).await?;
                let previous = match stored.get(key) {
                    Some(bytes) => self.client.build(bytes).await?.into_iter().next(),
                    None => None,
                };
                wanted.insert(key.clone(), info.object.clone());
                current.insert(
                    key.clone(),
                    PlannedResource {
                        stored: previous.map(|p| p.object),
                        live,
                    },
                );
            }
        }

        for (key, bytes) in &stored.0 {
            if wanted.contains_key(key) {
                continue;
            }
            let Some(info) = self.client.build(bytes).await?.into_iter().next() else {
                continue;
            };
            let live = self.client.fetch(&info).await?;
            current.insert(
                key.clone(),
                PlannedResource {
                    stored: Some(info.object),
                    live,
                },
            );
        }
        Ok((wanted, current))
    }

    /// Delete every resource of `release`, then its state
    pub async fn uninstall(&self, release: &str) -> ReleaseOutcome {
        let mut diags = Diagnostics::new();
        let state = match self.driver.get(&self.namespace, release).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                diags.push(Diagnostic::error(
                    "Release does not exist",
                    format!(
                        "The release you provided \"{}\" does not exist in the given namespace \"{}\"",
                        release, self.namespace
                    ),
                ));
                return ReleaseOutcome::failed(diags);
            }
            Err(e) => {
                diags.push(e.to_diagnostic("Couldn't load release state"));
                return ReleaseOutcome::failed(diags);
            }
        };

        if state.storage_kind == Some(BackendStorageKind::Stateless) {
            diags.push(Diagnostic::warning(
                "Storage kind is stateless no resource will be deleted",
                format!("Only the record of release \"{release}\" is removed"),
            ));
            if let Err(e) = self.driver.delete(&self.namespace, release).await {
                diags.push(e.to_diagnostic("Couldn't delete release state"));
            }
            return ReleaseOutcome {
                diags,
                ..Default::default()
            };
        }

        if let Err(e) = self.client.is_reachable().await {
            diags.push(e.to_diagnostic("Kubernetes cluster unreachable"));
            return ReleaseOutcome::failed(diags);
        }

        let mut result = ApplyResult::default();
        for (key, bytes) in &state.release.0 {
            match self.delete_entry(key, bytes).await {
                Ok(deleted) => result.append(deleted),
                Err(diag) => diags.push(diag),
            }
        }
        if diags.has_errors() {
            return ReleaseOutcome {
                result,
                diags,
                state: Some(state),
            };
        }

        if let Err(e) = self.driver.delete(&self.namespace, release).await {
            diags.push(e.to_diagnostic("Couldn't delete release state"));
        }
        tracing::info!(release, deleted = result.deleted.len(), "uninstalled");
        ReleaseOutcome {
            result,
            diags,
            state: None,
        }
    }

    /// Every release stored in the namespace
    pub async fn list(&self) -> Result<Vec<ReleaseSummary>> {
        let states = self.driver.list(&self.namespace).await?;
        Ok(states.iter().map(ReleaseSummary::from).collect())
    }

    async fn open_storage(
        &self,
        release: &str,
        kind: BackendStorageKind,
    ) -> Result<(Storage, Diagnostics)> {
        Storage::open(
            release,
            &self.namespace,
            kind,
            self.storage_config.clone(),
            self.driver.clone(),
            self.client.clone(),
        )
        .await
    }

    /// Schema check of every instance; never touches the cluster
    async fn validate(&self, graph: &Graph) -> Diagnostics {
        let graph = Arc::new(graph.clone());
        let validator = self.validator.clone();
        let collected = Arc::new(Mutex::new(Diagnostics::new()));
        let sink = collected.clone();
        let walked = graph.clone();

        let report = graph
            .walk(self.parallelism, &self.cancel, move |vertex| {
                let graph = walked.clone();
                let validator = validator.clone();
                let sink = sink.clone();
                async move {
                    let Some(resource) = graph.resource(vertex) else {
                        return Ok(());
                    };
                    let mut diags = Diagnostics::new();
                    for (key, value) in &resource.config {
                        let bytes = match value.to_canonical_json() {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                diags.push(
                                    Diagnostic::from_error("Resource Failed Validation", &e)
                                        .with_subject(&resource.range),
                                );
                                continue;
                            }
                        };
                        let errors = validator.validate(&bytes);
                        if !errors.is_empty() {
                            diags.push(
                                Diagnostic::error(
                                    "Resource Failed Validation",
                                    format!("{}:\n{}", key, errors.join("\n")),
                                )
                                .with_subject(&resource.range),
                            );
                        }
                    }
                    lock(&sink).append(diags);
                    Ok::<(), Diagnostics>(())
                }
            })
            .await;

        let mut diags = std::mem::take(&mut *lock(&collected));
        diags.append(report.diags);
        diags
    }

    /// Update every instance of the graph, dependencies first
    async fn apply(&self, graph: &Graph, storage: Arc<Storage>) -> (ApplyResult, Diagnostics) {
        let ctx = Arc::new(ApplyContext {
            graph: Arc::new(graph.clone()),
            client: self.client.clone(),
            storage,
            progress: self.progress.clone(),
            timeout: self.timeout,
            result: Mutex::new(ApplyResult::default()),
        });
        let visitor = ctx.clone();
        let report = graph
            .walk(self.parallelism, &self.cancel, move |vertex| {
                let ctx = visitor.clone();
                async move { ctx.visit(vertex).await }
            })
            .await;
        let result = std::mem::take(&mut *lock(&ctx.result));
        (result, report.diags)
    }

    /// Delete what the previous install recorded and this one did not
    async fn prune(&self, storage: &Storage) -> (ApplyResult, Diagnostics) {
        let mut result = ApplyResult::default();
        let mut diags = Diagnostics::new();
        let working = storage.working_set();
        for (key, bytes) in &storage.all_state_resources().0 {
            if working.get(key).is_some() {
                continue;
            }
            match self.delete_entry(key, bytes).await {
                Ok(deleted) => result.append(deleted),
                Err(diag) => {
                    storage.add(key, bytes.clone());
                    diags.push(diag);
                }
            }
        }
        (result, diags)
    }

    async fn delete_entry(&self, key: &str, bytes: &[u8]) -> std::result::Result<ApplyResult, Diagnostic> {
        let list = self
            .client
            .build(bytes)
            .await
            .map_err(|e| e.to_diagnostic("Couldn't delete resource"))?;
        let deleted = bounded(self.timeout, self.client.delete(&list))
            .await
            .map_err(|e| e.to_diagnostic("Couldn't delete resource"))?;
        self.client
            .wait_for_delete(&list, self.timeout)
            .await
            .map_err(|e| e.to_diagnostic("Couldn't delete resource within the timeout"))?;
        self.progress.line(&format!("Deleted kube_resource: {key}"));
        Ok(deleted)
    }
}

/// Shared by every apply visit
struct ApplyContext {
    graph: Arc<Graph>,
    client: Arc<dyn ClusterClient>,
    storage: Arc<Storage>,
    progress: ProgressReporter,
    timeout: Duration,
    result: Mutex<ApplyResult>,
}

impl ApplyContext {
    async fn visit(&self, vertex: Vertex) -> std::result::Result<(), Diagnostics> {
        let Some(resource) = self.graph.resource(vertex) else {
            return Ok(());
        };
        let mut diags = Diagnostics::new();
        for (key, value) in &resource.config {
            if let Err(diag) = self.apply_instance(key, value).await {
                diags.push(diag.with_subject(&resource.range));
            }
        }
        if diags.has_errors() { Err(diags) } else { Ok(()) }
    }

    async fn apply_instance(
        &self,
        key: &str,
        value: &kubehcl_core::Value,
    ) -> std::result::Result<(), Diagnostic> {
        let bytes = value
            .to_canonical_json()
            .map_err(|e| Diagnostic::from_error("Couldn't serialize resource", &e))?;
        self.storage.add(key, bytes.clone());

        let wanted = self
            .client
            .build(&bytes)
            .await
            .map_err(|e| self.failed(key, e.to_diagnostic("Couldn't build resource")))?;
        let current = match self.storage.build_resource_from_state(&wanted, key).await {
            Ok(current) => current,
            Err(e @ KubeError::ResourceUnmanaged { .. }) => {
                return Err(e.to_diagnostic("Resource already exists but not managed by Kubehcl"));
            }
            Err(e) => return Err(self.failed(key, e.to_diagnostic("Couldn't update resource"))),
        };

        let ticker = self.progress.track(key);
        let applied = bounded(self.timeout, self.client.update(&current, &wanted))
            .await
            .map_err(|e| self.failed(key, e.to_diagnostic("Couldn't update resource")))?;
        let operation = applied.operation();
        lock(&self.result).append(applied);

        let ready = self.client.wait(&wanted, self.timeout).await;
        ticker.finish(operation).await;
        ready.map_err(|e| e.to_diagnostic("Resource is not ready within the timeout"))
    }

    /// Restore the stored entry of `key` after a failed update
    ///
    /// A key the release never owned leaves the working set, so the next
    /// apply still treats the object as unmanaged.
    fn failed(&self, key: &str, diag: Diagnostic) -> Diagnostic {
        match self.storage.all_state_resources().get(key) {
            Some(previous) => self.storage.add(key, previous.to_vec()),
            None => self.storage.delete(key),
        }
        diag
    }
}

/// Fail with [`KubeError::Timeout`] once `timeout` has passed
async fn bounded<T>(
    timeout: Duration,
    operation: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(KubeError::Timeout(format!("{}s", timeout.as_secs()))),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Output format of `kubehcl template`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateFormat {
    #[default]
    Yaml,
    Json,
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TemplateFormat::Yaml => "yaml",
            TemplateFormat::Json => "json",
        })
    }
}

impl FromStr for TemplateFormat {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "yaml" => Ok(TemplateFormat::Yaml),
            "json" => Ok(TemplateFormat::Json),
            other => Err(KubeError::Serialization(format!(
                "unknown output kind '{other}', expected yaml or json"
            ))),
        }
    }
}

/// Every instance of `tree` as it would be sent to the cluster
pub fn template(tree: &ModuleTree, format: TemplateFormat) -> Result<String> {
    let mut out = String::new();
    for (key, value) in tree.all_instances() {
        let json = value.to_json();
        let rendered = match format {
            TemplateFormat::Yaml => serde_yaml::to_string(&json)?,
            TemplateFormat::Json => {
                let mut text = serde_json::to_string_pretty(&json)?;
                text.push('\n');
                text
            }
        };
        out.push_str(&format!("# Resource: {key}\n\n{rendered}\n"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_core::{DecodedModule, DecodedResource, SourceRange, Value};

    fn tree_with(resources: &[(&str, Value)]) -> ModuleTree {
        let mut root = DecodedModule::default();
        for (name, value) in resources {
            let fqn = format!("kube_resource.{name}");
            root.resources.push(DecodedResource {
                name: name.to_string(),
                module_path: Vec::new(),
                config: BTreeMap::from([(fqn, value.clone())]),
                depends_on: Vec::new(),
                range: SourceRange::default(),
            });
        }
        ModuleTree::new(root)
    }

    fn config_map(name: &str) -> Value {
        Value::object([
            ("apiVersion".to_string(), Value::from("v1")),
            ("kind".to_string(), Value::from("ConfigMap")),
            (
                "metadata".to_string(),
                Value::object([("name".to_string(), Value::from(name))]),
            ),
        ])
    }

    #[test]
    fn test_template_sorted_by_key() {
        let tree = tree_with(&[("zeta", config_map("z")), ("alpha", config_map("a"))]);
        let out = template(&tree, TemplateFormat::Yaml).unwrap();
        let alpha = out.find("# Resource: kube_resource.alpha\n\n").unwrap();
        let zeta = out.find("# Resource: kube_resource.zeta\n\n").unwrap();
        assert!(alpha < zeta);
        assert!(out.contains("kind: ConfigMap"));
    }

    #[test]
    fn test_template_json() {
        let tree = tree_with(&[("alpha", config_map("a"))]);
        let out = template(&tree, TemplateFormat::Json).unwrap();
        assert!(out.starts_with("# Resource: kube_resource.alpha\n\n{"));
        assert!(out.contains("\"kind\": \"ConfigMap\""));
    }

    #[test]
    fn test_template_yaml_snapshot() {
        let tree = tree_with(&[("settings", config_map("settings"))]);
        let out = template(&tree, TemplateFormat::Yaml).unwrap();
        insta::assert_snapshot!(out, @r"
        # Resource: kube_resource.settings

        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: settings
        ");
    }

    #[test]
    fn test_template_format_parse() {
        assert_eq!("json".parse::<TemplateFormat>().unwrap(), TemplateFormat::Json);
        assert!("toml".parse::<TemplateFormat>().is_err());
    }
}
