//! Install, plan and uninstall against the in-memory cluster

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kubehcl_engine::{Engine, Prepared};
use kubehcl_kube::{
    BuiltinSchemaValidator, ChangeType, MockClusterClient, MockStorageDriver, ProgressReporter,
    Reconciler,
};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn config_map(name: &str, value: &str) -> String {
    format!(
        r#"
kube_resource "{name}" {{
  apiVersion = "v1"
  kind       = "ConfigMap"
  metadata {{
    name = "{name}"
  }}
  data = {{
    key = "{value}"
  }}
}}
"#
    )
}

fn module_with(resources: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    rewrite(&dir, resources);
    dir
}

fn rewrite(dir: &TempDir, resources: &[(&str, &str)]) {
    let body: String = resources
        .iter()
        .map(|(name, value)| config_map(name, value))
        .collect();
    write(dir.path(), "main.hcl", &body);
}

async fn prepare(dir: &Path) -> Prepared {
    Engine::builder()
        .release("alpha")
        .build()
        .prepare(dir)
        .await
        .expect("configuration is valid")
}

fn reconciler(cluster: &MockClusterClient, driver: &MockStorageDriver) -> Reconciler {
    Reconciler::new(
        Arc::new(cluster.clone()),
        Arc::new(BuiltinSchemaValidator::new().unwrap()),
        Arc::new(driver.clone()),
        "default",
    )
    .with_timeout(Duration::from_secs(5))
}

fn state_keys(driver: &MockStorageDriver) -> Vec<String> {
    driver
        .state("default", "alpha")
        .expect("release is stored")
        .release
        .keys()
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_install_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "main.hcl",
        r#"
kube_resource "namespace" {
  apiVersion = "v1"
  kind       = "Namespace"
  metadata {
    name = "demo"
  }
}

module "test" {
  source     = "./test"
  for_each   = { s1 = {}, s2 = {} }
  name       = "web-${each.key}"
  depends_on = [kube_resource.namespace]
}
"#,
    );
    write(
        dir.path(),
        "test/main.hcl",
        r#"
variable "name" {
  type = string
}

kube_resource "settings" {
  apiVersion = "v1"
  kind       = "ConfigMap"
  metadata {
    name      = var.name
    namespace = "demo"
  }
  data = {
    owner = var.name
  }
}
"#,
    );

    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    let prepared = prepare(dir.path()).await;
    assert_eq!(prepared.graph.len(), 3);

    let first = reconciler(&cluster, &driver)
        .install("alpha", &prepared, false)
        .await;
    assert!(first.is_success(), "{:?}", first.diags);
    assert_eq!(first.result.created.len(), 3);
    assert_eq!(
        state_keys(&driver),
        vec![
            "kube_resource.namespace",
            "module.test[s1].kube_resource.settings",
            "module.test[s2].kube_resource.settings",
        ]
    );

    cluster.reset_counts();
    let second = reconciler(&cluster, &driver)
        .install("alpha", &prepared, false)
        .await;
    assert!(second.is_success(), "{:?}", second.diags);
    assert!(second.result.is_empty(), "{:?}", second.result);
    assert_eq!(cluster.operation_counts().mutations(), 0);

    let state = driver.state("default", "alpha").unwrap();
    assert_eq!(state.release.len(), 3);
    assert_eq!(state.previous_releases["release-0"], state.release);
}

#[tokio::test]
async fn test_unmanaged_object_blocks_install() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "main.hcl",
        r#"
kube_resource "foo" {
  apiVersion = "v1"
  kind       = "Service"
  metadata {
    name = "foo"
  }
  spec = {
    ports = [{ port = 80 }]
  }
}
"#,
    );
    let cluster = MockClusterClient::new("default")
        .with_object(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "foo" }
        }))
        .unwrap();
    let driver = MockStorageDriver::new();
    let prepared = prepare(dir.path()).await;

    let outcome = reconciler(&cluster, &driver)
        .install("alpha", &prepared, false)
        .await;
    assert!(!outcome.is_success());
    let error = outcome.diags.errors().next().unwrap();
    assert_eq!(
        error.summary,
        "Resource already exists but not managed by Kubehcl"
    );
    assert_eq!(cluster.operation_counts().mutations(), 0);
    assert!(outcome.state.is_none());
    assert!(driver.state("default", "alpha").is_none());
}

#[tokio::test]
async fn test_second_install_prunes_removed_resources() {
    let dir = module_with(&[("a", "1"), ("b", "1"), ("c", "1")]);
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();

    let first = reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert!(first.is_success(), "{:?}", first.diags);

    rewrite(&dir, &[("a", "1"), ("b", "1")]);
    cluster.reset_counts();
    let second = reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert!(second.is_success(), "{:?}", second.diags);
    assert_eq!(cluster.operation_counts().deletes, 1);
    assert_eq!(second.result.deleted.len(), 1);
    assert_eq!(second.result.deleted[0].name, "c");
    assert!(cluster.object("ConfigMap", "c").is_none());

    assert_eq!(state_keys(&driver), vec!["kube_resource.a", "kube_resource.b"]);
    let state = driver.state("default", "alpha").unwrap();
    let previous: Vec<&String> = state.previous_releases["release-0"].keys().collect();
    assert_eq!(
        previous,
        vec!["kube_resource.a", "kube_resource.b", "kube_resource.c"]
    );
}

#[tokio::test]
async fn test_changed_resource_is_patched() {
    let dir = module_with(&[("a", "1")]);
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;

    rewrite(&dir, &[("a", "2")]);
    let outcome = reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.diags);
    assert_eq!(outcome.result.updated.len(), 1);
    let live = cluster.object("ConfigMap", "a").unwrap();
    assert_eq!(live["data"]["key"], "2");
}

#[tokio::test]
async fn test_invalid_resource_is_never_applied() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "main.hcl",
        r#"
kube_resource "broken" {
  apiVersion = "v1"
  kind       = "ConfigMap"
  metadata {
    name = "broken"
  }
  data = {
    replicas = 3
  }
}
"#,
    );
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    let outcome = reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert_eq!(
        outcome.diags.errors().next().unwrap().summary,
        "Resource Failed Validation"
    );
    assert_eq!(cluster.operation_counts().mutations(), 0);
    assert_eq!(driver.release_count(), 0);
}

#[tokio::test]
async fn test_create_namespace_and_progress() {
    let dir = module_with(&[("a", "1")]);
    let cluster = MockClusterClient::new("team");
    let driver = MockStorageDriver::new();
    let (progress, lines) = ProgressReporter::buffered();
    let outcome = Reconciler::new(
        Arc::new(cluster.clone()),
        Arc::new(BuiltinSchemaValidator::new().unwrap()),
        Arc::new(driver.clone()),
        "team",
    )
    .with_progress(progress)
    .install("alpha", &prepare(dir.path()).await, true)
    .await;
    assert!(outcome.is_success(), "{:?}", outcome.diags);
    assert_eq!(cluster.namespaces(), vec!["team"]);

    let lines = lines.lock().unwrap().clone();
    assert!(lines.contains(&"Created kube_resource: kube_resource.a".to_string()));
}

#[tokio::test]
async fn test_unreachable_cluster_fails_early() {
    let dir = module_with(&[("a", "1")]);
    let cluster = MockClusterClient::unreachable("default");
    let driver = MockStorageDriver::new();
    let outcome = reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert!(!outcome.is_success());
    assert_eq!(driver.operation_counts().gets, 0);
}

#[tokio::test]
async fn test_uninstall_removes_everything() {
    let dir = module_with(&[("a", "1"), ("b", "1")]);
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert_eq!(cluster.objects().len(), 2);

    let outcome = reconciler(&cluster, &driver).uninstall("alpha").await;
    assert!(outcome.is_success(), "{:?}", outcome.diags);
    assert_eq!(outcome.result.deleted.len(), 2);
    assert!(cluster.objects().is_empty());
    assert!(driver.state("default", "alpha").is_none());
}

#[tokio::test]
async fn test_uninstall_unknown_release() {
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    let outcome = reconciler(&cluster, &driver).uninstall("ghost").await;
    let error = outcome.diags.errors().next().unwrap();
    assert_eq!(error.summary, "Release does not exist");
    assert_eq!(
        error.detail,
        "The release you provided \"ghost\" does not exist in the given namespace \"default\""
    );
}

#[tokio::test]
async fn test_stateless_release() {
    let dir = module_with(&[("a", "1")]);
    write(dir.path(), "backend.hcl", "backend_storage {\n  stateless {}\n}\n");
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    let prepared = prepare(dir.path()).await;

    let plan = reconciler(&cluster, &driver).plan("alpha", &prepared).await;
    assert!(plan.plan.is_none());
    assert_eq!(
        plan.diags.errors().next().unwrap().summary,
        "Can't use plan in stateless mode"
    );
    assert_eq!(cluster.operation_counts().gets, 0);

    let installed = reconciler(&cluster, &driver)
        .install("alpha", &prepared, false)
        .await;
    assert!(installed.is_success(), "{:?}", installed.diags);
    assert!(driver.state("default", "alpha").unwrap().release.is_empty());

    let removed = reconciler(&cluster, &driver).uninstall("alpha").await;
    assert!(removed.is_success());
    assert_eq!(
        removed.diags.warnings().next().unwrap().summary,
        "Storage kind is stateless no resource will be deleted"
    );
    assert!(cluster.object("ConfigMap", "a").is_some());
    assert!(driver.state("default", "alpha").is_none());
}

#[tokio::test]
async fn test_plan_reports_changes() {
    let dir = module_with(&[("a", "1"), ("b", "1")]);
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;

    rewrite(&dir, &[("a", "2"), ("c", "1")]);
    cluster.reset_counts();
    let outcome = reconciler(&cluster, &driver)
        .plan("alpha", &prepare(dir.path()).await)
        .await;
    assert!(!outcome.diags.has_errors(), "{:?}", outcome.diags);
    assert_eq!(cluster.operation_counts().mutations(), 0);

    let plan = outcome.plan.unwrap();
    let changes: Vec<(&str, ChangeType)> = plan
        .changes
        .iter()
        .map(|c| (c.key.as_str(), c.change))
        .collect();
    assert_eq!(
        changes,
        vec![
            ("kube_resource.a", ChangeType::Modified),
            ("kube_resource.b", ChangeType::Removed),
            ("kube_resource.c", ChangeType::Added),
        ]
    );
}

#[tokio::test]
async fn test_list_releases() {
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    for (release, resource) in [("alpha", "a"), ("beta", "b")] {
        let dir = module_with(&[(resource, "1")]);
        let prepared = Engine::builder()
            .release(release)
            .build()
            .prepare(dir.path())
            .await
            .unwrap();
        let outcome = reconciler(&cluster, &driver)
            .install(release, &prepared, false)
            .await;
        assert!(outcome.is_success(), "{:?}", outcome.diags);
    }

    let releases = reconciler(&cluster, &driver).list().await.unwrap();
    let names: Vec<(&str, usize)> = releases
        .iter()
        .map(|r| (r.name.as_str(), r.resources))
        .collect();
    assert_eq!(names, vec![("alpha", 1), ("beta", 1)]);
}

#[tokio::test]
async fn test_failed_create_is_not_recorded() {
    let dir = module_with(&[("a", "1"), ("b", "1")]);
    let cluster = MockClusterClient::new("default").rejecting_create("b");
    let driver = MockStorageDriver::new();

    let outcome = reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert!(!outcome.is_success());
    assert_eq!(
        outcome.diags.errors().next().unwrap().summary,
        "Couldn't update resource"
    );
    assert_eq!(outcome.result.created.len(), 1);
    assert!(cluster.object("ConfigMap", "b").is_none());
    assert_eq!(state_keys(&driver), vec!["kube_resource.a"]);

    // Someone else creates `b`: the release must not adopt it
    let cluster = cluster
        .with_object(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "b" }
        }))
        .unwrap();
    cluster.reset_counts();
    let retry = reconciler(&cluster, &driver)
        .install("alpha", &prepare(dir.path()).await, false)
        .await;
    assert!(
        retry
            .diags
            .errors()
            .any(|e| e.summary == "Resource already exists but not managed by Kubehcl")
    );
    assert_eq!(cluster.operation_counts().patches, 0);
    assert_eq!(state_keys(&driver), vec!["kube_resource.a"]);
}

#[tokio::test]
async fn test_unready_resource_still_counts_as_created() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "main.hcl",
        r#"
kube_resource "migrate" {
  apiVersion = "batch/v1"
  kind       = "Job"
  metadata {
    name = "migrate"
  }
  spec = {
    template = {
      spec = {
        containers = [{ name = "migrate", image = "busybox" }]
      }
    }
  }
}
"#,
    );
    let cluster = MockClusterClient::new("default");
    let driver = MockStorageDriver::new();
    let outcome = reconciler(&cluster, &driver)
        .with_timeout(Duration::from_millis(50))
        .install("alpha", &prepare(dir.path()).await, false)
        .await;

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.diags.errors().next().unwrap().summary,
        "Resource is not ready within the timeout"
    );
    assert_eq!(outcome.result.created.len(), 1);
    assert_eq!(outcome.result.created[0].name, "migrate");
    assert!(cluster.object("Job", "migrate").is_some());
    assert_eq!(state_keys(&driver), vec!["kube_resource.migrate"]);
}
