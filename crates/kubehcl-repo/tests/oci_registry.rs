//! Pulling module artifacts from a plain HTTP registry

use kubehcl_core::archive::pack_dir;
use kubehcl_engine::config::{Protocol, RepoRecord};
use kubehcl_repo::{LAYER_MEDIA_TYPE, OciRegistry, RepoError, RepositoryFile, pull};
use serde_json::json;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

fn digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn module_tar() -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let module = dir.path().join("web");
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(module.join("main.hcl"), "kube_resource \"cm\" {}\n").unwrap();
    std::fs::write(module.join("index.hclvars"), "name = \"web\"\n").unwrap();
    pack_dir(&module).unwrap()
}

fn record(server: &MockServer) -> RepoRecord {
    let location = format!("{}/modules/web", server.uri().trim_start_matches("http://"));
    let mut record = RepoRecord::new("local", location, Protocol::Oci);
    record.plain_http = true;
    record.timeout = 10;
    record
}

/// Serve a manifest with one layer per entry of `layers`
async fn serve_artifact(server: &MockServer, layers: &[(&str, Vec<u8>)]) {
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;

    let mut descriptors = Vec::new();
    for (media_type, data) in layers {
        let layer_digest = digest(data);
        descriptors.push(json!({
            "mediaType": media_type,
            "digest": layer_digest,
            "size": data.len(),
        }));
        Mock::given(method("GET"))
            .and(path(format!("/v2/modules/web/blobs/{}", layer_digest)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(server)
            .await;
    }
    let manifest = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_MEDIA_TYPE,
        "artifactType": "application/kubehcl+type",
        "config": {
            "mediaType": "application/vnd.oci.empty.v1+json",
            "digest": digest(b"{}"),
            "size": 2,
        },
        "layers": descriptors,
        "annotations": { "name": "web" },
    }))
    .unwrap();
    Mock::given(method("GET"))
        .and(path("/v2/modules/web/manifests/v1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", digest(&manifest).as_str())
                .set_body_raw(manifest, MANIFEST_MEDIA_TYPE),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pull_single_layer() {
    let server = MockServer::start().await;
    serve_artifact(&server, &[(LAYER_MEDIA_TYPE, module_tar())]).await;
    let work = TempDir::new().unwrap();
    let file = RepositoryFile::new(work.path().join("repositories.hcl"));
    file.add(&record(&server)).unwrap();

    let dest = work.path().join("frontend");
    pull(&file, "local", "v1", None, &dest).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dest.join("main.hcl")).unwrap(),
        "kube_resource \"cm\" {}\n"
    );
    assert!(dest.join("index.hclvars").is_file());
}

#[tokio::test]
async fn test_pull_rejects_multiple_layers() {
    let server = MockServer::start().await;
    serve_artifact(
        &server,
        &[
            (LAYER_MEDIA_TYPE, module_tar()),
            (LAYER_MEDIA_TYPE, b"second".to_vec()),
        ],
    )
    .await;
    let registry = OciRegistry::new(record(&server)).unwrap();

    let err = registry.pull("v1").await.unwrap_err();
    assert!(matches!(err, RepoError::LayerCount { count: 2 }), "{err}");
}

#[tokio::test]
async fn test_pull_rejects_foreign_media_type() {
    let server = MockServer::start().await;
    serve_artifact(
        &server,
        &[("application/vnd.oci.image.layer.v1.tar+gzip", module_tar())],
    )
    .await;
    let registry = OciRegistry::new(record(&server)).unwrap();

    let err = registry.pull("v1").await.unwrap_err();
    assert!(matches!(err, RepoError::UnexpectedMediaType { .. }), "{err}");
}

#[tokio::test]
async fn test_pull_missing_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let registry = OciRegistry::new(record(&server)).unwrap();

    let err = registry.pull("v2").await.unwrap_err();
    let diags = err.into_diagnostics();
    let diag = diags.errors().next().unwrap();
    assert_eq!(diag.summary, "Couldn't pull module");
    assert!(diag.detail.starts_with("Tag v2 cannot be pulled error:"));
}

/// Relative path and content of every file below `dir`, sorted
fn tree(dir: &std::path::Path) -> Vec<(String, Vec<u8>)> {
    fn collect(root: &std::path::Path, dir: &std::path::Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                collect(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                out.push((rel, std::fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = Vec::new();
    collect(dir, dir, &mut out);
    out.sort();
    out
}

#[tokio::test]
async fn test_pulled_tree_matches_packed_folder() {
    let work = TempDir::new().unwrap();
    let module = work.path().join("mod");
    std::fs::create_dir_all(module.join("nested/deeper")).unwrap();
    std::fs::write(module.join("main.hcl"), "module \"db\" {\n  source = \"./nested\"\n}\n").unwrap();
    std::fs::write(module.join("index.hclvars"), "name    = \"mod\"\nversion = \"1.0.0\"\n")
        .unwrap();
    std::fs::write(module.join("nested/main.hcl"), "locals {\n  a = 1\n}\n").unwrap();
    std::fs::write(module.join("nested/deeper/blob.bin"), [0u8, 1, 2, 254, 255]).unwrap();

    let server = MockServer::start().await;
    serve_artifact(&server, &[(LAYER_MEDIA_TYPE, pack_dir(&module).unwrap())]).await;
    let file = RepositoryFile::new(work.path().join("repositories.hcl"));
    file.add(&record(&server)).unwrap();

    let dest = work.path().join("mod-copy");
    pull(&file, "local", "v1", None, &dest).await.unwrap();
    assert_eq!(tree(&dest), tree(&module));
}
