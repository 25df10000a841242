//! HTTP index repositories against a mock server

use kubehcl_core::SourceFs;
use kubehcl_core::archive::{gzip, pack_dir};
use kubehcl_engine::ModuleFetcher;
use kubehcl_engine::config::{Protocol, RepoRecord};
use kubehcl_repo::{RepoError, RepoFetcher, RepositoryFile, add_repository, pull, push};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn module_archive() -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let module = dir.path().join("web");
    std::fs::create_dir_all(module.join("templates")).unwrap();
    std::fs::write(module.join("main.hcl"), "kube_resource \"cm\" {}\n").unwrap();
    std::fs::write(module.join("templates").join("page.tpl"), "hello ${name}\n").unwrap();
    gzip(&pack_dir(&module).unwrap()).unwrap()
}

fn index(urls: &str) -> String {
    format!(
        "entries:\n  web:\n    - version: 1.0.0\n      urls:\n        - {}\n",
        urls
    )
}

fn record(server: &MockServer) -> RepoRecord {
    let location = server.uri().trim_start_matches("http://").to_string();
    RepoRecord::new("stable", location, Protocol::Http)
}

fn registered(dir: &Path, record: &RepoRecord) -> RepositoryFile {
    let file = RepositoryFile::new(dir.join("repositories.hcl"));
    file.add(record).unwrap();
    file
}

async fn serve_module(server: &MockServer, url: &str) {
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index(url)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/modules/web-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(module_archive()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pull_relative_url() {
    let server = MockServer::start().await;
    serve_module(&server, "modules/web-1.0.0.tgz").await;
    let work = TempDir::new().unwrap();
    let file = registered(work.path(), &record(&server));

    let dest = work.path().join("frontend");
    pull(&file, "stable", "web", Some("1.0.0"), &dest)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(dest.join("main.hcl")).unwrap(),
        "kube_resource \"cm\" {}\n"
    );
    assert!(dest.join("templates").join("page.tpl").is_file());
}

#[tokio::test]
async fn test_pull_absolute_url() {
    let server = MockServer::start().await;
    let absolute = format!("{}/modules/web-1.0.0.tgz", server.uri());
    serve_module(&server, &absolute).await;
    let work = TempDir::new().unwrap();
    let file = registered(work.path(), &record(&server));

    let dest = work.path().join("web");
    pull(&file, "stable", "web", Some("1.0.0"), &dest)
        .await
        .unwrap();
    assert!(dest.join("main.hcl").is_file());
}

#[tokio::test]
async fn test_pull_requires_version() {
    let server = MockServer::start().await;
    let work = TempDir::new().unwrap();
    let file = registered(work.path(), &record(&server));

    let err = pull(&file, "stable", "web", None, &work.path().join("web"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::VersionRequired { .. }));
    let diags = err.into_diagnostics();
    assert_eq!(
        diags.errors().next().unwrap().summary,
        "Https repo must include version"
    );
}

#[tokio::test]
async fn test_unknown_module_and_version() {
    let server = MockServer::start().await;
    serve_module(&server, "modules/web-1.0.0.tgz").await;
    let work = TempDir::new().unwrap();
    let file = registered(work.path(), &record(&server));

    let err = pull(&file, "stable", "db", Some("1.0.0"), &work.path().join("db"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No module named db");

    let err = pull(&file, "stable", "web", Some("9.9.9"), &work.path().join("web"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No matching version 9.9.9");
    assert!(!work.path().join("web").exists());
}

#[tokio::test]
async fn test_unknown_repository() {
    let work = TempDir::new().unwrap();
    let file = RepositoryFile::new(work.path().join("repositories.hcl"));
    let err = pull(&file, "missing", "web", Some("1.0.0"), &work.path().join("web"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::RepositoryNotFound { .. }));
}

#[tokio::test]
async fn test_bad_status_and_bad_archive_leave_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index("broken.tgz")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not an archive".to_vec()))
        .mount(&server)
        .await;
    let work = TempDir::new().unwrap();
    let file = registered(work.path(), &record(&server));

    let dest = work.path().join("web");
    let err = pull(&file, "stable", "web", Some("1.0.0"), &dest)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Archive(_)));
    assert!(!dest.exists());
    let leftovers: Vec<_> = std::fs::read_dir(work.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("repositories.hcl")]);

    let missing = MockServer::start().await;
    let file = RepositoryFile::new(work.path().join("other.hcl"));
    file.add(&record(&missing)).unwrap();
    let err = pull(&file, "stable", "web", Some("1.0.0"), &dest)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::HttpError { status: 404, .. }));
}

#[tokio::test]
async fn test_credentials_and_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .and(header("authorization", "Basic bWU6c2VjcmV0"))
        .and(header("user-agent", "kubehcl"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index("web.tgz")))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = record(&server);
    record.username = Some("me".to_string());
    record.password = Some("secret".to_string());
    let work = TempDir::new().unwrap();
    let file = RepositoryFile::new(work.path().join("repositories.hcl"));

    add_repository(&file, record.clone()).await.unwrap();
    assert_eq!(file.get("stable").unwrap().username.as_deref(), Some("me"));

    let err = add_repository(&file, record).await.unwrap_err();
    assert!(matches!(err, RepoError::RepositoryAlreadyExists { .. }));
}

#[tokio::test]
async fn test_add_unreachable_repository_is_not_saved() {
    let server = MockServer::start().await;
    let work = TempDir::new().unwrap();
    let file = RepositoryFile::new(work.path().join("repositories.hcl"));

    let err = add_repository(&file, record(&server)).await.unwrap_err();
    assert!(matches!(err, RepoError::HttpError { status: 404, .. }));
    assert!(file.load().unwrap().is_empty());
}

#[tokio::test]
async fn test_fetcher_expands_in_memory_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(index("modules/web-1.0.0.tgz")),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/modules/web-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(module_archive()))
        .expect(1)
        .mount(&server)
        .await;
    let work = TempDir::new().unwrap();
    let fetcher = RepoFetcher::new(registered(work.path(), &record(&server)));

    let fetched = fetcher.fetch("stable", "web", Some("1.0.0")).await.unwrap();
    assert_eq!(fetched.dir, Path::new("/stable/web"));
    assert_eq!(
        fetched
            .fs
            .read_to_string(&fetched.dir.join("main.hcl"))
            .unwrap(),
        "kube_resource \"cm\" {}\n"
    );
    assert!(fetched.fs.is_file(&fetched.dir.join("templates/page.tpl")));

    fetcher.fetch("stable", "web", Some("1.0.0")).await.unwrap();
    assert!(!work.path().join("web").exists());
}

#[tokio::test]
async fn test_fetcher_reports_diagnostics() {
    let work = TempDir::new().unwrap();
    let fetcher = RepoFetcher::new(RepositoryFile::new(work.path().join("repositories.hcl")));
    let diags = fetcher.fetch("nope", "web", None).await.unwrap_err();
    assert_eq!(
        diags.errors().next().unwrap().summary,
        "Repository doesn't exist"
    );
}

#[tokio::test]
async fn test_push_to_index_repository_is_rejected() {
    let server = MockServer::start().await;
    let work = TempDir::new().unwrap();
    let file = registered(work.path(), &record(&server));
    let module = work.path().join("web");
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(module.join("index.hclvars"), "name = \"web\"\nversion = \"1.0.0\"\n").unwrap();

    let err = push(&file, &module, "stable", "v1").await.unwrap_err();
    assert!(matches!(err, RepoError::PushUnsupported { .. }));

    std::fs::remove_file(module.join("index.hclvars")).unwrap();
    let err = push(&file, &module, "stable", "v1").await.unwrap_err();
    let diags = err.into_diagnostics();
    assert_eq!(
        diags.errors().next().unwrap().summary,
        "File index.hclvars is missing"
    );
}
