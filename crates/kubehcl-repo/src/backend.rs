//! Unified repository backend
//!
//! Pull, push and `repo add` work the same way for every protocol.

use async_trait::async_trait;
use kubehcl_core::archive::{pack_dir, unpack_to_dir};
use kubehcl_core::OsFs;
use kubehcl_engine::config::RepoRecord;
use kubehcl_engine::read_index_vars;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::RepositoryFile;
use crate::error::{RepoError, Result};
use crate::http::HttpRepository;
use crate::oci::OciRegistry;

#[async_trait]
pub trait RepositoryBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Verify the repository answers with the configured credentials
    async fn check(&self) -> Result<()>;

    /// Download a module archive
    ///
    /// `tag` is the module name for index repositories, which also need a
    /// `version`; for registries it is the artifact tag.
    async fn download(&self, tag: &str, version: Option<&str>) -> Result<Vec<u8>>;

    /// Publish an archive under `tag`
    async fn upload(
        &self,
        tag: &str,
        archive: Vec<u8>,
        annotations: BTreeMap<String, String>,
    ) -> Result<String>;
}

pub fn create_backend(record: RepoRecord) -> Result<Box<dyn RepositoryBackend>> {
    if record.protocol.uses_index() {
        Ok(Box::new(HttpRepository::new(record)?))
    } else {
        Ok(Box::new(OciRegistry::new(record)?))
    }
}

#[async_trait]
impl RepositoryBackend for HttpRepository {
    fn name(&self) -> &str {
        HttpRepository::name(self)
    }

    async fn check(&self) -> Result<()> {
        self.fetch_index().await.map(|_| ())
    }

    async fn download(&self, tag: &str, version: Option<&str>) -> Result<Vec<u8>> {
        let version = version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RepoError::VersionRequired {
                name: self.name().to_string(),
            })?;
        HttpRepository::download(self, tag, version).await
    }

    async fn upload(
        &self,
        _tag: &str,
        _archive: Vec<u8>,
        _annotations: BTreeMap<String, String>,
    ) -> Result<String> {
        Err(RepoError::PushUnsupported {
            name: self.name().to_string(),
        })
    }
}

#[async_trait]
impl RepositoryBackend for OciRegistry {
    fn name(&self) -> &str {
        OciRegistry::name(self)
    }

    async fn check(&self) -> Result<()> {
        OciRegistry::check(self).await
    }

    async fn download(&self, tag: &str, _version: Option<&str>) -> Result<Vec<u8>> {
        self.pull(tag).await
    }

    async fn upload(
        &self,
        tag: &str,
        archive: Vec<u8>,
        annotations: BTreeMap<String, String>,
    ) -> Result<String> {
        self.push(tag, archive, annotations).await
    }
}

/// Register a repository after checking that it answers
pub async fn add_repository(file: &RepositoryFile, record: RepoRecord) -> Result<()> {
    if let Some(existing) = file.load()?.get(&record.name) {
        return Err(RepoError::RepositoryAlreadyExists {
            name: existing.name.clone(),
            range: existing.decl_range.clone(),
        });
    }
    create_backend(record.clone())?.check().await?;
    file.add(&record)
}

/// Pull a module into `dest`
///
/// Nothing is written when the download or extraction fails.
pub async fn pull(
    file: &RepositoryFile,
    repo: &str,
    tag: &str,
    version: Option<&str>,
    dest: &Path,
) -> Result<PathBuf> {
    let backend = create_backend(file.get(repo)?)?;
    let data = backend.download(tag, version).await?;
    unpack_to_dir(&data, dest)?;
    tracing::info!(%repo, %tag, dest = %dest.display(), "module pulled");
    Ok(dest.to_path_buf())
}

/// Push `folder` to a registry under `tag`
///
/// The folder's `index.hclvars` becomes the manifest annotations.
pub async fn push(file: &RepositoryFile, folder: &Path, repo: &str, tag: &str) -> Result<String> {
    let (annotations, diags) = read_index_vars(&OsFs, folder);
    if diags.has_errors() {
        return Err(RepoError::InvalidConfig { diagnostics: diags });
    }
    let backend = create_backend(file.get(repo)?)?;
    let archive = pack_dir(folder)?;
    backend.upload(tag, archive, annotations).await
}
