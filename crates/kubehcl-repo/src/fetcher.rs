//! `repo://` module sources for the loader
//!
//! Pulled modules never touch the disk: the archive is expanded into a
//! [`MemFs`] rooted at `/<repo>/<tag>`.

use async_trait::async_trait;
use kubehcl_core::archive::unpack_to_memfs;
use kubehcl_core::{Diagnostics, MemFs};
use kubehcl_engine::{FetchedModule, ModuleFetcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::backend::create_backend;
use crate::config::RepositoryFile;
use crate::error::{RepoError, Result};

type CacheKey = (String, String, Option<String>);

/// Fetches modules from the registered repositories
pub struct RepoFetcher {
    file: RepositoryFile,
    fetched: Mutex<HashMap<CacheKey, Arc<MemFs>>>,
}

impl RepoFetcher {
    pub fn new(file: RepositoryFile) -> Self {
        Self {
            file,
            fetched: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch_module(
        &self,
        repo: &str,
        tag: &str,
        version: Option<&str>,
        dir: &Path,
    ) -> Result<Arc<MemFs>> {
        let key = (repo.to_string(), tag.to_string(), version.map(str::to_string));
        let cached = self.cache().get(&key).cloned();
        if let Some(fs) = cached {
            return Ok(fs);
        }
        tracing::debug!(%repo, %tag, version = ?version, "fetching module");
        let backend = create_backend(self.file.get(repo)?)?;
        let data = backend.download(tag, version).await?;
        let fs = Arc::new(unpack_to_memfs(&data, dir)?);
        self.cache().insert(key, fs.clone());
        Ok(fs)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<MemFs>>> {
        self.fetched.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ModuleFetcher for RepoFetcher {
    async fn fetch(
        &self,
        repo: &str,
        tag: &str,
        version: Option<&str>,
    ) -> std::result::Result<FetchedModule, Diagnostics> {
        let dir = PathBuf::from("/").join(repo).join(tag);
        let fs = self
            .fetch_module(repo, tag, version, &dir)
            .await
            .map_err(RepoError::into_diagnostics)?;
        Ok(FetchedModule { fs, dir })
    }
}
