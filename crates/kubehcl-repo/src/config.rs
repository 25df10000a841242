//! Repository configuration management
//!
//! Registered repositories live as `repo "NAME" { ... }` blocks in
//! `<config dir>/kubehcl/repositories.hcl`.

use indexmap::IndexMap;
use kubehcl_core::Diagnostics;
use kubehcl_engine::config::{Protocol, RepoRecord, decode_repo_file};
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

pub const REPOSITORY_CONFIG_ENV: &str = "KUBEHCL_REPOSITORY_CONFIG";
pub const REPOSITORY_CACHE_ENV: &str = "KUBEHCL_REPOSITORY_CACHE";

/// Locations of the repository file and download cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPaths {
    pub config: PathBuf,
    pub cache: PathBuf,
}

impl RepoPaths {
    /// Resolve from `KUBEHCL_REPOSITORY_CONFIG` / `KUBEHCL_REPOSITORY_CACHE`,
    /// falling back to the platform config and cache directories
    pub fn from_env() -> Self {
        let config = std::env::var_os(REPOSITORY_CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("kubehcl")
                    .join("repositories.hcl")
            });
        let cache = std::env::var_os(REPOSITORY_CACHE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("kubehcl")
                    .join("repository")
            });
        Self { config, cache }
    }
}

/// The repository file
#[derive(Debug, Clone)]
pub struct RepositoryFile {
    path: PathBuf,
}

impl RepositoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode every registered repository, in file order
    ///
    /// A missing file means no repositories.
    pub fn load(&self) -> Result<IndexMap<String, RepoRecord>> {
        let src = match std::fs::read_to_string(&self.path) {
            Ok(src) => src,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IndexMap::new()),
            Err(e) => return Err(e.into()),
        };
        let mut diags = Diagnostics::new();
        let repos = decode_repo_file(&src, &self.path.display().to_string(), &mut diags);
        if diags.has_errors() {
            return Err(RepoError::InvalidConfig { diagnostics: diags });
        }
        Ok(repos)
    }

    pub fn get(&self, name: &str) -> Result<RepoRecord> {
        self.load()?
            .shift_remove(name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    /// Append a `repo` block, refusing names already registered
    pub fn add(&self, record: &RepoRecord) -> Result<()> {
        if let Some(existing) = self.load()?.get(&record.name) {
            return Err(RepoError::RepositoryAlreadyExists {
                name: existing.name.clone(),
                range: existing.decl_range.clone(),
            });
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = std::fs::read_to_string(&self.path).unwrap_or_default();
        if !content.is_empty() && !content.ends_with("\n\n") {
            content.push_str(if content.ends_with('\n') { "\n" } else { "\n\n" });
        }
        content.push_str(&record.render());
        std::fs::write(&self.path, content)?;
        tracing::debug!(repo = %record.name, file = %self.path.display(), "repository added");
        Ok(())
    }

    /// Rewrite the file without the named repository
    pub fn remove(&self, name: &str) -> Result<RepoRecord> {
        let mut repos = self.load()?;
        let removed = repos
            .shift_remove(name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })?;
        let content = repos
            .values()
            .map(RepoRecord::render)
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&self.path, content)?;
        tracing::debug!(repo = %name, file = %self.path.display(), "repository removed");
        Ok(removed)
    }
}

/// Build a record from the `repo add` arguments
///
/// The URL must carry its protocol (`https://`, `http://` or `oci://`); the
/// record keeps host and path only.
pub fn parse_repo_url(name: &str, raw: &str) -> Result<RepoRecord> {
    if !raw.contains("://") {
        return Err(RepoError::MissingProtocol {
            url: raw.to_string(),
        });
    }
    let parsed = url::Url::parse(raw).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    let protocol: Protocol = parsed
        .scheme()
        .parse()
        .map_err(|message| RepoError::InvalidProtocol { message })?;

    let host = parsed
        .host_str()
        .ok_or_else(|| RepoError::InvalidRepositoryUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        })?;
    let mut location = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    location.push_str(parsed.path().trim_end_matches('/'));
    Ok(RepoRecord::new(name, location, protocol))
}
