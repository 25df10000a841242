//! kubehcl Repository Management
//!
//! Modules are shared through two kinds of repositories:
//!
//! - **HTTP repositories**: an `index.yaml` maps module names to versioned
//!   download URLs of gzipped tarballs
//! - **OCI registries**: one artifact per tag, holding a single tar layer
//!
//! Registered repositories are `repo` blocks in the repository file.
//! [`RepoFetcher`] plugs repositories into the module loader so that
//! `source = "repo://<repo>/<tag>"` resolves without touching the disk.

pub mod backend;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod index;
pub mod oci;

pub use backend::{RepositoryBackend, add_repository, create_backend, pull, push};
pub use config::{RepoPaths, RepositoryFile, parse_repo_url};
pub use error::{RepoError, Result};
pub use fetcher::RepoFetcher;
pub use http::HttpRepository;
pub use index::{IndexEntry, RepositoryIndex};
pub use oci::{ARTIFACT_TYPE, LAYER_MEDIA_TYPE, OciRegistry};
