//! Error types for repository operations

use kubehcl_core::{CoreError, Diagnostic, Diagnostics, SourceRange};
use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Repository already exists: {name}")]
    RepositoryAlreadyExists { name: String, range: SourceRange },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Repository URL {url} has no protocol")]
    MissingProtocol { url: String },

    #[error("{message}")]
    InvalidProtocol { message: String },

    #[error("Repository {name} needs a module version")]
    VersionRequired { name: String },

    #[error("Invalid repository configuration")]
    InvalidConfig { diagnostics: Diagnostics },

    // ============ Network Errors ============
    #[error("HTTP error: {status} for {url}")]
    HttpError { status: u16, url: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Couldn't load certificate: {message}")]
    Certificate { message: String },

    #[error("Couldn't load CA certificate: {message}")]
    CaCertificate { message: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    // ============ Index Errors ============
    #[error("Invalid index format: {message}")]
    InvalidIndex { message: String },

    #[error("No module named {name}")]
    ModuleNotFound { name: String },

    #[error("No matching version {version}")]
    VersionNotFound { name: String, version: String },

    // ============ OCI Errors ============
    #[error("Invalid OCI reference: {reference}")]
    InvalidOciReference { reference: String },

    #[error("Tag {tag} cannot be pulled error: {message}")]
    OciPullFailed { tag: String, message: String },

    #[error("Manifest has {count} layers")]
    LayerCount { count: usize },

    #[error("Layer has media type {media_type}")]
    UnexpectedMediaType { media_type: String },

    #[error("Failed to fetch layer: {message}")]
    LayerFetchFailed { message: String },

    #[error("OCI push failed: {message}")]
    OciPushFailed { message: String },

    #[error("Repository {name} does not accept pushes")]
    PushUnsupported { name: String },

    // ============ Local Errors ============
    #[error(transparent)]
    Archive(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Diagnostics shown to the user for this error
    pub fn into_diagnostics(self) -> Diagnostics {
        let diag = match self {
            RepoError::InvalidConfig { diagnostics } => return diagnostics,
            RepoError::RepositoryNotFound { name } => Diagnostic::error(
                "Repository doesn't exist",
                format!(
                    "{} doesn't exist please add or use other repo name.\n In order to see the repositories please use kubehcl repo list",
                    name
                ),
            ),
            RepoError::RepositoryAlreadyExists { name, range } => Diagnostic::error(
                "Repository already exists",
                format!("Repository {} already exists", name),
            )
            .with_subject(&range),
            RepoError::InvalidRepositoryUrl { url, reason } => Diagnostic::error(
                "Couldn't parse url",
                format!("Url {} can't be parsed, err: {}", url, reason),
            ),
            RepoError::MissingProtocol { url } => Diagnostic::error(
                "No protocol",
                format!(
                    "Url {} doesn't contain protocol, please add protocol like https:// or oci://",
                    url
                ),
            ),
            RepoError::InvalidProtocol { message } => {
                Diagnostic::error("Protocol is invalid", message)
            }
            RepoError::VersionRequired { name } => Diagnostic::error(
                "Https repo must include version",
                format!(
                    "repository {} uses protocol https packages have version, please add --version",
                    name
                ),
            ),
            RepoError::HttpError { status, url } => Diagnostic::error(
                "Request failed",
                format!("Status code is {} for {}", status, url),
            ),
            e @ (RepoError::NetworkError { .. } | RepoError::Timeout { .. }) => {
                Diagnostic::error("Request failed", e.to_string())
            }
            RepoError::Certificate { message } => {
                Diagnostic::error("Couldn't load certificate", message)
            }
            RepoError::CaCertificate { message } => {
                Diagnostic::error("Couldn't load CA certificate", message)
            }
            RepoError::AuthFailed { message } => Diagnostic::error("Couldn't authenticate", message),
            RepoError::InvalidIndex { message } => {
                Diagnostic::error("Yaml is invalid", format!("{} \nis invalid", message))
            }
            e @ (RepoError::ModuleNotFound { .. } | RepoError::VersionNotFound { .. }) => {
                Diagnostic::error(
                    "Couldn't download module",
                    format!("Module couldn't be downloaded, error: {}", e),
                )
            }
            RepoError::InvalidOciReference { reference } => Diagnostic::error(
                "Couldn't create repository",
                format!("Repository reference {} is invalid", reference),
            ),
            e @ RepoError::OciPullFailed { .. } => {
                Diagnostic::error("Couldn't pull module", e.to_string())
            }
            e @ RepoError::LayerCount { .. } => Diagnostic::error(
                "Too many layers to the manifest expecting only 1",
                e.to_string(),
            ),
            RepoError::UnexpectedMediaType { media_type } => Diagnostic::error(
                "Unexpected layer media type",
                format!(
                    "Layer has media type {} expecting {}",
                    media_type,
                    crate::oci::LAYER_MEDIA_TYPE
                ),
            ),
            RepoError::LayerFetchFailed { message } => {
                Diagnostic::error("Failed to fetch layer manifest", message)
            }
            RepoError::OciPushFailed { message } => Diagnostic::error(
                "Couldn't push data to the repository",
                format!("Failed to push data , error: {}", message),
            ),
            RepoError::PushUnsupported { name } => Diagnostic::error(
                "Push is only supported for oci repositories",
                format!("Repository {} is not an oci repository", name),
            ),
            RepoError::Archive(e) => Diagnostic::from_error("Module archive is invalid", &e),
            RepoError::Io(e) => Diagnostic::from_error("File operation failed", &e),
        };
        let mut diags = Diagnostics::new();
        diags.push(diag);
        diags
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::InvalidIndex {
            message: e.to_string(),
        }
    }
}
