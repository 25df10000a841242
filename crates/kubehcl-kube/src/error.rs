//! Error types for kubehcl-kube

use kubehcl_core::Diagnostic;
use thiserror::Error;

/// Result type for kubehcl-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to the cluster or persisting state
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Kubeconfig could not be loaded or applied
    #[error("invalid kube configuration: {0}")]
    Config(String),

    /// Object does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Release state missing from the namespace
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Object exists on the cluster but not in the release state
    #[error("Kind: {kind},\nResource: {name}")]
    ResourceUnmanaged { kind: String, name: String },

    /// apiVersion/kind pair unknown to the cluster
    #[error("unknown resource type: {api_version}/{kind}")]
    UnknownKind { api_version: String, kind: String },

    /// Manifest is missing required fields
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Persisted state is unreadable
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation timed out after {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubeError {
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound(_) | KubeError::ReleaseNotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Error diagnostic with `summary`, detail taken from the error
    pub fn to_diagnostic(&self, summary: impl Into<String>) -> Diagnostic {
        Diagnostic::from_error(summary, self)
    }
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<kube::config::KubeconfigError> for KubeError {
    fn from(e: kube::config::KubeconfigError) -> Self {
        KubeError::Config(e.to_string())
    }
}

impl From<kube::config::InferConfigError> for KubeError {
    fn from(e: kube::config::InferConfigError) -> Self {
        KubeError::Config(e.to_string())
    }
}
