//! CLI error type with exit code mapping

use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Diagnostics were printed already; only the count is reported
    #[error("{errors} error(s) reported")]
    #[diagnostic(code(kubehcl::cli::invalid))]
    Invalid { errors: usize },

    /// A repository or network operation failed, diagnostics printed
    #[error("operation failed with {errors} error(s)")]
    #[diagnostic(code(kubehcl::cli::failed))]
    Failed { errors: usize },

    /// Arguments the parser accepted but that make no sense together
    #[error("{message}")]
    #[diagnostic(code(kubehcl::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Kubernetes error: {message}")]
    #[diagnostic(code(kubehcl::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("IO error: {message}")]
    #[diagnostic(code(kubehcl::cli::io))]
    Io { message: String },

    #[error("Internal error: {message}")]
    #[diagnostic(code(kubehcl::cli::internal))]
    Internal { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Invalid { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Failed { .. } => exit_codes::ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Cluster { .. } => exit_codes::ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn invalid(errors: usize) -> Self {
        Self::Invalid { errors }
    }

    pub fn failed(errors: usize) -> Self {
        Self::Failed { errors }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: None,
        }
    }

    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn cluster(err: impl std::fmt::Display) -> Self {
        Self::Cluster {
            message: err.to_string(),
            help: Some(
                "Check --kubeconfig / --kube-context or the KUBEHCL_KUBE* environment".to_string(),
            ),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<kubehcl_kube::KubeError> for CliError {
    fn from(err: kubehcl_kube::KubeError) -> Self {
        CliError::cluster(err)
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::invalid(3).exit_code(), exit_codes::VALIDATION_ERROR);
        assert_eq!(CliError::failed(1).exit_code(), exit_codes::ERROR);
        assert_eq!(CliError::usage("bad").exit_code(), exit_codes::USAGE_ERROR);
        assert_eq!(CliError::internal("boom").exit_code(), exit_codes::ERROR);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(CliError::from(io).exit_code(), exit_codes::IO_ERROR);
    }

    #[test]
    fn test_invalid_message() {
        assert_eq!(CliError::invalid(2).to_string(), "2 error(s) reported");
    }
}
