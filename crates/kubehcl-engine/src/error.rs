//! Engine error types

use kubehcl_core::Diagnostics;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The configuration produced error diagnostics
    #[error("configuration is invalid ({} error(s))", .0.errors().count())]
    Invalid(Diagnostics),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Every diagnostic carried by the error, warnings included
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            EngineError::Invalid(diags) => Some(diags),
            EngineError::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
