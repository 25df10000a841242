//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("File access error for '{path}': {message}")]
    FileAccess { path: String, message: String },

    #[error("Value conversion error: {message}")]
    Conversion { message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
