//! Repository index (`index.yaml`) parsing

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RepoError, Result};

pub const INDEX_YAML: &str = "index.yaml";

/// `entries` of an HTTP repository index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<IndexEntry>>,
}

/// One published version of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl RepositoryIndex {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }

    /// First download URL of `name` at exactly `version`
    pub fn find(&self, name: &str, version: &str) -> Result<&str> {
        let versions = self
            .entries
            .get(name)
            .ok_or_else(|| RepoError::ModuleNotFound {
                name: name.to_string(),
            })?;
        versions
            .iter()
            .find(|e| e.version == version)
            .and_then(|e| e.urls.first())
            .map(String::as_str)
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
apiVersion: v1
entries:
  web:
    - version: 1.0.0
      urls:
        - web-1.0.0.tgz
    - version: 1.1.0
      urls: []
    - version: 2.0.0
      urls:
        - https://mirror.example.com/web-2.0.0.tgz
        - https://other.example.com/web-2.0.0.tgz
"#;

    #[test]
    fn test_find_version() {
        let index = RepositoryIndex::from_bytes(INDEX.as_bytes()).unwrap();
        assert_eq!(index.find("web", "1.0.0").unwrap(), "web-1.0.0.tgz");
        assert_eq!(
            index.find("web", "2.0.0").unwrap(),
            "https://mirror.example.com/web-2.0.0.tgz"
        );
    }

    #[test]
    fn test_lookup_failures() {
        let index = RepositoryIndex::from_bytes(INDEX.as_bytes()).unwrap();
        assert_eq!(
            index.find("db", "1.0.0").unwrap_err().to_string(),
            "No module named db"
        );
        // A version without download URLs is not installable
        assert_eq!(
            index.find("web", "1.1.0").unwrap_err().to_string(),
            "No matching version 1.1.0"
        );
    }

    #[test]
    fn test_malformed_index() {
        let err = RepositoryIndex::from_bytes(b"entries: [not, a, map]").unwrap_err();
        assert!(matches!(err, RepoError::InvalidIndex { .. }));
    }
}
