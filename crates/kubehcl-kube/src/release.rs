//! Persisted release state
//!
//! A release is stored as three keys: `release` holds the resources of the
//! last apply, `previous-releases` the rotated history and `storage-kind`
//! the backend the release was applied with. Resource maps are JSON objects
//! from instance name to the base64 of the resource's canonical JSON.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use kubehcl_core::BackendStorageKind;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::{KubeError, Result};

pub const RELEASE_KEY: &str = "release";
pub const PREVIOUS_RELEASES_KEY: &str = "previous-releases";
pub const STORAGE_KIND_KEY: &str = "storage-kind";

/// Name prefix of the object holding a release
pub const STATE_NAME_PREFIX: &str = "kubehcl.";

/// Instance name → canonical JSON bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMap(pub BTreeMap<String, Vec<u8>>);

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl Serialize for ResourceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&String, String> =
            self.0.iter().map(|(k, v)| (k, STANDARD.encode(v))).collect();
        encoded.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResourceMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| STANDARD.decode(v).map(|bytes| (k, bytes)))
            .collect::<std::result::Result<_, _>>()
            .map(ResourceMap)
            .map_err(D::Error::custom)
    }
}

impl FromIterator<(String, Vec<u8>)> for ResourceMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Everything persisted for one `(namespace, name)` release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseState {
    pub name: String,
    pub namespace: String,
    pub release: ResourceMap,
    /// `release-<n>` → resources of an earlier apply
    pub previous_releases: BTreeMap<String, ResourceMap>,
    /// `None` when the stored value is missing or unknown
    pub storage_kind: Option<BackendStorageKind>,
    /// Version of the stored object, used for optimistic concurrency
    pub resource_version: Option<String>,
}

impl ReleaseState {
    pub fn new(name: &str, namespace: &str, kind: BackendStorageKind) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            release: ResourceMap::new(),
            previous_releases: BTreeMap::new(),
            storage_kind: Some(kind),
            resource_version: None,
        }
    }

    pub fn state_name(&self) -> String {
        state_name(&self.name)
    }

    /// Make `next` the current release, moving the current one into the
    /// history and dropping the oldest entries beyond `max_history`
    pub fn rotate(&mut self, next: ResourceMap, max_history: usize) {
        let previous = std::mem::replace(&mut self.release, next);
        if !previous.is_empty() {
            let index = self
                .history_indices()
                .last()
                .map(|(i, _)| i + 1)
                .unwrap_or(0);
            self.previous_releases
                .insert(format!("release-{index}"), previous);
        }
        let indices = self.history_indices();
        let excess = indices.len().saturating_sub(max_history);
        for (_, key) in indices.into_iter().take(excess) {
            self.previous_releases.remove(&key);
        }
    }

    /// History keys ordered by their numeric suffix
    fn history_indices(&self) -> Vec<(u64, String)> {
        let mut indices: Vec<(u64, String)> = self
            .previous_releases
            .keys()
            .filter_map(|k| {
                k.strip_prefix("release-")
                    .and_then(|n| n.parse().ok())
                    .map(|n| (n, k.clone()))
            })
            .collect();
        indices.sort();
        indices
    }

    /// Encode into the three stored keys
    pub fn to_data(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let kind = self.storage_kind.map(|k| k.as_str()).unwrap_or_default();
        Ok(BTreeMap::from([
            (RELEASE_KEY.to_string(), serde_json::to_vec(&self.release)?),
            (
                PREVIOUS_RELEASES_KEY.to_string(),
                serde_json::to_vec(&self.previous_releases)?,
            ),
            (STORAGE_KIND_KEY.to_string(), kind.as_bytes().to_vec()),
        ]))
    }

    pub fn from_data(name: &str, namespace: &str, data: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let decode = |key: &str| -> Result<Option<&[u8]>> {
            Ok(data.get(key).map(Vec::as_slice).filter(|b| !b.is_empty()))
        };
        let release = match decode(RELEASE_KEY)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| KubeError::Storage(format!("corrupt release data: {e}")))?,
            None => ResourceMap::new(),
        };
        let previous_releases = match decode(PREVIOUS_RELEASES_KEY)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| KubeError::Storage(format!("corrupt release history: {e}")))?,
            None => BTreeMap::new(),
        };
        let storage_kind = decode(STORAGE_KIND_KEY)?
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .and_then(|s| s.parse().ok());
        Ok(Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            release,
            previous_releases,
            storage_kind,
            resource_version: None,
        })
    }
}

/// `kubehcl.<release>`
pub fn state_name(release: &str) -> String {
    format!("{STATE_NAME_PREFIX}{release}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(keys: &[&str]) -> ResourceMap {
        keys.iter()
            .map(|k| (k.to_string(), format!("{{\"name\":\"{k}\"}}").into_bytes()))
            .collect()
    }

    #[test]
    fn test_data_layout() {
        let mut state = ReleaseState::new("alpha", "default", BackendStorageKind::KubeSecret);
        state.release = map(&["kube_resource.a"]);
        let data = state.to_data().unwrap();
        assert_eq!(data[STORAGE_KIND_KEY], b"kube_secret");
        let release: serde_json::Value = serde_json::from_slice(&data[RELEASE_KEY]).unwrap();
        assert_eq!(
            release["kube_resource.a"],
            STANDARD.encode(b"{\"name\":\"kube_resource.a\"}")
        );

        let decoded = ReleaseState::from_data("alpha", "default", &data).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.state_name(), "kubehcl.alpha");
    }

    #[test]
    fn test_rotation_skips_empty_and_caps_history() {
        let mut state = ReleaseState::new("alpha", "default", BackendStorageKind::KubeSecret);
        state.rotate(map(&["a", "b", "c"]), 2);
        assert!(state.previous_releases.is_empty());

        state.rotate(map(&["a", "b"]), 2);
        assert_eq!(state.previous_releases["release-0"], map(&["a", "b", "c"]));

        state.rotate(map(&["a"]), 2);
        state.rotate(map(&[]), 2);
        let keys: Vec<&String> = state.previous_releases.keys().collect();
        assert_eq!(keys, vec!["release-1", "release-2"]);
        assert_eq!(state.previous_releases["release-2"], map(&["a"]));
    }

    #[test]
    fn test_history_orders_numerically() {
        let mut state = ReleaseState::new("alpha", "default", BackendStorageKind::KubeSecret);
        for i in 0..12 {
            state.rotate(map(&[&format!("r{i}")]), 10);
        }
        assert_eq!(state.previous_releases.len(), 10);
        assert!(state.previous_releases.contains_key("release-10"));
        assert!(!state.previous_releases.contains_key("release-0"));
    }

    #[test]
    fn test_unknown_storage_kind_is_none() {
        let data = BTreeMap::from([(STORAGE_KIND_KEY.to_string(), b"floppy".to_vec())]);
        let state = ReleaseState::from_data("alpha", "default", &data).unwrap();
        assert_eq!(state.storage_kind, None);
        assert!(state.release.is_empty());
    }
}
