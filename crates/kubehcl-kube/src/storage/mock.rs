//! Mock storage driver for testing
//!
//! Keeps release states in memory, useful for unit tests without a cluster.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::StorageDriver;
use crate::error::Result;
use crate::release::ReleaseState;

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MockStorageDriver {
    /// (namespace, name) → state
    store: Arc<Mutex<BTreeMap<(String, String), ReleaseState>>>,
    operations: Arc<Mutex<OperationCounts>>,
}

/// Counts of driver calls for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub puts: usize,
    pub deletes: usize,
    pub lists: usize,
}

impl MockStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_counts(&self) -> OperationCounts {
        lock(&self.operations).clone()
    }

    pub fn reset_counts(&self) {
        *lock(&self.operations) = OperationCounts::default();
    }

    /// Stored state without counting a read
    pub fn state(&self, namespace: &str, name: &str) -> Option<ReleaseState> {
        lock(&self.store)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn release_count(&self) -> usize {
        lock(&self.store).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StorageDriver for MockStorageDriver {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ReleaseState>> {
        lock(&self.operations).gets += 1;
        Ok(self.state(namespace, name))
    }

    async fn put(&self, state: &ReleaseState) -> Result<()> {
        lock(&self.operations).puts += 1;
        lock(&self.store).insert(
            (state.namespace.clone(), state.name.clone()),
            state.clone(),
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        lock(&self.operations).deletes += 1;
        Ok(lock(&self.store)
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<ReleaseState>> {
        lock(&self.operations).lists += 1;
        Ok(lock(&self.store)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, state)| state.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_core::BackendStorageKind;

    #[tokio::test]
    async fn test_put_get_delete() {
        let driver = MockStorageDriver::new();
        let state = ReleaseState::new("alpha", "default", BackendStorageKind::KubeSecret);
        driver.put(&state).await.unwrap();

        assert_eq!(driver.get("default", "alpha").await.unwrap(), Some(state));
        assert_eq!(driver.get("other", "alpha").await.unwrap(), None);
        assert_eq!(driver.list("default").await.unwrap().len(), 1);

        assert!(driver.delete("default", "alpha").await.unwrap());
        assert!(!driver.delete("default", "alpha").await.unwrap());
        assert_eq!(driver.release_count(), 0);

        let counts = driver.operation_counts();
        assert_eq!(counts.gets, 2);
        assert_eq!(counts.deletes, 2);
    }
}
