//! kubehcl Kube - Kubernetes integration for kubehcl
//!
//! This crate provides:
//! - **Cluster Client**: the `ClusterClient` seam, a kube-rs implementation and an in-memory mock
//! - **Storage**: release state persisted in Secrets, with rotated history
//! - **Reconciler**: install, plan, uninstall and list over a decoded graph
//! - **Validation**: built-in JSON schemas checked before anything is applied
//! - **Diff**: unified YAML diffs for `plan`
//! - **Progress**: keep-alive lines while resources converge

pub mod client;
pub mod diff;
pub mod error;
pub mod mock;
pub mod patch;
pub mod progress;
pub mod reconcile;
pub mod release;
pub mod resource;
pub mod storage;
pub mod validate;

pub use client::{ClusterClient, ConnectionSettings, DEFAULT_TIMEOUT, KubeClusterClient};
pub use diff::{ChangeType, PlanResult, ResourceChange};
pub use error::{KubeError, Result};
pub use mock::{ClusterOperationCounts, MockClusterClient};
pub use progress::ProgressReporter;
pub use reconcile::{
    PlanOutcome, Reconciler, ReleaseOutcome, ReleaseSummary, TemplateFormat, template,
};
pub use release::{ReleaseState, ResourceMap};
pub use resource::{ApplyResult, ObjectRef, ResourceInfo, ResourceList};
pub use storage::{
    DEFAULT_MAX_HISTORY, MockStorageDriver, OperationCounts, SecretsDriver, Storage,
    StorageConfig, StorageDriver,
};
pub use validate::{BuiltinSchemaValidator, SchemaValidator};
