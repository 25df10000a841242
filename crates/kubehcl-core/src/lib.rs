//! kubehcl Core - shared types for the kubehcl deployment pipeline
//!
//! This crate provides the foundational types used throughout kubehcl:
//! - `Diagnostics`: accumulated errors and warnings tied to source ranges
//! - `Value`: the runtime value model produced by the evaluator
//! - `TypeConstraint`: variable type declarations and conversion
//! - `ModuleTree`: the decoded module arena consumed by the graph and reconciler
//! - `SourceFs`: the filesystem abstraction shared by local and pulled modules

pub mod addrs;
pub mod archive;
pub mod decoded;
pub mod diagnostics;
pub mod error;
pub mod types;
pub mod value;
pub mod vfs;

pub use addrs::{AddrKind, Address, AddressMap};
pub use decoded::{
    BackendStorageKind, DecodedModule, DecodedResource, DependencyKind, DependencyRef, ModuleId,
    ModuleTree,
};
pub use diagnostics::{Diagnostic, Diagnostics, Pos, Severity, SourceRange};
pub use error::{CoreError, Result};
pub use types::TypeConstraint;
pub use value::Value;
pub use vfs::{MemFs, OsFs, SourceFs};
