//! Addresses of referenceable configuration objects

use std::collections::HashMap;
use std::fmt;

use crate::diagnostics::SourceRange;

/// The kind of object an address names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddrKind {
    Resource,
    Module,
    Variable,
    Local,
    Annotation,
}

impl AddrKind {
    /// Prefix used when rendering the address
    pub fn prefix(&self) -> &'static str {
        match self {
            AddrKind::Resource => "kube_resource",
            AddrKind::Module => "module",
            AddrKind::Variable => "var",
            AddrKind::Local => "local",
            AddrKind::Annotation => "default_annotation",
        }
    }
}

/// `kind.name`, e.g. `kube_resource.web` or `module.db`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub kind: AddrKind,
    pub name: String,
}

impl Address {
    pub fn new(kind: AddrKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Self::new(AddrKind::Resource, name)
    }

    pub fn module(name: impl Into<String>) -> Self {
        Self::new(AddrKind::Module, name)
    }

    /// Address of one instance: `kube_resource.web[1]`
    pub fn instance(&self, key: &str) -> String {
        format!("{}[{}]", self, key)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.prefix(), self.name)
    }
}

/// Per-module registry rejecting duplicate addresses
#[derive(Debug, Default)]
pub struct AddressMap {
    declared: HashMap<Address, SourceRange>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addr`; on conflict returns the range of the earlier declaration
    pub fn insert(&mut self, addr: Address, range: &SourceRange) -> Result<(), SourceRange> {
        if let Some(previous) = self.declared.get(&addr) {
            return Err(previous.clone());
        }
        self.declared.insert(addr, range.clone());
        Ok(())
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.declared.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}
