//! Decoded module tree produced by the evaluator
//!
//! Modules are stored in an arena (`ModuleTree`) and referenced by
//! `ModuleId`, so the graph builder can hold plain indices instead of
//! borrowing into the tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::diagnostics::SourceRange;
use crate::value::Value;

/// Where release state is persisted between runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStorageKind {
    #[default]
    KubeSecret,
    Stateless,
}

impl BackendStorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStorageKind::KubeSecret => "kube_secret",
            BackendStorageKind::Stateless => "stateless",
        }
    }
}

impl fmt::Display for BackendStorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendStorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kube_secret" => Ok(BackendStorageKind::KubeSecret),
            "stateless" => Ok(BackendStorageKind::Stateless),
            other => Err(format!("unknown storage kind: {}", other)),
        }
    }
}

/// Target kind of a `depends_on` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Resource,
    Module,
}

/// One `depends_on` entry, resolved relative to `scope`
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyRef {
    pub kind: DependencyKind,
    pub name: String,
    /// Module instance path of the module where the entry was written
    pub scope: Vec<String>,
    pub range: SourceRange,
}

impl DependencyRef {
    pub fn depth(&self) -> usize {
        self.scope.len()
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DependencyKind::Resource => "kube_resource",
            DependencyKind::Module => "module",
        };
        write!(f, "{}{}.{}", render_path(&self.scope), kind, self.name)
    }
}

/// `module.a.module.b[k].` prefix for a module instance path
pub fn render_path(path: &[String]) -> String {
    path.iter().map(|m| format!("module.{}.", m)).collect()
}

/// A resource with every instance fully evaluated
#[derive(Debug, Clone)]
pub struct DecodedResource {
    /// Declared name (`web` for `kube_resource "web"`)
    pub name: String,
    /// Module instance path from the root, e.g. `["test[s1]"]`
    pub module_path: Vec<String>,
    /// Instance FQN → evaluated object
    pub config: BTreeMap<String, Value>,
    /// Own `depends_on` plus those inherited from enclosing module calls
    pub depends_on: Vec<DependencyRef>,
    pub range: SourceRange,
}

impl DecodedResource {
    pub fn depth(&self) -> usize {
        self.module_path.len()
    }

    /// `module.a.kube_resource.web`
    pub fn fqn(&self) -> String {
        format!("{}kube_resource.{}", render_path(&self.module_path), self.name)
    }
}

/// Stable index of a module in the [`ModuleTree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

#[derive(Debug, Clone, Default)]
pub struct DecodedModule {
    /// Instance name (`test[s1]`), empty for the root
    pub name: String,
    pub depth: usize,
    pub parent: Option<ModuleId>,
    /// Instance path from the root
    pub path: Vec<String>,
    pub variables: BTreeMap<String, Value>,
    pub locals: BTreeMap<String, Value>,
    pub annotations: BTreeMap<String, String>,
    pub resources: Vec<DecodedResource>,
    /// Child modules in call order
    pub children: Vec<ModuleId>,
    /// `depends_on` declared on the call that produced this module
    pub depends_on: Vec<DependencyRef>,
    pub backend_storage: BackendStorageKind,
}

/// Arena of decoded modules; index 0 is the root
#[derive(Debug, Clone, Default)]
pub struct ModuleTree {
    modules: Vec<DecodedModule>,
}

impl ModuleTree {
    pub fn new(root: DecodedModule) -> Self {
        Self {
            modules: vec![root],
        }
    }

    pub fn root_id(&self) -> ModuleId {
        ModuleId(0)
    }

    pub fn root(&self) -> &DecodedModule {
        &self.modules[0]
    }

    pub fn get(&self, id: ModuleId) -> Option<&DecodedModule> {
        self.modules.get(id.0)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut DecodedModule> {
        self.modules.get_mut(id.0)
    }

    /// Append `module` as the last child of `parent`
    pub fn add_child(&mut self, parent: ModuleId, mut module: DecodedModule) -> ModuleId {
        let id = ModuleId(self.modules.len());
        module.parent = Some(parent);
        self.modules.push(module);
        if let Some(p) = self.modules.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &DecodedModule)> {
        self.modules.iter().enumerate().map(|(i, m)| (ModuleId(i), m))
    }

    /// Every resource in the tree, depth-first in call order
    pub fn resources(&self) -> Vec<&DecodedResource> {
        let mut out = Vec::new();
        self.collect_resources(self.root_id(), &mut out);
        out
    }

    fn collect_resources<'a>(&'a self, id: ModuleId, out: &mut Vec<&'a DecodedResource>) {
        if let Some(module) = self.get(id) {
            out.extend(module.resources.iter());
            for child in &module.children {
                self.collect_resources(*child, out);
            }
        }
    }

    /// Every instance config in the tree keyed by instance FQN
    pub fn all_instances(&self) -> BTreeMap<String, &Value> {
        self.resources()
            .into_iter()
            .flat_map(|r| r.config.iter().map(|(k, v)| (k.clone(), v)))
            .collect()
    }

    /// Modules enclosing `id`, outermost first, excluding the root
    pub fn ancestors(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            let Some(module) = self.get(cid) else { break };
            if module.parent.is_some() {
                chain.push(cid);
            }
            current = module.parent;
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, path: &[&str]) -> DecodedResource {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        let fqn = format!("{}kube_resource.{}", render_path(&path), name);
        DecodedResource {
            name: name.to_string(),
            module_path: path,
            config: BTreeMap::from([(fqn, Value::empty_object())]),
            depends_on: Vec::new(),
            range: SourceRange::default(),
        }
    }

    #[test]
    fn test_fqn_includes_module_path() {
        let r = resource("web", &["test[s1]", "inner"]);
        assert_eq!(r.fqn(), "module.test[s1].module.inner.kube_resource.web");
        assert_eq!(r.depth(), 2);
    }

    #[test]
    fn test_tree_children_keep_call_order() {
        let mut tree = ModuleTree::new(DecodedModule::default());
        let root = tree.root_id();
        let a = tree.add_child(
            root,
            DecodedModule {
                name: "a".into(),
                depth: 1,
                path: vec!["a".into()],
                resources: vec![resource("x", &["a"])],
                ..Default::default()
            },
        );
        let b = tree.add_child(
            root,
            DecodedModule {
                name: "b".into(),
                depth: 1,
                path: vec!["b".into()],
                ..Default::default()
            },
        );
        assert_eq!(tree.root().children, vec![a, b]);
        assert_eq!(tree.get(a).unwrap().parent, Some(root));
        assert_eq!(tree.ancestors(a), vec![a]);
        assert_eq!(tree.resources().len(), 1);
        assert!(tree.all_instances().contains_key("module.a.kube_resource.x"));
    }

    #[test]
    fn test_storage_kind_parse() {
        assert_eq!(
            "stateless".parse::<BackendStorageKind>().unwrap(),
            BackendStorageKind::Stateless
        );
        assert!("s3".parse::<BackendStorageKind>().is_err());
        assert_eq!(BackendStorageKind::default().to_string(), "kube_secret");
    }
}
