//! `kube_resource` and `module` blocks
//!
//! Both share the meta-arguments `count`, `for_each` and `depends_on`; the
//! rest of the body is kept as syntax and evaluated once per instance.

use kubehcl_core::{Address, AddressMap, DependencyKind, Diagnostic, Diagnostics, SourceRange};
use kubehcl_syntax::{Attribute, Block, Body, Expr, ExprKind, TraversalStep};

use super::{constant_string, single_label};

const RESOURCE_META: &[&str] = &["count", "for_each", "depends_on"];
const MODULE_META: &[&str] = &["count", "for_each", "depends_on", "source", "version"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployableKind {
    Resource,
    Module,
}

/// One entry of a `depends_on` list, e.g. `module.db`
#[derive(Debug, Clone, PartialEq)]
pub struct DependsOn {
    pub kind: DependencyKind,
    pub name: String,
    pub range: SourceRange,
}

#[derive(Debug, Clone)]
pub struct Deployable {
    pub name: String,
    pub kind: DeployableKind,
    pub count: Option<Expr>,
    pub for_each: Option<Expr>,
    pub depends_on: Vec<DependsOn>,
    /// The body without meta-arguments
    pub body: Body,
    pub decl_range: SourceRange,
}

impl Deployable {
    pub fn address(&self) -> Address {
        match self.kind {
            DeployableKind::Resource => Address::resource(self.name.clone()),
            DeployableKind::Module => Address::module(self.name.clone()),
        }
    }
}

/// A `module "name" { source = ... }` call
#[derive(Debug, Clone)]
pub struct ModuleCall {
    pub deployable: Deployable,
    pub source: String,
    pub source_range: SourceRange,
    /// Version requested from an HTTP repository
    pub version: Option<String>,
}

impl ModuleCall {
    pub fn name(&self) -> &str {
        &self.deployable.name
    }

    /// Attributes assigning the called module's variables
    pub fn inputs(&self) -> &[Attribute] {
        &self.deployable.body.attributes
    }
}

pub fn decode_resource_blocks<'a>(
    blocks: impl Iterator<Item = &'a Block>,
    addrs: &mut AddressMap,
    diags: &mut Diagnostics,
) -> Vec<Deployable> {
    let mut out = Vec::new();
    for block in blocks {
        let Some(name) = single_label(block, diags) else {
            continue;
        };
        let deployable = decode_deployable(block, name, DeployableKind::Resource, RESOURCE_META, diags);
        if addrs.insert(deployable.address(), &deployable.decl_range).is_err() {
            diags.error(
                "Resources must have different names",
                format!("Two resources have the same name: {}", name),
                &deployable.decl_range,
            );
            continue;
        }
        out.push(deployable);
    }
    out
}

pub fn decode_module_blocks<'a>(
    blocks: impl Iterator<Item = &'a Block>,
    addrs: &mut AddressMap,
    diags: &mut Diagnostics,
) -> Vec<ModuleCall> {
    let mut out = Vec::new();
    for block in blocks {
        let Some(name) = single_label(block, diags) else {
            continue;
        };
        let deployable = decode_deployable(block, name, DeployableKind::Module, MODULE_META, diags);
        if addrs.insert(deployable.address(), &deployable.decl_range).is_err() {
            diags.error(
                "Modules must have different names",
                format!("Two Modules have the same name: {}", name),
                &deployable.decl_range,
            );
            continue;
        }

        for nested in &deployable.body.blocks {
            diags.error(
                "Unsupported block type",
                format!("Blocks of type {:?} are not expected here.", nested.kind),
                &nested.type_range,
            );
        }

        let Some(source_attr) = block.body.attribute("source") else {
            diags.error(
                "Missing required argument",
                "The argument \"source\" is required, but no definition was found.",
                &deployable.decl_range,
            );
            continue;
        };
        let source = match constant_string(&source_attr.expr, "Source") {
            Ok(s) => s,
            Err(d) => {
                diags.push(d);
                continue;
            }
        };
        let version = block
            .body
            .attribute("version")
            .and_then(|attr| match constant_string(&attr.expr, "Version") {
                Ok(v) => Some(v),
                Err(d) => {
                    diags.push(d);
                    None
                }
            });

        out.push(ModuleCall {
            source_range: source_attr.expr.range.clone(),
            source,
            version,
            deployable,
        });
    }
    out
}

fn decode_deployable(
    block: &Block,
    name: &str,
    kind: DeployableKind,
    meta: &[&str],
    diags: &mut Diagnostics,
) -> Deployable {
    let attrs = &block.body;
    let mut count = attrs.attribute("count").map(|a| a.expr.clone());
    let mut for_each = attrs.attribute("for_each").map(|a| a.expr.clone());

    if let (Some(c), Some(f)) = (attrs.attribute("count"), attrs.attribute("for_each")) {
        diags.push(
            Diagnostic::error(
                "Invalid combination of \"count\" and \"for_each\"",
                "The \"count\" and \"for_each\" meta-arguments are mutually-exclusive, only one should be used to be explicit about the number of resources to be created.",
            )
            .with_subject(&f.name_range)
            .with_context(&c.name_range),
        );
        count = None;
        for_each = None;
    }

    let depends_on = attrs
        .attribute("depends_on")
        .map(|attr| decode_depends_on(&attr.expr, diags))
        .unwrap_or_default();

    let body = Body {
        attributes: attrs
            .attributes
            .iter()
            .filter(|a| !meta.contains(&a.name.as_str()))
            .cloned()
            .collect(),
        blocks: attrs.blocks.clone(),
        range: attrs.range.clone(),
    };

    Deployable {
        name: name.to_string(),
        kind,
        count,
        for_each,
        depends_on,
        body,
        decl_range: block.header_range(),
    }
}

fn decode_depends_on(expr: &Expr, diags: &mut Diagnostics) -> Vec<DependsOn> {
    let ExprKind::Tuple(items) = &expr.kind else {
        diags.error(
            "Invalid expression",
            "A static list expression is required.",
            &expr.range,
        );
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in items {
        let Some(steps) = item.traversal() else {
            diags.error(
                "Invalid reference",
                "A single static variable reference is required: only attribute access and indexing with constant keys. No calculations, function calls, template expressions, etc are allowed here.",
                &item.range,
            );
            continue;
        };
        if steps.len() < 2 {
            diags.error(
                "Invalid reference",
                "Depends on must have resource/module and the name of the module",
                &item.range,
            );
            continue;
        }
        let TraversalStep::Root(root) = &steps[0] else {
            continue;
        };
        let TraversalStep::Attr(name) = &steps[1] else {
            diags.error("Invalid address", "A resource name is required.", &item.range);
            continue;
        };
        let kind = match root.as_str() {
            "kube_resource" | "resource" => DependencyKind::Resource,
            "module" => DependencyKind::Module,
            other => {
                diags.error(
                    "This type is not supported",
                    format!("Allowed types are [kube_resource,module] got: {}", other),
                    &item.range,
                );
                continue;
            }
        };
        out.push(DependsOn {
            kind,
            name: name.clone(),
            range: item.range.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_syntax::parse_file;

    fn resources(src: &str) -> (Vec<Deployable>, Diagnostics) {
        let (body, mut diags) = parse_file(src, "r.hcl");
        let mut addrs = AddressMap::new();
        let out = decode_resource_blocks(body.blocks_of("kube_resource"), &mut addrs, &mut diags);
        (out, diags)
    }

    fn modules(src: &str) -> (Vec<ModuleCall>, Diagnostics) {
        let (body, mut diags) = parse_file(src, "m.hcl");
        let mut addrs = AddressMap::new();
        let out = decode_module_blocks(body.blocks_of("module"), &mut addrs, &mut diags);
        (out, diags)
    }

    #[test]
    fn test_meta_arguments_are_extracted() {
        let (out, diags) = resources(
            "kube_resource \"web\" {\n  count = 2\n  depends_on = [kube_resource.ns, module.db]\n  kind = \"Pod\"\n  metadata {\n    name = \"x\"\n  }\n}\n",
        );
        assert!(!diags.has_errors(), "{:?}", diags);
        let web = &out[0];
        assert!(web.count.is_some());
        assert!(web.for_each.is_none());
        assert_eq!(web.body.attributes.len(), 1);
        assert_eq!(web.body.blocks.len(), 1);
        assert_eq!(web.depends_on.len(), 2);
        assert_eq!(web.depends_on[0].kind, DependencyKind::Resource);
        assert_eq!(web.depends_on[1].name, "db");
    }

    #[test]
    fn test_count_and_for_each_are_exclusive() {
        let (_, diags) = resources("kube_resource \"a\" {\n  count = 1\n  for_each = {}\n}\n");
        let err = diags.errors().next().unwrap();
        assert_eq!(err.summary, "Invalid combination of \"count\" and \"for_each\"");
        assert!(err.context.is_some());
    }

    #[test]
    fn test_invalid_depends_on() {
        let (_, diags) = resources("kube_resource \"a\" {\n  depends_on = [ns]\n}\n");
        assert_eq!(diags.errors().next().unwrap().summary, "Invalid reference");

        let (_, diags) = resources("kube_resource \"a\" {\n  depends_on = [data.x]\n}\n");
        assert_eq!(
            diags.errors().next().unwrap().summary,
            "This type is not supported"
        );
    }

    #[test]
    fn test_duplicate_resources() {
        let (out, diags) = resources("kube_resource \"a\" {}\nkube_resource \"a\" {}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(
            diags.errors().next().unwrap().summary,
            "Resources must have different names"
        );
    }

    #[test]
    fn test_module_call() {
        let (out, diags) = modules(
            "module \"db\" {\n  source = \"./db\"\n  version = \"1.0.0\"\n  size = 3\n  depends_on = [module.net]\n}\n",
        );
        assert!(!diags.has_errors(), "{:?}", diags);
        let call = &out[0];
        assert_eq!(call.name(), "db");
        assert_eq!(call.source, "./db");
        assert_eq!(call.version.as_deref(), Some("1.0.0"));
        assert_eq!(call.inputs().len(), 1);
        assert_eq!(call.inputs()[0].name, "size");
    }

    #[test]
    fn test_module_requires_string_source() {
        let (out, diags) = modules("module \"db\" {}\n");
        assert!(out.is_empty());
        assert_eq!(
            diags.errors().next().unwrap().summary,
            "Missing required argument"
        );

        let (_, diags) = modules("module \"db\" {\n  source = 1\n}\n");
        assert_eq!(diags.errors().next().unwrap().summary, "Source must be string");
    }
}
