//! Block decoders for module files
//!
//! Each decoder turns the syntax of one block type into a typed record whose
//! expressions are still unevaluated. Problems are accumulated into
//! [`Diagnostics`] so that one load reports every malformed block.

mod backend;
mod deployable;
mod locals;
pub mod repo;
mod variable;

use std::collections::BTreeMap;
use std::path::PathBuf;

use kubehcl_core::{AddressMap, Diagnostic, Diagnostics, Value};
use kubehcl_syntax::{Block, Body, Expr};

pub use backend::{BackendStorage, decode_backend_blocks};
pub use deployable::{
    DependsOn, Deployable, DeployableKind, ModuleCall, decode_module_blocks,
    decode_resource_blocks,
};
pub use locals::{NamedExpr, decode_annotation_blocks, decode_locals_blocks};
pub use repo::{DEFAULT_REPO_TIMEOUT, Protocol, RepoRecord, decode_repo_file};
pub use variable::{Variable, decode_variable_blocks, parse_type_expr};

use crate::suggestions::{TOP_LEVEL_BLOCKS, did_you_mean};

/// Extension of module source files
pub const SOURCE_EXTENSION: &str = "hcl";

/// The merged syntactic content of one module folder
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Name of the call that loaded this module, empty for the root
    pub name: String,
    /// Folder the module was read from
    pub dir: PathBuf,
    pub variables: BTreeMap<String, Variable>,
    pub locals: Vec<NamedExpr>,
    pub annotations: Vec<NamedExpr>,
    pub resources: Vec<Deployable>,
    pub module_calls: Vec<ModuleCall>,
    pub backend: Option<BackendStorage>,
}

impl Module {
    /// Fold the blocks of another file of the same folder into this module
    ///
    /// Address uniqueness across files is checked while decoding, so this
    /// only concatenates.
    pub fn merge(&mut self, other: Module) {
        self.variables.extend(other.variables);
        self.locals.extend(other.locals);
        self.annotations.extend(other.annotations);
        self.resources.extend(other.resources);
        self.module_calls.extend(other.module_calls);
        if self.backend.is_none() {
            self.backend = other.backend;
        }
    }
}

/// Decode the top level of one module file
///
/// `addrs` is shared by every file of the folder. `backend_blocks` counts
/// `backend_storage` blocks seen so far in the folder.
pub fn decode_body(
    body: &Body,
    addrs: &mut AddressMap,
    backend_blocks: &mut usize,
    diags: &mut Diagnostics,
) -> Module {
    for attr in &body.attributes {
        diags.error(
            "Unsupported argument",
            format!("An argument named {:?} is not expected here.", attr.name),
            &attr.name_range,
        );
    }
    for block in &body.blocks {
        let kind = block.kind.as_str();
        if !TOP_LEVEL_BLOCKS.contains(&kind) {
            diags.error(
                "Unsupported block type",
                format!(
                    "Blocks of type {:?} are not expected here.{}",
                    kind,
                    did_you_mean(kind, TOP_LEVEL_BLOCKS.iter().copied())
                ),
                &block.type_range,
            );
        }
    }

    let variables = decode_variable_blocks(body.blocks_of("variable"), addrs, diags);
    let locals = decode_locals_blocks(body.blocks_of("locals"), addrs, diags);
    let annotations = decode_annotation_blocks(body.blocks_of("default_annotations"), addrs, diags);
    let resources = decode_resource_blocks(
        body.blocks
            .iter()
            .filter(|b| b.kind == "kube_resource" || b.kind == "resource"),
        addrs,
        diags,
    );
    let module_calls = decode_module_blocks(body.blocks_of("module"), addrs, diags);
    let backend = decode_backend_blocks(body.blocks_of("backend_storage"), backend_blocks, diags);

    Module {
        variables,
        locals,
        annotations,
        resources,
        module_calls,
        backend,
        ..Default::default()
    }
}

/// Value of an expression that may not reference anything, such as `source`
pub(crate) fn constant_string(expr: &Expr, what: &str) -> Result<String, Diagnostic> {
    match expr.static_value() {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(Diagnostic::error(
            format!("{} must be string", what),
            format!("Required string and you entered type {}", other.type_name()),
        )
        .with_subject(&expr.range)),
        None => Err(Diagnostic::error(
            "Variables not allowed",
            format!("Variables may not be used in {}.", what.to_lowercase()),
        )
        .with_subject(&expr.range)),
    }
}

/// The single name label of `block`, reporting a diagnostic when absent
pub(crate) fn single_label<'a>(block: &'a Block, diags: &mut Diagnostics) -> Option<&'a str> {
    match block.labels.as_slice() {
        [name] => Some(name.as_str()),
        [] => {
            diags.error(
                format!("Missing name for {}", block.kind),
                format!("All {} blocks must have 1 labels (name).", block.kind),
                &block.type_range,
            );
            None
        }
        [name, ..] => {
            let extra = &block.label_ranges[1..];
            let range = match (extra.first(), extra.last()) {
                (Some(first), Some(last)) => first.to(last),
                _ => block.header_range(),
            };
            diags.error(
                format!("Extraneous label for {}", block.kind),
                format!("Only 1 labels (name) are expected for {} blocks.", block.kind),
                &range,
            );
            Some(name.as_str())
        }
    }
}

/// Report labels on a block type that takes none
pub(crate) fn no_labels(block: &Block, diags: &mut Diagnostics) {
    if let (Some(first), Some(last)) = (block.label_ranges.first(), block.label_ranges.last()) {
        diags.error(
            format!("Extraneous label for {}", block.kind),
            format!("No labels are expected for {} blocks.", block.kind),
            &first.to(last),
        );
    }
}

/// Report nested blocks inside a body that only takes attributes
pub(crate) fn just_attributes(body: &Body, diags: &mut Diagnostics) {
    for block in &body.blocks {
        diags.error(
            "Unexpected block",
            format!(
                "Blocks are not allowed here; {:?} must be an argument, not a block.",
                block.kind
            ),
            &block.type_range,
        );
    }
}

/// Report attributes of `body` outside `allowed`
pub(crate) fn allowed_attributes(body: &Body, allowed: &[&str], diags: &mut Diagnostics) {
    for attr in &body.attributes {
        if !allowed.contains(&attr.name.as_str()) {
            diags.error(
                "Unsupported argument",
                format!(
                    "An argument named {:?} is not expected here.{}",
                    attr.name,
                    did_you_mean(&attr.name, allowed.iter().copied())
                ),
                &attr.name_range,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_syntax::parse_file;

    fn decode(src: &str) -> (Module, Diagnostics) {
        let (body, mut diags) = parse_file(src, "main.hcl");
        assert!(!diags.has_errors(), "{:?}", diags);
        let mut addrs = AddressMap::new();
        let mut backends = 0;
        let module = decode_body(&body, &mut addrs, &mut backends, &mut diags);
        (module, diags)
    }

    #[test]
    fn test_decode_all_block_types() {
        let (module, diags) = decode(
            r#"
variable "replicas" {
  type    = number
  default = 2
}

locals {
  app = "web"
}

default_annotations {
  team = "platform"
}

kube_resource "ns" {
  apiVersion = "v1"
  kind       = "Namespace"
}

module "db" {
  source = "./db"
  size   = 3
}

backend_storage {
  stateless {}
}
"#,
        );
        assert!(!diags.has_errors(), "{:?}", diags);
        assert!(module.variables.contains_key("replicas"));
        assert_eq!(module.locals.len(), 1);
        assert_eq!(module.annotations.len(), 1);
        assert_eq!(module.resources.len(), 1);
        assert_eq!(module.module_calls[0].source, "./db");
        assert!(module.backend.is_some());
    }

    #[test]
    fn test_unknown_block_suggests() {
        let (_, diags) = decode("kube_resorce \"x\" {}\n");
        let err = diags.errors().next().unwrap();
        assert_eq!(err.summary, "Unsupported block type");
        assert!(err.detail.contains("Did you mean \"kube_resource\"?"));
    }

    #[test]
    fn test_top_level_attribute_rejected() {
        let (_, diags) = decode("x = 1\n");
        assert_eq!(diags.errors().next().unwrap().summary, "Unsupported argument");
    }

    #[test]
    fn test_merge_concatenates() {
        let (mut a, _) = decode("locals {\n  a = 1\n}\n");
        let (b, _) = decode("locals {\n  b = 2\n}\n");
        a.merge(b);
        assert_eq!(a.locals.len(), 2);
    }
}
