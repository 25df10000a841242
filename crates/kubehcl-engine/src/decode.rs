//! Evaluation of a loaded module tree
//!
//! Within one module the order is fixed: variables, locals in declaration
//! order, default annotations, then resources and module calls. Module calls
//! with `count` or `for_each` produce one decoded child per instance.

use std::collections::{BTreeMap, HashSet};

use kubehcl_core::decoded::render_path;
use kubehcl_core::{
    BackendStorageKind, DecodedModule, DecodedResource, DependencyRef, Diagnostic, Diagnostics,
    ModuleId, ModuleTree, Severity, SourceRange, Value,
};
use kubehcl_syntax::{Block, Body};

use crate::config::{Deployable, DependsOn, Module};
use crate::eval::{Scope, evaluate, iterate};
use crate::functions::{Functions, to_number};
use crate::loader::LoadedModule;

/// Annotation marking objects created by kubehcl
pub const MANAGED_ANNOTATION: &str = "kubehcl.sh/managed";
pub const MANAGED_MESSAGE: &str = "This resource is managed by kubehcl";
/// Annotation carrying the release name
pub const RELEASE_ANNOTATION: &str = "kubehcl.sh/release";

const DYNAMIC: &str = "dynamic";

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Release name; when set every module gets the release annotations
    pub release: Option<String>,
}

/// Evaluate `loaded` and every module it calls
pub fn decode(loaded: &LoadedModule, options: &DecodeOptions) -> (ModuleTree, Diagnostics) {
    let backend_storage = loaded
        .module
        .backend
        .as_ref()
        .map(|b| b.kind)
        .unwrap_or_default();
    let mut decoder = Decoder {
        tree: None,
        diags: Diagnostics::new(),
        release: options.release.as_deref(),
        backend_storage,
        dynamic_warned: HashSet::new(),
    };
    decoder.module(loaded, Frame::root(), None);
    let tree = decoder
        .tree
        .unwrap_or_else(|| ModuleTree::new(DecodedModule::default()));
    (tree, decoder.diags)
}

/// Where a module instance sits in the tree and what its caller passed
struct Frame {
    name: String,
    path: Vec<String>,
    inputs: BTreeMap<String, Value>,
    /// `depends_on` of every enclosing module call
    depends_on: Vec<DependencyRef>,
}

impl Frame {
    fn root() -> Self {
        Self {
            name: String::new(),
            path: Vec::new(),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }
}

/// One expansion of a deployable
#[derive(Debug, Clone, PartialEq)]
enum InstanceKey {
    Single,
    Index(usize),
    Key(String),
}

impl InstanceKey {
    fn suffix(&self) -> String {
        match self {
            InstanceKey::Single => String::new(),
            InstanceKey::Index(i) => format!("[{}]", i),
            InstanceKey::Key(k) => format!("[{}]", k),
        }
    }
}

/// Upper bound on `count`
const MAX_COUNT: usize = 10_000;

/// Errors raised by the shape of a body rather than by the values it sees
const VALUE_INDEPENDENT_ERRORS: &[&str] = &[
    "Unknown variable",
    "Call to unknown function",
    "Unsupported attribute",
    "Unsupported block type",
    "Duplicate values are not allowed",
    "Duplicate object key",
    "Invalid dynamic block",
    "Invalid dynamic iterator name",
    "Missing content block",
    "Duplicate content block",
    "Missing required argument",
];

struct Instance {
    key: InstanceKey,
    /// `count` or `each` binding
    binding: Option<(&'static str, Value)>,
}

struct Decoder<'o> {
    tree: Option<ModuleTree>,
    diags: Diagnostics,
    release: Option<&'o str>,
    backend_storage: BackendStorageKind,
    dynamic_warned: HashSet<SourceRange>,
}

impl Decoder<'_> {
    fn module(&mut self, loaded: &LoadedModule, frame: Frame, parent: Option<ModuleId>) {
        let module = &loaded.module;
        let functions = Functions::new(module.dir.clone(), loaded.fs.clone());
        tracing::debug!(module = %render_path(&frame.path), "decoding module");

        let variables = self.variables(module, &frame, &functions);
        let var_scope = Scope::new(&functions).with("var", Value::object(variables.clone()));
        let locals = self.locals(module, &var_scope);
        let scope = var_scope.child().with("local", Value::object(locals.clone()));
        let annotations = self.annotations(module, &scope);

        let resources = module
            .resources
            .iter()
            .map(|d| self.resource(d, &frame, &scope, &annotations))
            .collect();
        let children = self.child_frames(loaded, &frame, &scope);

        let decoded = DecodedModule {
            name: frame.name,
            depth: frame.path.len(),
            parent,
            path: frame.path,
            variables,
            locals,
            annotations,
            resources,
            children: Vec::new(),
            depends_on: frame.depends_on,
            backend_storage: self.backend_storage,
        };
        let id = match (parent, self.tree.as_mut()) {
            (Some(parent), Some(tree)) => tree.add_child(parent, decoded),
            _ => {
                let tree = ModuleTree::new(decoded);
                let id = tree.root_id();
                self.tree = Some(tree);
                id
            }
        };

        for (child, frame) in children {
            self.module(child, frame, Some(id));
        }
    }

    fn variables(
        &mut self,
        module: &Module,
        frame: &Frame,
        functions: &Functions,
    ) -> BTreeMap<String, Value> {
        let empty = Scope::new(functions);
        let mut out = BTreeMap::new();
        for (name, variable) in &module.variables {
            let (raw, range) = match (frame.inputs.get(name), &variable.default) {
                (Some(value), _) => (value.clone(), &variable.decl_range),
                (None, Some(expr)) => match evaluate(expr, &empty) {
                    Ok(value) => (value, &expr.range),
                    Err(d) => {
                        self.diags.push(d);
                        continue;
                    }
                },
                // reported while loading
                (None, None) => continue,
            };
            match variable.type_constraint.convert(&raw) {
                Ok(value) => {
                    out.insert(name.clone(), value);
                }
                Err(reason) => self.diags.error(
                    "Invalid value for variable",
                    format!("The given value is not suitable for var.{}: {}.", name, reason),
                    range,
                ),
            }
        }
        out
    }

    fn locals(&mut self, module: &Module, scope: &Scope<'_>) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for local in &module.locals {
            let scope = scope.child().with("local", Value::object(out.clone()));
            match evaluate(&local.expr, &scope) {
                Ok(value) => {
                    out.insert(local.name.clone(), value);
                }
                Err(d) => self.diags.push(d),
            }
        }
        out
    }

    fn annotations(&mut self, module: &Module, scope: &Scope<'_>) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for annotation in &module.annotations {
            match evaluate(&annotation.expr, scope) {
                Ok(Value::String(s)) => {
                    out.insert(annotation.name.clone(), s);
                }
                Ok(other) => self.diags.error(
                    "Annotation must be string",
                    format!(
                        "Annotation {} must be a string but has type {}",
                        annotation.name,
                        other.type_name()
                    ),
                    &annotation.expr.range,
                ),
                Err(d) => self.diags.push(d),
            }
        }
        if let Some(release) = self.release {
            out.insert(MANAGED_ANNOTATION.to_string(), MANAGED_MESSAGE.to_string());
            out.insert(RELEASE_ANNOTATION.to_string(), release.to_string());
        }
        out
    }

    fn resource(
        &mut self,
        deployable: &Deployable,
        frame: &Frame,
        scope: &Scope<'_>,
        annotations: &BTreeMap<String, String>,
    ) -> DecodedResource {
        let mut resource = DecodedResource {
            name: deployable.name.clone(),
            module_path: frame.path.clone(),
            config: BTreeMap::new(),
            depends_on: frame.depends_on.clone(),
            range: deployable.decl_range.clone(),
        };
        resource
            .depends_on
            .extend(dependency_refs(&deployable.depends_on, &frame.path));

        let fqn = resource.fqn();
        for instance in self.instances(deployable, scope) {
            let scope = bind(scope, &instance);
            let Some(mut value) = self.body(&deployable.body, &scope) else {
                continue;
            };
            inject_annotations(&mut value, annotations);
            resource
                .config
                .insert(format!("{}{}", fqn, instance.key.suffix()), value);
        }
        resource
    }

    /// Expand module calls into child frames with their evaluated inputs
    fn child_frames<'l>(
        &mut self,
        loaded: &'l LoadedModule,
        frame: &Frame,
        scope: &Scope<'_>,
    ) -> Vec<(&'l LoadedModule, Frame)> {
        let mut out = Vec::new();
        for call in &loaded.module.module_calls {
            let Some(child) = loaded.child(call.name()) else {
                continue;
            };
            let mut depends_on = frame.depends_on.clone();
            depends_on.extend(dependency_refs(&call.deployable.depends_on, &frame.path));

            for instance in self.instances(&call.deployable, scope) {
                let scope = bind(scope, &instance);
                let mut inputs = BTreeMap::new();
                for input in call.inputs() {
                    match evaluate(&input.expr, &scope) {
                        Ok(value) => {
                            inputs.insert(input.name.clone(), value);
                        }
                        Err(d) => self.diags.push(d),
                    }
                }
                let name = format!("{}{}", call.name(), instance.key.suffix());
                let mut path = frame.path.clone();
                path.push(name.clone());
                out.push((
                    child,
                    Frame {
                        name,
                        path,
                        inputs,
                        depends_on: depends_on.clone(),
                    },
                ));
            }
        }
        out
    }

    /// Instances of a deployable from its `count` or `for_each`
    fn instances(&mut self, deployable: &Deployable, scope: &Scope<'_>) -> Vec<Instance> {
        if let Some(expr) = &deployable.count {
            let count = match evaluate(expr, scope) {
                Ok(value) => value,
                Err(d) => {
                    self.diags.push(d);
                    return Vec::new();
                }
            };
            let n = match to_number(&count) {
                Some(n) if n.fract() == 0.0 => n,
                _ => {
                    self.diags.error(
                        "Cannot convert value to int",
                        format!(
                            "The given \"count\" argument value is unsuitable: a whole number is required, got {}.",
                            count.type_name()
                        ),
                        &expr.range,
                    );
                    return Vec::new();
                }
            };
            if n < 0.0 {
                self.diags.error(
                    "Count is lower than 0",
                    "The given \"count\" argument value is invalid: must be greater than or equal to 0.",
                    &expr.range,
                );
                return Vec::new();
            }
            if n > MAX_COUNT as f64 {
                self.diags.error(
                    "Count is too large",
                    format!(
                        "The given \"count\" argument value is invalid: at most {} instances are allowed.",
                        MAX_COUNT
                    ),
                    &expr.range,
                );
                return Vec::new();
            }
            if n == 0.0 {
                // the body is still checked once
                let probe = Instance {
                    key: InstanceKey::Index(0),
                    binding: Some(("count", count_object(0))),
                };
                let probe_scope = bind(scope, &probe);
                let _ = self.body(&deployable.body, &probe_scope);
                return Vec::new();
            }
            return (1..=n as usize)
                .map(|i| Instance {
                    key: InstanceKey::Index(i),
                    binding: Some(("count", count_object(i))),
                })
                .collect();
        }

        if let Some(expr) = &deployable.for_each {
            let collection = match evaluate(expr, scope) {
                Ok(value) => value,
                Err(d) => {
                    self.diags.push(d);
                    return Vec::new();
                }
            };
            let pairs: Vec<(String, Value)> = match &collection {
                Value::Map(m) | Value::Object(m) => {
                    m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                }
                Value::Set(items) => {
                    let mut pairs = Vec::new();
                    for item in items {
                        let Value::String(s) = item else {
                            self.diags.error(
                                "Invalid for_each argument",
                                format!(
                                    "The given \"for_each\" argument value is unsuitable: \"for_each\" supports maps and sets of strings, but you have provided a set containing type {}.",
                                    item.type_name()
                                ),
                                &expr.range,
                            );
                            return Vec::new();
                        };
                        pairs.push((s.clone(), item.clone()));
                    }
                    pairs
                }
                Value::Null => {
                    self.diags.error(
                        "Invalid for_each argument",
                        "The given \"for_each\" argument value is null. A map, or set of strings is allowed.",
                        &expr.range,
                    );
                    return Vec::new();
                }
                other => {
                    self.diags.error(
                        "Invalid for_each argument",
                        format!(
                            "The given \"for_each\" argument value is unsuitable: the \"for_each\" argument must be a map, or set of strings, and you have provided a value of type {}.",
                            other.type_name()
                        ),
                        &expr.range,
                    );
                    return Vec::new();
                }
            };
            if pairs.is_empty() {
                self.check_unexpanded_body(&deployable.body, scope);
                return Vec::new();
            }
            return pairs
                .into_iter()
                .map(|(key, value)| Instance {
                    binding: Some((
                        "each",
                        Value::object([
                            ("key".to_string(), Value::String(key.clone())),
                            ("value".to_string(), value),
                        ]),
                    )),
                    key: InstanceKey::Key(key),
                })
                .collect();
        }

        vec![Instance {
            key: InstanceKey::Single,
            binding: None,
        }]
    }

    /// Check the body of a `for_each` over an empty collection
    ///
    /// `each.value` has no concrete value here, so only errors that cannot
    /// depend on it are reported.
    fn check_unexpanded_body(&mut self, body: &Body, scope: &Scope<'_>) {
        let placeholder = Instance {
            key: InstanceKey::Key(String::new()),
            binding: Some((
                "each",
                Value::object([
                    ("key".to_string(), Value::String(String::new())),
                    ("value".to_string(), Value::Null),
                ]),
            )),
        };
        let outer = std::mem::take(&mut self.diags);
        let _ = self.body(body, &bind(scope, &placeholder));
        let checked = std::mem::replace(&mut self.diags, outer);
        self.diags.extend(checked.into_iter().filter(|d| {
            d.severity == Severity::Error && VALUE_INDEPENDENT_ERRORS.contains(&d.summary.as_str())
        }));
    }

    /// Evaluate a resource body into an object
    ///
    /// Nested blocks become object attributes named by block type and
    /// `dynamic` blocks become lists of objects.
    fn body(&mut self, body: &Body, scope: &Scope<'_>) -> Option<Value> {
        let errors_before = self.diags.errors().count();
        let mut out: BTreeMap<String, Value> = BTreeMap::new();
        let mut defined: BTreeMap<String, SourceRange> = BTreeMap::new();

        for attr in &body.attributes {
            match evaluate(&attr.expr, scope) {
                Ok(value) => {
                    self.insert_unique(&mut out, &mut defined, &attr.name, value, &attr.name_range)
                }
                Err(d) => self.diags.push(d),
            }
        }

        for block in &body.blocks {
            if block.kind == DYNAMIC {
                if let Some((name, items)) = self.dynamic(block, scope) {
                    self.insert_unique(
                        &mut out,
                        &mut defined,
                        &name,
                        Value::List(items),
                        &block.type_range,
                    );
                }
                continue;
            }
            if let Some(first) = block.label_ranges.first() {
                self.diags.error(
                    format!("Extraneous label for {}", block.kind),
                    format!("No labels are expected for {} blocks.", block.kind),
                    first,
                );
            }
            if let Some(value) = self.body(&block.body, scope) {
                self.insert_unique(&mut out, &mut defined, &block.kind, value, &block.type_range);
            }
        }

        (self.diags.errors().count() == errors_before).then(|| Value::Object(out))
    }

    fn insert_unique(
        &mut self,
        out: &mut BTreeMap<String, Value>,
        defined: &mut BTreeMap<String, SourceRange>,
        name: &str,
        value: Value,
        range: &SourceRange,
    ) {
        if let Some(previous) = defined.get(name) {
            self.diags.push(
                Diagnostic::error(
                    "Duplicate values are not allowed",
                    format!("The argument {:?} was already set.", name),
                )
                .with_subject(range)
                .with_context(previous),
            );
            return;
        }
        defined.insert(name.to_string(), range.clone());
        out.insert(name.to_string(), value);
    }

    /// Expand `dynamic "label" { for_each = ..., content { ... } }`
    fn dynamic(&mut self, block: &Block, scope: &Scope<'_>) -> Option<(String, Vec<Value>)> {
        let [label] = block.labels.as_slice() else {
            self.diags.error(
                "Invalid dynamic block",
                "A dynamic block must have exactly one label: the type of block it generates.",
                &block.header_range(),
            );
            return None;
        };

        if self.dynamic_warned.insert(block.type_range.clone()) {
            self.diags.warning(
                "Dynamic blocks will be converted to lists instead of maps",
                format!("The dynamic block {:?} produces a list of objects.", label),
                &block.header_range(),
            );
        }

        crate::config::allowed_attributes(&block.body, &["for_each", "iterator"], &mut self.diags);
        let mut content = None;
        for inner in &block.body.blocks {
            match inner.kind.as_str() {
                "content" if content.is_none() => content = Some(inner),
                "content" => {
                    self.diags.error(
                        "Duplicate content block",
                        "Only one content block is allowed in a dynamic block.",
                        &inner.type_range,
                    );
                    return None;
                }
                other => {
                    self.diags.error(
                        "Unsupported block type",
                        format!("Blocks of type {:?} are not expected here.", other),
                        &inner.type_range,
                    );
                    return None;
                }
            }
        }
        let Some(content) = content else {
            self.diags.error(
                "Missing content block",
                "A dynamic block must contain a content block.",
                &block.header_range(),
            );
            return None;
        };
        let Some(for_each) = block.body.attribute("for_each") else {
            self.diags.error(
                "Missing required argument",
                "The argument \"for_each\" is required, but no definition was found.",
                &block.header_range(),
            );
            return None;
        };
        let iterator = match block.body.attribute("iterator") {
            Some(attr) => match attr.expr.as_keyword() {
                Some(name) => name.to_string(),
                None => {
                    self.diags.error(
                        "Invalid dynamic iterator name",
                        "The iterator must be a single name.",
                        &attr.expr.range,
                    );
                    return None;
                }
            },
            None => label.clone(),
        };

        let collection = match evaluate(&for_each.expr, scope) {
            Ok(value) => value,
            Err(d) => {
                self.diags.push(d);
                return None;
            }
        };
        let pairs = match iterate(&collection, &for_each.expr.range) {
            Ok(pairs) => pairs,
            Err(d) => {
                self.diags.push(d);
                return None;
            }
        };

        let mut items = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let iter_value = Value::object([("key".to_string(), key), ("value".to_string(), value)]);
            let scope = scope.child().with(iterator.clone(), iter_value);
            if let Some(item) = self.body(&content.body, &scope) {
                items.push(item);
            }
        }
        Some((label.clone(), items))
    }
}

fn bind<'s>(scope: &'s Scope<'_>, instance: &Instance) -> Scope<'s> {
    let mut child = scope.child();
    if let Some((name, value)) = &instance.binding {
        child.set(*name, value.clone());
    }
    child
}

fn count_object(index: usize) -> Value {
    Value::object([("index".to_string(), Value::from(index))])
}

fn dependency_refs(depends_on: &[DependsOn], scope: &[String]) -> Vec<DependencyRef> {
    depends_on
        .iter()
        .map(|d| DependencyRef {
            kind: d.kind,
            name: d.name.clone(),
            scope: scope.to_vec(),
            range: d.range.clone(),
        })
        .collect()
}

/// Merge default annotations into `metadata.annotations`; keys already set win
fn inject_annotations(value: &mut Value, annotations: &BTreeMap<String, String>) {
    if annotations.is_empty() {
        return;
    }
    let Some(metadata) = value
        .as_mapping_mut()
        .and_then(|m| m.get_mut("metadata"))
        .and_then(Value::as_mapping_mut)
    else {
        return;
    };
    let target = metadata
        .entry("annotations".to_string())
        .or_insert_with(Value::empty_object);
    if target.is_null() {
        *target = Value::empty_object();
    }
    if let Some(existing) = target.as_mapping_mut() {
        for (key, value) in annotations {
            existing
                .entry(key.clone())
                .or_insert_with(|| Value::string(value.clone()));
        }
    }
}
