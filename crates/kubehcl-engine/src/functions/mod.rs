//! Built-in function library available to every expression
//!
//! Functions are plain `fn` pointers registered in a compile-time [`phf`]
//! map. Each receives the [`Functions`] handle it was called through, which
//! carries the module directory, the filesystem the module was loaded from
//! and the current `templatefile` nesting depth.

mod cidr;
mod collections;
mod conversion;
mod crypto;
mod datetime;
mod encoding;
mod filesystem;
mod numeric;
mod strings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kubehcl_core::vfs::normalize;
use kubehcl_core::{OsFs, SourceFs, Value};
use thiserror::Error;

/// Environment variable bounding `templatefile` nesting
pub const TEMPLATE_DEPTH_ENV: &str = "TF_TEMPLATE_RECURSION_DEPTH";

/// Nesting limit when [`TEMPLATE_DEPTH_ENV`] is unset or invalid
pub const DEFAULT_TEMPLATE_DEPTH: usize = 1024;

pub type FunctionImpl = fn(&Functions, &[Value]) -> Result<Value, FunctionError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FunctionError {
    #[error("expected {expected} arguments, got {got}")]
    Arity { expected: String, got: usize },

    #[error("invalid value for argument {index}: {message}")]
    Argument { index: usize, message: String },

    #[error("{0}")]
    Failed(String),

    #[error("maximum recursion depth {0} reached")]
    TemplateRecursion(usize),
}

impl FunctionError {
    pub(crate) fn failed(message: impl Into<String>) -> Self {
        FunctionError::Failed(message.into())
    }
}

pub(crate) type FnResult = Result<Value, FunctionError>;

static FUNCTIONS: phf::Map<&'static str, FunctionImpl> = phf::phf_map! {
    // numeric
    "abs" => numeric::abs,
    "ceil" => numeric::ceil,
    "floor" => numeric::floor,
    "log" => numeric::log,
    "max" => numeric::max,
    "min" => numeric::min,
    "parseint" => numeric::parseint,
    "pow" => numeric::pow,
    "signum" => numeric::signum,
    "sum" => numeric::sum,
    // strings
    "chomp" => strings::chomp,
    "endswith" => strings::endswith,
    "format" => strings::format,
    "formatlist" => strings::formatlist,
    "indent" => strings::indent,
    "join" => strings::join,
    "lower" => strings::lower,
    "regex" => strings::regex,
    "regexall" => strings::regexall,
    "replace" => strings::replace,
    "split" => strings::split,
    "startswith" => strings::startswith,
    "strcontains" => strings::strcontains,
    "strrev" => strings::strrev,
    "substr" => strings::substr,
    "title" => strings::title,
    "trim" => strings::trim,
    "trimprefix" => strings::trimprefix,
    "trimsuffix" => strings::trimsuffix,
    "trimspace" => strings::trimspace,
    "upper" => strings::upper,
    // collections
    "alltrue" => collections::alltrue,
    "anytrue" => collections::anytrue,
    "chunklist" => collections::chunklist,
    "coalesce" => collections::coalesce,
    "coalescelist" => collections::coalescelist,
    "compact" => collections::compact,
    "concat" => collections::concat,
    "contains" => collections::contains,
    "distinct" => collections::distinct,
    "element" => collections::element,
    "flatten" => collections::flatten,
    "index" => collections::index,
    "keys" => collections::keys,
    "length" => collections::length,
    "list" => collections::list,
    "lookup" => collections::lookup,
    "map" => collections::map,
    "matchkeys" => collections::matchkeys,
    "merge" => collections::merge,
    "one" => collections::one,
    "range" => collections::range,
    "reverse" => collections::reverse,
    "setintersection" => collections::setintersection,
    "setproduct" => collections::setproduct,
    "setsubtract" => collections::setsubtract,
    "setunion" => collections::setunion,
    "slice" => collections::slice,
    "sort" => collections::sort,
    "transpose" => collections::transpose,
    "values" => collections::values,
    "zipmap" => collections::zipmap,
    // encoding
    "base64decode" => encoding::base64decode,
    "base64encode" => encoding::base64encode,
    "base64gzip" => encoding::base64gzip,
    "base64gunzip" => encoding::base64gunzip,
    "csvdecode" => encoding::csvdecode,
    "jsondecode" => encoding::jsondecode,
    "jsonencode" => encoding::jsonencode,
    "textdecodebase64" => encoding::textdecodebase64,
    "textencodebase64" => encoding::textencodebase64,
    "urlencode" => encoding::urlencode,
    "urldecode" => encoding::urldecode,
    "yamldecode" => encoding::yamldecode,
    "yamlencode" => encoding::yamlencode,
    // filesystem
    "abspath" => filesystem::abspath,
    "basename" => filesystem::basename,
    "dirname" => filesystem::dirname,
    "file" => filesystem::file,
    "fileexists" => filesystem::fileexists,
    "fileset" => filesystem::fileset,
    "filebase64" => filesystem::filebase64,
    "filemd5" => filesystem::filemd5,
    "filesha1" => filesystem::filesha1,
    "filesha256" => filesystem::filesha256,
    "filesha512" => filesystem::filesha512,
    "filebase64sha256" => filesystem::filebase64sha256,
    "filebase64sha512" => filesystem::filebase64sha512,
    "pathexpand" => filesystem::pathexpand,
    "templatefile" => filesystem::templatefile,
    "templatestring" => filesystem::templatestring,
    // hashing
    "base64sha256" => crypto::base64sha256,
    "base64sha512" => crypto::base64sha512,
    "md5" => crypto::md5,
    "sha1" => crypto::sha1,
    "sha256" => crypto::sha256,
    "sha512" => crypto::sha512,
    "uuid" => crypto::uuid,
    "uuidv5" => crypto::uuidv5,
    // time
    "formatdate" => datetime::formatdate,
    "timeadd" => datetime::timeadd,
    "timecmp" => datetime::timecmp,
    "timestamp" => datetime::timestamp,
    // network
    "cidrcontains" => cidr::cidrcontains,
    "cidrhost" => cidr::cidrhost,
    "cidrnetmask" => cidr::cidrnetmask,
    "cidrsubnet" => cidr::cidrsubnet,
    "cidrsubnets" => cidr::cidrsubnets,
    // conversion
    "nonsensitive" => conversion::nonsensitive,
    "issensitive" => conversion::issensitive,
    "sensitive" => conversion::sensitive,
    "tobool" => conversion::tobool,
    "tolist" => conversion::tolist,
    "tomap" => conversion::tomap,
    "tonumber" => conversion::tonumber,
    "toset" => conversion::toset,
    "tostring" => conversion::tostring,
};

/// Names handled by the evaluator itself because their arguments are lazy
pub const SPECIAL_FORMS: &[&str] = &["can", "try"];

/// Handle to the function library for one module
///
/// Cloning is cheap; `templatefile` derives a nested handle one level deeper
/// through [`Functions::nested`].
#[derive(Debug, Clone)]
pub struct Functions {
    base_dir: PathBuf,
    fs: Arc<dyn SourceFs>,
    depth: usize,
    max_depth: usize,
}

impl Functions {
    /// Library rooted at `base_dir`, reading files through `fs`
    pub fn new(base_dir: impl Into<PathBuf>, fs: Arc<dyn SourceFs>) -> Self {
        Self {
            base_dir: base_dir.into(),
            fs,
            depth: 0,
            max_depth: max_depth_from_env(),
        }
    }

    /// Library reading from the real filesystem
    pub fn local(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(base_dir, Arc::new(OsFs))
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Same library for another module folder on the same filesystem
    #[must_use]
    pub fn for_dir(&self, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..self.clone()
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn fs(&self) -> &Arc<dyn SourceFs> {
        &self.fs
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Handle for evaluating a template one level deeper
    pub fn nested(&self) -> Result<Functions, FunctionError> {
        if self.depth + 1 > self.max_depth {
            return Err(FunctionError::TemplateRecursion(self.max_depth));
        }
        Ok(Self {
            depth: self.depth + 1,
            ..self.clone()
        })
    }

    /// Resolve a path argument against the module folder
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.base_dir.join(path))
        }
    }

    pub fn exists(name: &str) -> bool {
        FUNCTIONS.contains_key(name) || SPECIAL_FORMS.contains(&name)
    }

    /// Every callable name, sorted
    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = FUNCTIONS
            .keys()
            .copied()
            .chain(SPECIAL_FORMS.iter().copied())
            .collect();
        names.sort_unstable();
        names
    }

    /// Call a registered function; `None` when no function has that name
    pub fn call(&self, name: &str, args: &[Value]) -> Option<FnResult> {
        let f = FUNCTIONS.get(name)?;
        tracing::trace!(function = name, args = args.len(), "calling function");
        Some(f(self, args))
    }
}

fn max_depth_from_env() -> usize {
    std::env::var(TEMPLATE_DEPTH_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_TEMPLATE_DEPTH)
}

/// Positional argument accessors with uniform error messages
pub(crate) struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub(crate) fn exact(values: &'a [Value], n: usize) -> Result<Self, FunctionError> {
        if values.len() != n {
            return Err(FunctionError::Arity {
                expected: n.to_string(),
                got: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub(crate) fn between(
        values: &'a [Value],
        min: usize,
        max: usize,
    ) -> Result<Self, FunctionError> {
        if values.len() < min || values.len() > max {
            return Err(FunctionError::Arity {
                expected: format!("{} to {}", min, max),
                got: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub(crate) fn at_least(values: &'a [Value], min: usize) -> Result<Self, FunctionError> {
        if values.len() < min {
            return Err(FunctionError::Arity {
                expected: format!("at least {}", min),
                got: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn all(&self) -> &'a [Value] {
        self.values
    }

    pub(crate) fn value(&self, i: usize) -> &'a Value {
        &self.values[i]
    }

    fn invalid(i: usize, message: impl Into<String>) -> FunctionError {
        FunctionError::Argument {
            index: i + 1,
            message: message.into(),
        }
    }

    /// String argument; numbers and bools are converted
    pub(crate) fn string(&self, i: usize) -> Result<String, FunctionError> {
        match &self.values[i] {
            Value::Null => Err(Self::invalid(i, "argument must not be null")),
            Value::String(s) => Ok(s.clone()),
            v @ (Value::Number(_) | Value::Bool(_)) => v
                .to_template_string()
                .map_err(|e| Self::invalid(i, e.to_string())),
            other => Err(Self::invalid(
                i,
                format!("string required, got {}", other.type_name()),
            )),
        }
    }

    /// Number argument; numeric strings are converted
    pub(crate) fn number(&self, i: usize) -> Result<f64, FunctionError> {
        to_number(&self.values[i]).ok_or_else(|| {
            Self::invalid(
                i,
                format!("number required, got {}", self.values[i].type_name()),
            )
        })
    }

    /// Whole number argument
    pub(crate) fn integer(&self, i: usize) -> Result<i64, FunctionError> {
        let n = self.number(i)?;
        if n.fract() != 0.0 {
            return Err(Self::invalid(i, format!("{} is not a whole number", n)));
        }
        Ok(n as i64)
    }

    pub(crate) fn bool(&self, i: usize) -> Result<bool, FunctionError> {
        match &self.values[i] {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s == "true" => Ok(true),
            Value::String(s) if s == "false" => Ok(false),
            other => Err(Self::invalid(
                i,
                format!("bool required, got {}", other.type_name()),
            )),
        }
    }

    /// List, tuple or set argument
    pub(crate) fn seq(&self, i: usize) -> Result<&'a [Value], FunctionError> {
        self.values[i].as_sequence().ok_or_else(|| {
            Self::invalid(
                i,
                format!("list required, got {}", self.values[i].type_name()),
            )
        })
    }

    /// Map or object argument
    pub(crate) fn mapping(
        &self,
        i: usize,
    ) -> Result<&'a std::collections::BTreeMap<String, Value>, FunctionError> {
        self.values[i].as_mapping().ok_or_else(|| {
            Self::invalid(
                i,
                format!("map required, got {}", self.values[i].type_name()),
            )
        })
    }

    /// List of strings argument
    pub(crate) fn strings(&self, i: usize) -> Result<Vec<String>, FunctionError> {
        self.seq(i)?
            .iter()
            .map(|v| {
                string_of(v).ok_or_else(|| {
                    Self::invalid(i, format!("list of string required, got {}", v.type_name()))
                })
            })
            .collect()
    }
}

/// Number conversion used by functions and operators
pub(crate) fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// String conversion of a primitive, `None` for null and collections
pub(crate) fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(_) | Value::Bool(_) => value.to_template_string().ok(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use kubehcl_core::MemFs;

    pub(crate) fn lib() -> Functions {
        Functions::new("/mod", Arc::new(MemFs::new()))
    }

    pub(crate) fn call(name: &str, args: Vec<Value>) -> Value {
        lib()
            .call(name, &args)
            .unwrap_or_else(|| panic!("no function {}", name))
            .unwrap_or_else(|e| panic!("{}: {}", name, e))
    }

    pub(crate) fn call_err(name: &str, args: Vec<Value>) -> FunctionError {
        match lib().call(name, &args) {
            Some(Err(e)) => e,
            other => panic!("{} should fail, got {:?}", name, other),
        }
    }

    pub(crate) fn s(v: &str) -> Value {
        Value::string(v)
    }

    pub(crate) fn n(v: f64) -> Value {
        Value::Number(v)
    }

    pub(crate) fn list(items: Vec<Value>) -> Value {
        Value::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_standard_functions() {
        for name in ["jsonencode", "templatefile", "cidrsubnet", "try", "can"] {
            assert!(Functions::exists(name), "{} missing", name);
        }
        assert!(!Functions::exists("nope"));
    }

    #[test]
    fn test_names_sorted() {
        let names = Functions::names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_nested_depth_limit() {
        let lib = test_support::lib().with_max_depth(2);
        let one = lib.nested().unwrap();
        let two = one.nested().unwrap();
        assert_eq!(two.depth(), 2);
        assert_eq!(
            two.nested().unwrap_err(),
            FunctionError::TemplateRecursion(2)
        );
    }

    #[test]
    fn test_resolve_relative_to_module() {
        let lib = test_support::lib();
        assert_eq!(lib.resolve("files/../a.txt"), PathBuf::from("/mod/a.txt"));
        assert_eq!(lib.resolve("/etc/x"), PathBuf::from("/etc/x"));
    }
}
