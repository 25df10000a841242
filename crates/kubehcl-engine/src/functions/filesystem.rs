//! Filesystem and template functions
//!
//! Paths are resolved against the directory of the module being evaluated
//! and read through that module's [`kubehcl_core::SourceFs`], so modules
//! pulled from a repository read their own bundled files.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use kubehcl_core::vfs::normalize;
use kubehcl_core::Value;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use super::crypto::{base64_digest, hex_digest};
use super::{Args, FnResult, FunctionError, Functions};
use crate::eval::{Scope, evaluate};

fn read_bytes(f: &Functions, path: &str) -> Result<Vec<u8>, FunctionError> {
    let resolved = f.resolve(path);
    if f.fs().is_dir(&resolved) {
        return Err(FunctionError::failed(format!(
            "{} is a directory, not a file",
            path
        )));
    }
    f.fs()
        .read(&resolved)
        .map_err(|e| FunctionError::failed(format!("failed to read {}: {}", path, e)))
}

fn read_string(f: &Functions, path: &str) -> Result<String, FunctionError> {
    String::from_utf8(read_bytes(f, path)?).map_err(|_| {
        FunctionError::failed(format!(
            "contents of {} are not valid UTF-8; use the filebase64 function to obtain the Base64 encoded contents",
            path
        ))
    })
}

fn path_arg(args: &[Value]) -> Result<String, FunctionError> {
    Args::exact(args, 1)?.string(0)
}

/// Usage: abspath("./files")
pub(crate) fn abspath(_: &Functions, args: &[Value]) -> FnResult {
    let path = path_arg(args)?;
    let p = Path::new(&path);
    let absolute = if p.is_absolute() {
        normalize(p)
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| FunctionError::failed(format!("cannot determine working directory: {}", e)))?;
        normalize(&cwd.join(p))
    };
    Ok(Value::string(absolute.to_string_lossy().replace('\\', "/")))
}

/// Usage: basename("foo/bar/baz.txt")
pub(crate) fn basename(_: &Functions, args: &[Value]) -> FnResult {
    let path = path_arg(args)?;
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(Value::string(if path.is_empty() { "." } else { "/" }));
    }
    Ok(Value::string(
        trimmed.rsplit('/').next().unwrap_or(trimmed),
    ))
}

/// Usage: dirname("foo/bar/baz.txt")
pub(crate) fn dirname(_: &Functions, args: &[Value]) -> FnResult {
    let path = path_arg(args)?;
    let trimmed = path.trim_end_matches('/');
    Ok(Value::string(match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => trimmed[..i].to_string(),
        None if path.starts_with('/') => "/".to_string(),
        None => ".".to_string(),
    }))
}

/// Usage: file("${path.module}/hello.txt")
pub(crate) fn file(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(read_string(f, &path_arg(args)?)?))
}

/// Usage: fileexists("config.yaml")
pub(crate) fn fileexists(f: &Functions, args: &[Value]) -> FnResult {
    let path = path_arg(args)?;
    let resolved = f.resolve(&path);
    if f.fs().is_dir(&resolved) {
        return Err(FunctionError::failed(format!(
            "{} is a directory, not a file",
            path
        )));
    }
    Ok(Value::Bool(f.fs().is_file(&resolved)))
}

/// Usage: fileset("files", "**/*.yaml")
pub(crate) fn fileset(f: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let dir = f.resolve(&a.string(0)?);
    let pattern = glob::Pattern::new(&a.string(1)?).map_err(|e| FunctionError::Argument {
        index: 2,
        message: format!("failed to glob pattern: {}", e),
    })?;
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let files = f.fs().walk_files(&dir).unwrap_or_default();
    let matched = files.iter().filter_map(|file| {
        let rel = file.strip_prefix(&dir).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        pattern
            .matches_with(&rel, options)
            .then(|| Value::string(rel))
    });
    Ok(Value::set(matched))
}

/// Usage: filebase64("logo.png")
pub(crate) fn filebase64(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(STANDARD.encode(read_bytes(f, &path_arg(args)?)?)))
}

/// Usage: filemd5("data.bin")
pub(crate) fn filemd5(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Md5>(&read_bytes(f, &path_arg(args)?)?)))
}

/// Usage: filesha1("data.bin")
pub(crate) fn filesha1(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Sha1>(&read_bytes(f, &path_arg(args)?)?)))
}

/// Usage: filesha256("data.bin")
pub(crate) fn filesha256(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Sha256>(&read_bytes(f, &path_arg(args)?)?)))
}

/// Usage: filesha512("data.bin")
pub(crate) fn filesha512(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Sha512>(&read_bytes(f, &path_arg(args)?)?)))
}

/// Usage: filebase64sha256("data.bin")
pub(crate) fn filebase64sha256(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(base64_digest::<Sha256>(&read_bytes(f, &path_arg(args)?)?)))
}

/// Usage: filebase64sha512("data.bin")
pub(crate) fn filebase64sha512(f: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(base64_digest::<Sha512>(&read_bytes(f, &path_arg(args)?)?)))
}

/// Usage: pathexpand("~/.kube/config")
pub(crate) fn pathexpand(_: &Functions, args: &[Value]) -> FnResult {
    let path = path_arg(args)?;
    Ok(Value::string(shellexpand::tilde(&path).into_owned()))
}

/// Usage: templatefile("templates/config.tpl", { port = 80 })
pub(crate) fn templatefile(f: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let path = a.string(0)?;
    let source = read_string(f, &path)?;
    render(f, &source, &path, a.value(1))
}

/// Usage: templatestring(local.tpl, { name = "web" })
pub(crate) fn templatestring(f: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let source = a.string(0)?;
    render(f, &source, "<templatestring>", a.value(1))
}

fn render(f: &Functions, source: &str, filename: &str, vars: &Value) -> FnResult {
    let vars = vars.as_mapping().ok_or_else(|| FunctionError::Argument {
        index: 2,
        message: format!("vars must be an object, got {}", vars.type_name()),
    })?;
    let nested = f.nested()?;
    let template = kubehcl_syntax::parse_template(source, filename)
        .map_err(|e| FunctionError::failed(format!("failed to parse {}: {}", filename, e)))?;

    let mut scope = Scope::new(&nested);
    for (name, value) in vars {
        if !is_identifier(name) {
            return Err(FunctionError::Argument {
                index: 2,
                message: format!("invalid template variable name {:?}: must start with a letter, followed by zero or more letters, digits, and underscores", name),
            });
        }
        scope.set(name.clone(), value.clone());
    }
    evaluate(&template, &scope).map_err(|diag| {
        FunctionError::failed(format!("{}: {}", diag.summary, diag.detail))
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
