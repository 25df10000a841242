//! Hash and identifier functions

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use kubehcl_core::Value;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::{Args, FnResult, FunctionError, Functions};

pub(crate) fn hex_digest<D: Digest>(data: &[u8]) -> String {
    let digest = D::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn base64_digest<D: Digest>(data: &[u8]) -> String {
    STANDARD.encode(D::digest(data))
}

fn input(args: &[Value]) -> Result<String, FunctionError> {
    Args::exact(args, 1)?.string(0)
}

/// Usage: md5("hello")
pub(crate) fn md5(_: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Md5>(input(args)?.as_bytes())))
}

/// Usage: sha1("hello")
pub(crate) fn sha1(_: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Sha1>(input(args)?.as_bytes())))
}

/// Usage: sha256("hello")
pub(crate) fn sha256(_: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Sha256>(input(args)?.as_bytes())))
}

/// Usage: sha512("hello")
pub(crate) fn sha512(_: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(hex_digest::<Sha512>(input(args)?.as_bytes())))
}

/// Usage: base64sha256("hello")
pub(crate) fn base64sha256(_: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(base64_digest::<Sha256>(input(args)?.as_bytes())))
}

/// Usage: base64sha512("hello")
pub(crate) fn base64sha512(_: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::string(base64_digest::<Sha512>(input(args)?.as_bytes())))
}

/// Usage: uuid()
pub(crate) fn uuid(_: &Functions, args: &[Value]) -> FnResult {
    Args::exact(args, 0)?;
    Ok(Value::string(uuid::Uuid::new_v4().to_string()))
}

/// Usage: uuidv5("dns", "example.com")
pub(crate) fn uuidv5(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let namespace = match a.string(0)?.as_str() {
        "dns" => uuid::Uuid::NAMESPACE_DNS,
        "url" => uuid::Uuid::NAMESPACE_URL,
        "oid" => uuid::Uuid::NAMESPACE_OID,
        "x500" => uuid::Uuid::NAMESPACE_X500,
        other => uuid::Uuid::parse_str(other).map_err(|e| FunctionError::Argument {
            index: 1,
            message: format!("uuidv5() doesn't support namespace {}: {}", other, e),
        })?,
    };
    let name = a.string(1)?;
    Ok(Value::string(
        uuid::Uuid::new_v5(&namespace, name.as_bytes()).to_string(),
    ))
}
