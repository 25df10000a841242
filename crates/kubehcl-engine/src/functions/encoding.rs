//! Encoding and decoding functions

use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use kubehcl_core::Value;

use super::{Args, FnResult, FunctionError, Functions};

fn decode_base64(text: &str) -> Result<Vec<u8>, FunctionError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| FunctionError::failed(format!("failed to decode base64 data: {}", e)))
}

fn utf8(bytes: Vec<u8>) -> Result<String, FunctionError> {
    String::from_utf8(bytes)
        .map_err(|_| FunctionError::failed("the result of decoding the provided string is not valid UTF-8"))
}

/// Usage: base64decode("aGVsbG8=")
pub(crate) fn base64decode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::string(utf8(decode_base64(&a.string(0)?)?)?))
}

/// Usage: base64encode("hello")
pub(crate) fn base64encode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::string(STANDARD.encode(a.string(0)?.as_bytes())))
}

/// Usage: base64gzip("hello")
pub(crate) fn base64gzip(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(a.string(0)?.as_bytes())
        .map_err(|e| FunctionError::failed(format!("failed to compress: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| FunctionError::failed(format!("failed to compress: {}", e)))?;
    Ok(Value::string(STANDARD.encode(compressed)))
}

/// Usage: base64gunzip(base64gzip("hello"))
pub(crate) fn base64gunzip(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let compressed = decode_base64(&a.string(0)?)?;
    let mut out = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| FunctionError::failed(format!("failed to decompress: {}", e)))?;
    Ok(Value::string(utf8(out)?))
}

/// Usage: csvdecode("a,b\n1,2\n")
pub(crate) fn csvdecode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let rows = parse_csv(&a.string(0)?)?;
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Err(FunctionError::failed("missing header line"));
    };

    let mut out = Vec::new();
    for (line, row) in rows.enumerate() {
        if row.len() != header.len() {
            return Err(FunctionError::failed(format!(
                "record on line {}: wrong number of fields",
                line + 2
            )));
        }
        let record: BTreeMap<String, Value> = header
            .iter()
            .cloned()
            .zip(row.into_iter().map(Value::String))
            .collect();
        out.push(Value::Object(record));
    }
    Ok(Value::List(out))
}

/// RFC 4180 records; quoted fields may contain separators and newlines
fn parse_csv(text: &str) -> Result<Vec<Vec<String>>, FunctionError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => quoted = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            other => field.push(other),
        }
    }
    if quoted {
        return Err(FunctionError::failed("extraneous or missing \" in quoted-field"));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Usage: jsondecode("{\"a\": 1}")
pub(crate) fn jsondecode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let json: serde_json::Value = serde_json::from_str(&a.string(0)?)
        .map_err(|e| FunctionError::failed(format!("invalid JSON: {}", e)))?;
    Ok(Value::from_json(&json))
}

/// Usage: jsonencode({a = 1})
pub(crate) fn jsonencode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    serde_json::to_string(&a.value(0).to_json())
        .map(Value::String)
        .map_err(|e| FunctionError::failed(e.to_string()))
}

fn check_encoding(a: &Args<'_>, i: usize) -> Result<(), FunctionError> {
    let name = a.string(i)?;
    match name.to_ascii_uppercase().replace('-', "").as_str() {
        "UTF8" => Ok(()),
        _ => Err(FunctionError::Argument {
            index: i + 1,
            message: format!("{:?} is not a supported IANA encoding name", name),
        }),
    }
}

/// Usage: textdecodebase64("aGk=", "UTF-8")
pub(crate) fn textdecodebase64(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    check_encoding(&a, 1)?;
    Ok(Value::string(utf8(decode_base64(&a.string(0)?)?)?))
}

/// Usage: textencodebase64("hi", "UTF-8")
pub(crate) fn textencodebase64(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    check_encoding(&a, 1)?;
    Ok(Value::string(STANDARD.encode(a.string(0)?.as_bytes())))
}

/// Usage: urlencode("a b&c")
pub(crate) fn urlencode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let text = a.string(0)?;
    Ok(Value::string(
        url::form_urlencoded::byte_serialize(text.as_bytes()).collect::<String>(),
    ))
}

/// Usage: urldecode("a+b%26c")
pub(crate) fn urldecode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let text = a.string(0)?;
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        FunctionError::failed(format!("invalid URL escape at byte {}", i))
                    })?;
                out.push(hex);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    Ok(Value::string(utf8(out)?))
}

/// Usage: yamldecode("a: 1")
pub(crate) fn yamldecode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&a.string(0)?)
        .map_err(|e| FunctionError::failed(format!("invalid YAML: {}", e)))?;
    let json = serde_json::to_value(yaml)
        .map_err(|e| FunctionError::failed(format!("unsupported YAML value: {}", e)))?;
    Ok(Value::from_json(&json))
}

/// Usage: yamlencode({a = 1})
pub(crate) fn yamlencode(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    serde_yaml::to_string(&a.value(0).to_json())
        .map(Value::String)
        .map_err(|e| FunctionError::failed(e.to_string()))
}
