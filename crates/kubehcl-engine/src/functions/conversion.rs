//! Type conversion functions

use kubehcl_core::Value;

use super::{Args, FnResult, FunctionError, Functions, string_of, to_number};

fn cannot_convert(value: &Value, target: &str) -> FunctionError {
    FunctionError::failed(format!(
        "cannot convert {} to {}",
        value.type_name(),
        target
    ))
}

/// Usage: tostring(42)
pub(crate) fn tostring(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    match a.value(0) {
        Value::Null => Ok(Value::Null),
        v => string_of(v)
            .map(Value::String)
            .ok_or_else(|| cannot_convert(v, "string")),
    }
}

/// Usage: tonumber("42")
pub(crate) fn tonumber(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    match a.value(0) {
        Value::Null => Ok(Value::Null),
        v => to_number(v)
            .map(Value::Number)
            .ok_or_else(|| cannot_convert(v, "number")),
    }
}

/// Usage: tobool("true")
pub(crate) fn tobool(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    match a.value(0) {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) if s == "true" => Ok(Value::Bool(true)),
        Value::String(s) if s == "false" => Ok(Value::Bool(false)),
        v => Err(cannot_convert(v, "bool")),
    }
}

/// Usage: tolist(toset(["a"]))
pub(crate) fn tolist(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    match a.value(0) {
        Value::Null => Ok(Value::Null),
        v => v
            .as_sequence()
            .map(|items| Value::List(items.to_vec()))
            .ok_or_else(|| cannot_convert(v, "list")),
    }
}

/// Usage: toset(["b", "a", "b"])
pub(crate) fn toset(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    match a.value(0) {
        Value::Null => Ok(Value::Null),
        v => v
            .as_sequence()
            .map(|items| Value::set(items.iter().cloned()))
            .ok_or_else(|| cannot_convert(v, "set")),
    }
}

/// Usage: tomap({a = "b"})
pub(crate) fn tomap(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    match a.value(0) {
        Value::Null => Ok(Value::Null),
        v => v
            .as_mapping()
            .map(|m| Value::Map(m.clone()))
            .ok_or_else(|| cannot_convert(v, "map")),
    }
}

/// Values are never marked sensitive; the value is returned unchanged
pub(crate) fn sensitive(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(a.value(0).clone())
}

pub(crate) fn nonsensitive(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(a.value(0).clone())
}

pub(crate) fn issensitive(_: &Functions, args: &[Value]) -> FnResult {
    Args::exact(args, 1)?;
    Ok(Value::Bool(false))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use kubehcl_core::Value;

    #[test]
    fn test_primitive_conversions() {
        assert_eq!(call("tostring", vec![n(42.0)]), s("42"));
        assert_eq!(call("tostring", vec![Value::Bool(true)]), s("true"));
        assert_eq!(call("tonumber", vec![s("1.5")]), n(1.5));
        assert_eq!(call("tobool", vec![s("false")]), Value::Bool(false));
        assert_eq!(call("tostring", vec![Value::Null]), Value::Null);
        call_err("tostring", vec![list(vec![])]);
        call_err("tonumber", vec![s("abc")]);
    }

    #[test]
    fn test_collection_conversions() {
        let set = call("toset", vec![list(vec![s("b"), s("a"), s("b")])]);
        assert_eq!(set, Value::set([s("a"), s("b")]));
        assert_eq!(call("tolist", vec![set]), list(vec![s("a"), s("b")]));
        let m = call("tomap", vec![Value::object([("a".to_string(), s("b"))])]);
        assert!(matches!(m, Value::Map(_)));
    }

    #[test]
    fn test_sensitivity_is_transparent() {
        assert_eq!(call("sensitive", vec![s("x")]), s("x"));
        assert_eq!(call("issensitive", vec![s("x")]), Value::Bool(false));
    }
}
