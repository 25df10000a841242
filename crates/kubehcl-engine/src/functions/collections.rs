//! Collection functions

use std::collections::BTreeMap;

use kubehcl_core::Value;

use super::{Args, FnResult, FunctionError, Functions, string_of};

/// Upper bound on the number of elements `range` may produce
const MAX_RANGE_ELEMENTS: usize = 1024;

fn bools(a: &Args<'_>, i: usize) -> Result<Vec<bool>, FunctionError> {
    a.seq(i)?
        .iter()
        .map(|v| match v {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s == "true" => Ok(true),
            Value::String(s) if s == "false" => Ok(false),
            other => Err(FunctionError::failed(format!(
                "list of bool required, got element of type {}",
                other.type_name()
            ))),
        })
        .collect()
}

/// Usage: alltrue([true, var.enabled])
pub(crate) fn alltrue(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::Bool(bools(&a, 0)?.into_iter().all(|b| b)))
}

/// Usage: anytrue([false, var.enabled])
pub(crate) fn anytrue(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::Bool(bools(&a, 0)?.into_iter().any(|b| b)))
}

/// Usage: chunklist(["a", "b", "c"], 2)
pub(crate) fn chunklist(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let items = a.seq(0)?;
    let size = a.integer(1)?;
    if size < 0 {
        return Err(FunctionError::Argument {
            index: 2,
            message: "the size argument must be positive".to_string(),
        });
    }
    if size == 0 || items.is_empty() {
        return Ok(Value::List(vec![Value::List(items.to_vec())]));
    }
    Ok(Value::List(
        items
            .chunks(size as usize)
            .map(|c| Value::List(c.to_vec()))
            .collect(),
    ))
}

/// Usage: coalesce(var.name, "default")
pub(crate) fn coalesce(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    a.all()
        .iter()
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .cloned()
        .ok_or_else(|| FunctionError::failed("no non-null, non-empty-string arguments"))
}

/// Usage: coalescelist([], ["a"])
pub(crate) fn coalescelist(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    for i in 0..a.len() {
        if a.value(i).is_null() {
            continue;
        }
        if !a.seq(i)?.is_empty() {
            return Ok(a.value(i).clone());
        }
    }
    Err(FunctionError::failed("no non-null arguments"))
}

/// Usage: compact(["a", "", null, "b"])
pub(crate) fn compact(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let mut out = Vec::new();
    for item in a.seq(0)? {
        match item {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            other => out.push(Value::string(string_of(other).ok_or_else(|| {
                FunctionError::failed("compact requires a list of strings")
            })?)),
        }
    }
    Ok(Value::List(out))
}

/// Usage: concat(["a"], ["b", "c"])
pub(crate) fn concat(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    let mut out = Vec::new();
    for i in 0..a.len() {
        out.extend(a.seq(i)?.iter().cloned());
    }
    Ok(Value::Tuple(out))
}

/// Usage: contains(["a", "b"], "a")
pub(crate) fn contains(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let needle = a.value(1);
    Ok(Value::Bool(a.seq(0)?.iter().any(|v| v.equals(needle))))
}

/// Usage: distinct(["a", "b", "a"])
pub(crate) fn distinct(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let mut out: Vec<Value> = Vec::new();
    for item in a.seq(0)? {
        if !out.iter().any(|v| v.equals(item)) {
            out.push(item.clone());
        }
    }
    Ok(Value::List(out))
}

/// Usage: element(["a", "b"], 3)
pub(crate) fn element(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let items = a.seq(0)?;
    let index = a.integer(1)?;
    if items.is_empty() {
        return Err(FunctionError::failed("cannot use element function with an empty list"));
    }
    if index < 0 {
        return Err(FunctionError::failed("cannot use element function with a negative index"));
    }
    Ok(items[index as usize % items.len()].clone())
}

fn flatten_into(items: &[Value], out: &mut Vec<Value>) {
    for item in items {
        match item.as_sequence() {
            Some(inner) => flatten_into(inner, out),
            None => out.push(item.clone()),
        }
    }
}

/// Usage: flatten([["a"], [["b"]]])
pub(crate) fn flatten(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let mut out = Vec::new();
    flatten_into(a.seq(0)?, &mut out);
    Ok(Value::Tuple(out))
}

/// Usage: index(["a", "b"], "b")
pub(crate) fn index(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let needle = a.value(1);
    a.seq(0)?
        .iter()
        .position(|v| v.equals(needle))
        .map(Value::from)
        .ok_or_else(|| FunctionError::failed("item not found"))
}

/// Usage: keys({a = 1, b = 2})
pub(crate) fn keys(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::List(
        a.mapping(0)?.keys().map(|k| Value::string(k.as_str())).collect(),
    ))
}

/// Usage: values({a = 1, b = 2})
pub(crate) fn values(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::Tuple(a.mapping(0)?.values().cloned().collect()))
}

/// Usage: length(["a", "b"])
pub(crate) fn length(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    a.value(0)
        .length()
        .map(Value::from)
        .ok_or_else(|| FunctionError::Argument {
            index: 1,
            message: format!(
                "argument must be a string, a collection type, or a structural type, got {}",
                a.value(0).type_name()
            ),
        })
}

/// Usage: list("a", "b")
pub(crate) fn list(_: &Functions, args: &[Value]) -> FnResult {
    Ok(Value::List(args.to_vec()))
}

/// Usage: map("a", 1, "b", 2)
pub(crate) fn map(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 2)?;
    if a.len() % 2 != 0 {
        return Err(FunctionError::failed(
            "map requires an even number of arguments, as key/value pairs",
        ));
    }
    let mut out = BTreeMap::new();
    for i in (0..a.len()).step_by(2) {
        out.insert(a.string(i)?, a.value(i + 1).clone());
    }
    Ok(Value::Map(out))
}

/// Usage: lookup({a = 1}, "b", 0)
pub(crate) fn lookup(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::between(args, 2, 3)?;
    let key = a.string(1)?;
    match a.mapping(0)?.get(&key) {
        Some(v) => Ok(v.clone()),
        None if a.len() == 3 => Ok(a.value(2).clone()),
        None => Err(FunctionError::failed(format!(
            "lookup failed to find key {:?}",
            key
        ))),
    }
}

/// Usage: matchkeys(["i-1", "i-2"], ["us", "eu"], ["eu"])
pub(crate) fn matchkeys(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 3)?;
    let values = a.seq(0)?;
    let keys = a.seq(1)?;
    let search = a.seq(2)?;
    if values.len() != keys.len() {
        return Err(FunctionError::failed(
            "length of keys and values should be equal",
        ));
    }
    Ok(Value::List(
        values
            .iter()
            .zip(keys)
            .filter(|(_, k)| search.iter().any(|s| s.equals(k)))
            .map(|(v, _)| v.clone())
            .collect(),
    ))
}

/// Usage: merge({a = 1}, {b = 2})
pub(crate) fn merge(_: &Functions, args: &[Value]) -> FnResult {
    let mut out = BTreeMap::new();
    for (i, arg) in args.iter().enumerate() {
        match arg {
            Value::Null => {}
            Value::Map(m) | Value::Object(m) => {
                out.extend(m.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            other => {
                return Err(FunctionError::Argument {
                    index: i + 1,
                    message: format!("map required, got {}", other.type_name()),
                });
            }
        }
    }
    Ok(Value::Object(out))
}

/// Usage: one(["a"])
pub(crate) fn one(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    if a.value(0).is_null() {
        return Err(FunctionError::failed("argument must not be null"));
    }
    match a.seq(0)? {
        [] => Ok(Value::Null),
        [only] => Ok(only.clone()),
        _ => Err(FunctionError::failed(
            "must be a list, set, or tuple value with either zero or one elements",
        )),
    }
}

/// Usage: range(1, 10, 2)
pub(crate) fn range(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::between(args, 1, 3)?;
    let (start, limit, step) = match a.len() {
        1 => (0.0, a.number(0)?, 1.0),
        2 => {
            let start = a.number(0)?;
            let limit = a.number(1)?;
            (start, limit, if limit < start { -1.0 } else { 1.0 })
        }
        _ => (a.number(0)?, a.number(1)?, a.number(2)?),
    };
    if step == 0.0 {
        return Err(FunctionError::failed("step must not be zero"));
    }
    if (step > 0.0 && limit < start) || (step < 0.0 && limit > start) {
        return Err(FunctionError::failed(
            "step has the wrong sign for the given start and limit",
        ));
    }

    let mut out = Vec::new();
    let mut current = start;
    while (step > 0.0 && current < limit) || (step < 0.0 && current > limit) {
        if out.len() >= MAX_RANGE_ELEMENTS {
            return Err(FunctionError::failed(format!(
                "more than {} values were generated; either decrease the difference between start and end or use a smaller step",
                MAX_RANGE_ELEMENTS
            )));
        }
        out.push(Value::Number(current));
        current += step;
    }
    Ok(Value::List(out))
}

/// Usage: reverse(["a", "b"])
pub(crate) fn reverse(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::Tuple(a.seq(0)?.iter().rev().cloned().collect()))
}

/// Usage: setintersection(["a", "b"], ["b"])
pub(crate) fn setintersection(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    let first = a.seq(0)?;
    let mut rest = Vec::new();
    for i in 1..a.len() {
        rest.push(a.seq(i)?);
    }
    Ok(Value::set(
        first
            .iter()
            .filter(|v| rest.iter().all(|other| other.iter().any(|o| o.equals(v))))
            .cloned(),
    ))
}

/// Usage: setproduct(["a", "b"], [1, 2])
pub(crate) fn setproduct(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    let mut product: Vec<Vec<Value>> = vec![Vec::new()];
    for i in 0..a.len() {
        let items = a.seq(i)?;
        let mut next = Vec::with_capacity(product.len() * items.len());
        for prefix in &product {
            for item in items {
                let mut row = prefix.clone();
                row.push(item.clone());
                next.push(row);
            }
        }
        product = next;
    }
    Ok(Value::List(product.into_iter().map(Value::Tuple).collect()))
}

/// Usage: setsubtract(["a", "b"], ["a"])
pub(crate) fn setsubtract(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let remove = a.seq(1)?;
    Ok(Value::set(
        a.seq(0)?
            .iter()
            .filter(|v| !remove.iter().any(|r| r.equals(v)))
            .cloned(),
    ))
}

/// Usage: setunion(["a"], ["b"])
pub(crate) fn setunion(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    let mut all = Vec::new();
    for i in 0..a.len() {
        all.extend(a.seq(i)?.iter().cloned());
    }
    Ok(Value::set(all))
}

/// Usage: slice(["a", "b", "c"], 1, 3)
pub(crate) fn slice(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 3)?;
    let items = a.seq(0)?;
    let start = a.integer(1)?;
    let end = a.integer(2)?;
    if start < 0 {
        return Err(FunctionError::Argument {
            index: 2,
            message: "start index must not be less than zero".to_string(),
        });
    }
    if end as usize > items.len() || end < 0 {
        return Err(FunctionError::Argument {
            index: 3,
            message: "end index must not be greater than the length of the list".to_string(),
        });
    }
    if start > end {
        return Err(FunctionError::Argument {
            index: 2,
            message: "start index must not be greater than end index".to_string(),
        });
    }
    Ok(Value::List(items[start as usize..end as usize].to_vec()))
}

/// Usage: sort(["b", "a"])
pub(crate) fn sort(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let mut items = a.strings(0)?;
    items.sort();
    Ok(Value::List(items.into_iter().map(Value::string).collect()))
}

/// Usage: transpose({a = ["1", "2"], b = ["2"]})
pub(crate) fn transpose(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let mut out: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (key, list) in a.mapping(0)? {
        let items = list.as_sequence().ok_or_else(|| {
            FunctionError::failed("input must be a map of lists of strings")
        })?;
        for item in items {
            let name = string_of(item).ok_or_else(|| {
                FunctionError::failed("input must be a map of lists of strings")
            })?;
            out.entry(name).or_default().push(Value::string(key.as_str()));
        }
    }
    Ok(Value::Map(
        out.into_iter().map(|(k, v)| (k, Value::List(v))).collect(),
    ))
}

/// Usage: zipmap(["a", "b"], [1, 2])
pub(crate) fn zipmap(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let keys = a.strings(0)?;
    let values = a.seq(1)?;
    if keys.len() != values.len() {
        return Err(FunctionError::failed(format!(
            "number of keys ({}) does not match number of values ({})",
            keys.len(),
            values.len()
        )));
    }
    Ok(Value::Object(
        keys.into_iter().zip(values.iter().cloned()).collect(),
    ))
}
