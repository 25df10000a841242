//! Type constraints declared on variables and their conversion rules

use std::collections::BTreeMap;
use std::fmt;

use crate::value::{Value, format_number};

/// An attribute of an `object({...})` constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttr {
    pub ty: TypeConstraint,
    /// Declared with `optional(...)`
    pub optional: bool,
    /// Default for an optional attribute that is absent or null
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypeConstraint {
    #[default]
    Any,
    String,
    Number,
    Bool,
    List(Box<TypeConstraint>),
    Set(Box<TypeConstraint>),
    Map(Box<TypeConstraint>),
    Tuple(Vec<TypeConstraint>),
    Object(BTreeMap<String, ObjectAttr>),
}

impl TypeConstraint {
    /// Convert `value` to conform to this constraint
    ///
    /// Null is accepted by every constraint. The error string describes the
    /// first mismatch, with a path prefix for nested failures.
    pub fn convert(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            TypeConstraint::Any => Ok(value.clone()),
            TypeConstraint::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(format_number(*n))),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(format!("string required, got {}", other.type_name())),
            },
            TypeConstraint::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| format!("a number is required, got string {:?}", s)),
                other => Err(format!("number required, got {}", other.type_name())),
            },
            TypeConstraint::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) if s == "true" => Ok(Value::Bool(true)),
                Value::String(s) if s == "false" => Ok(Value::Bool(false)),
                other => Err(format!("bool required, got {}", other.type_name())),
            },
            TypeConstraint::List(elem) => {
                let items = sequence_or_err(value, "list")?;
                Ok(Value::List(convert_all(elem, items)?))
            }
            TypeConstraint::Set(elem) => {
                let items = sequence_or_err(value, "set")?;
                Ok(Value::set(convert_all(elem, items)?))
            }
            TypeConstraint::Map(elem) => {
                let map = value
                    .as_mapping()
                    .ok_or_else(|| format!("map required, got {}", value.type_name()))?;
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let converted = elem.convert(v).map_err(|e| format!("[{:?}]: {}", k, e))?;
                    out.insert(k.clone(), converted);
                }
                Ok(Value::Map(out))
            }
            TypeConstraint::Tuple(elems) => {
                let items = sequence_or_err(value, "tuple")?;
                if items.len() != elems.len() {
                    return Err(format!(
                        "tuple required with {} elements, got {}",
                        elems.len(),
                        items.len()
                    ));
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, (ty, item)) in elems.iter().zip(items).enumerate() {
                    out.push(ty.convert(item).map_err(|e| format!("[{}]: {}", i, e))?);
                }
                Ok(Value::Tuple(out))
            }
            TypeConstraint::Object(attrs) => {
                let map = value
                    .as_mapping()
                    .ok_or_else(|| format!("object required, got {}", value.type_name()))?;
                let mut out = BTreeMap::new();
                for (name, attr) in attrs {
                    match map.get(name).filter(|v| !v.is_null()) {
                        Some(v) => {
                            let converted =
                                attr.ty.convert(v).map_err(|e| format!(".{}: {}", name, e))?;
                            out.insert(name.clone(), converted);
                        }
                        None if attr.optional => {
                            let default = attr.default.clone().unwrap_or(Value::Null);
                            out.insert(name.clone(), default);
                        }
                        None => return Err(format!("attribute {:?} is required", name)),
                    }
                }
                Ok(Value::Object(out))
            }
        }
    }
}

fn sequence_or_err<'a>(value: &'a Value, wanted: &str) -> Result<&'a [Value], String> {
    value
        .as_sequence()
        .ok_or_else(|| format!("{} required, got {}", wanted, value.type_name()))
}

fn convert_all(elem: &TypeConstraint, items: &[Value]) -> Result<Vec<Value>, String> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| elem.convert(item).map_err(|e| format!("[{}]: {}", i, e)))
        .collect()
}

impl fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeConstraint::Any => write!(f, "any"),
            TypeConstraint::String => write!(f, "string"),
            TypeConstraint::Number => write!(f, "number"),
            TypeConstraint::Bool => write!(f, "bool"),
            TypeConstraint::List(e) => write!(f, "list({})", e),
            TypeConstraint::Set(e) => write!(f, "set({})", e),
            TypeConstraint::Map(e) => write!(f, "map({})", e),
            TypeConstraint::Tuple(elems) => {
                let parts: Vec<String> = elems.iter().map(ToString::to_string).collect();
                write!(f, "tuple([{}])", parts.join(", "))
            }
            TypeConstraint::Object(attrs) => {
                let parts: Vec<String> = attrs
                    .iter()
                    .map(|(k, a)| {
                        if a.optional {
                            format!("{} = optional({})", k, a.ty)
                        } else {
                            format!("{} = {}", k, a.ty)
                        }
                    })
                    .collect();
                write!(f, "object({{{}}})", parts.join(", "))
            }
        }
    }
}
