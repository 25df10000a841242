//! Expression evaluation
//!
//! Evaluation stops at the first error in an expression and reports it as a
//! single [`Diagnostic`] pointing at the offending sub-expression.

use std::collections::BTreeMap;

use kubehcl_core::{Diagnostic, SourceRange, Value};
use kubehcl_syntax::{BinaryOp, Expr, ExprKind, TemplatePart, UnaryOp};

use super::Scope;
use crate::functions::{Functions, string_of, to_number};
use crate::suggestions::did_you_mean;

pub type EvalResult = Result<Value, Diagnostic>;

/// Evaluate `expr` against `scope`
pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> EvalResult {
    eval(expr, scope, None)
}

fn error(summary: &str, detail: impl Into<String>, range: &SourceRange) -> Diagnostic {
    Diagnostic::error(summary, detail).with_subject(range)
}

/// `item` is the current element while evaluating the tail of a splat
fn eval(expr: &Expr, scope: &Scope<'_>, item: Option<&Value>) -> EvalResult {
    let range = &expr.range;
    match &expr.kind {
        ExprKind::Literal(v) => Ok(v.clone()),
        ExprKind::Parens(inner) => eval(inner, scope, item),
        ExprKind::Template(parts) => {
            let mut out = String::new();
            render_parts(parts, scope, item, &mut out)?;
            Ok(Value::String(out))
        }
        ExprKind::Tuple(items) => items
            .iter()
            .map(|e| eval(e, scope, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Tuple),
        ExprKind::Object(items) => {
            let mut out = BTreeMap::new();
            for (k, v) in items {
                let key = object_key(&eval(k, scope, item)?, &k.range)?;
                out.insert(key, eval(v, scope, item)?);
            }
            Ok(Value::Object(out))
        }
        ExprKind::Variable(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| unknown_variable(name, scope, range)),
        ExprKind::GetAttr { source, name } => {
            let value = eval(source, scope, item)?;
            get_attr(&value, name, range)
        }
        ExprKind::Index { source, key } => {
            let value = eval(source, scope, item)?;
            let key = eval(key, scope, item)?;
            index(&value, &key, range)
        }
        ExprKind::Splat { source, each } => {
            let elements = match eval(source, scope, item)? {
                Value::Null => return Ok(Value::Tuple(Vec::new())),
                Value::List(v) | Value::Tuple(v) | Value::Set(v) => v,
                other => vec![other],
            };
            elements
                .iter()
                .map(|el| eval(each, scope, Some(el)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        ExprKind::SplatItem => item.cloned().ok_or_else(|| {
            error(
                "Invalid splat expression",
                "A splat item can only be used inside a splat expression.",
                range,
            )
        }),
        ExprKind::Call {
            name,
            args,
            expand_final,
        } => call(name, args, *expand_final, scope, item, range),
        ExprKind::Unary { op, operand } => {
            let value = eval(operand, scope, item)?;
            unary(*op, &value, range)
        }
        ExprKind::Binary { op, lhs, rhs } => binary(*op, lhs, rhs, scope, item, range),
        ExprKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let value = eval(cond, scope, item)?;
            if value.is_null() {
                return Err(error(
                    "Null condition",
                    "The condition value is null. Conditions must either be true or false.",
                    &cond.range,
                ));
            }
            match truthy(&value) {
                Some(true) => eval(then, scope, item),
                Some(false) => eval(otherwise, scope, item),
                None => Err(error(
                    "Incorrect condition type",
                    "The condition expression must be of type bool.",
                    &cond.range,
                )),
            }
        }
        ExprKind::ForTuple {
            key_var,
            value_var,
            coll,
            value,
            cond,
        } => {
            let collection = eval(coll, scope, item)?;
            let mut out = Vec::new();
            for (k, v) in iterate(&collection, &coll.range)? {
                let mut inner = scope.child();
                if let Some(kv) = key_var {
                    inner.set(kv.clone(), k);
                }
                inner.set(value_var.clone(), v);
                if let Some(c) = cond
                    && !for_condition(c, &inner, item)?
                {
                    continue;
                }
                out.push(eval(value, &inner, item)?);
            }
            Ok(Value::Tuple(out))
        }
        ExprKind::ForObject {
            key_var,
            value_var,
            coll,
            key,
            value,
            cond,
            group,
        } => {
            let collection = eval(coll, scope, item)?;
            let mut single: BTreeMap<String, Value> = BTreeMap::new();
            let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for (k, v) in iterate(&collection, &coll.range)? {
                let mut inner = scope.child();
                if let Some(kv) = key_var {
                    inner.set(kv.clone(), k);
                }
                inner.set(value_var.clone(), v);
                if let Some(c) = cond
                    && !for_condition(c, &inner, item)?
                {
                    continue;
                }
                let name = object_key(&eval(key, &inner, item)?, &key.range)?;
                let val = eval(value, &inner, item)?;
                if *group {
                    grouped.entry(name).or_default().push(val);
                } else if single.contains_key(&name) {
                    return Err(error(
                        "Duplicate object key",
                        format!(
                            "Two different items produced the key {:?} in this 'for' expression. If duplicates are expected, use the ellipsis (...) after the value expression to enable grouping by key.",
                            name
                        ),
                        &key.range,
                    ));
                } else {
                    single.insert(name, val);
                }
            }
            if *group {
                Ok(Value::Object(
                    grouped
                        .into_iter()
                        .map(|(k, v)| (k, Value::Tuple(v)))
                        .collect(),
                ))
            } else {
                Ok(Value::Object(single))
            }
        }
    }
}

/// Bool value of a condition; `"true"`/`"false"` strings convert
fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s == "true" => Some(true),
        Value::String(s) if s == "false" => Some(false),
        _ => None,
    }
}

fn for_condition(cond: &Expr, scope: &Scope<'_>, item: Option<&Value>) -> Result<bool, Diagnostic> {
    let value = eval(cond, scope, item)?;
    truthy(&value).ok_or_else(|| {
        error(
            "Invalid 'for' condition",
            format!(
                "The 'if' clause value is invalid: bool required, got {}.",
                value.type_name()
            ),
            &cond.range,
        )
    })
}

/// Key/value pairs of a collection in iteration order
pub(crate) fn iterate(
    collection: &Value,
    range: &SourceRange,
) -> Result<Vec<(Value, Value)>, Diagnostic> {
    match collection {
        Value::Null => Err(error(
            "Iteration over null value",
            "A null value cannot be used as the collection in a 'for' expression.",
            range,
        )),
        Value::Set(items) => Ok(items.iter().map(|v| (v.clone(), v.clone())).collect()),
        Value::List(items) | Value::Tuple(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), v.clone()))
            .collect()),
        Value::Map(m) | Value::Object(m) => Ok(m
            .iter()
            .map(|(k, v)| (Value::string(k.as_str()), v.clone()))
            .collect()),
        other => Err(error(
            "Iteration over non-iterable value",
            format!(
                "A value of type {} cannot be used as the collection in a 'for' expression.",
                other.type_name()
            ),
            range,
        )),
    }
}

fn object_key(key: &Value, range: &SourceRange) -> Result<String, Diagnostic> {
    if key.is_null() {
        return Err(error(
            "Null value as key",
            "Can't use a null value as a key.",
            range,
        ));
    }
    string_of(key).ok_or_else(|| {
        error(
            "Incorrect key type",
            format!(
                "Can't use this value as a key: string required, got {}.",
                key.type_name()
            ),
            range,
        )
    })
}

fn unknown_variable(name: &str, scope: &Scope<'_>, range: &SourceRange) -> Diagnostic {
    let detail = match name {
        "count" => "The \"count\" object can only be used in \"module\" and \"kube_resource\" blocks, and only when the \"count\" argument is set.".to_string(),
        "each" => "The \"each\" object can only be used in \"module\" and \"kube_resource\" blocks, and only when the \"for_each\" argument is set.".to_string(),
        _ => {
            let names = scope.names();
            format!(
                "There is no variable named {:?}.{}",
                name,
                did_you_mean(name, names.iter().map(String::as_str))
            )
        }
    };
    error("Unknown variable", detail, range)
}

fn get_attr(value: &Value, name: &str, range: &SourceRange) -> EvalResult {
    match value {
        Value::Map(m) | Value::Object(m) => m.get(name).cloned().ok_or_else(|| {
            error(
                "Unsupported attribute",
                format!(
                    "This object does not have an attribute named {:?}.{}",
                    name,
                    did_you_mean(name, m.keys().map(String::as_str))
                ),
                range,
            )
        }),
        Value::Null => Err(error(
            "Attempt to get attribute from null value",
            "This value is null, so it does not have any attributes.",
            range,
        )),
        Value::List(_) | Value::Tuple(_) | Value::Set(_) => Err(error(
            "Unsupported attribute",
            "Can't access attributes on a list of objects. Did you mean to access an attribute for a specific element of the list, or across all elements of the list?",
            range,
        )),
        other => Err(error(
            "Unsupported attribute",
            format!(
                "Can't access attributes on a primitive-typed value ({}).",
                other.type_name()
            ),
            range,
        )),
    }
}

fn index(value: &Value, key: &Value, range: &SourceRange) -> EvalResult {
    let missing = || {
        error(
            "Invalid index",
            "The given key does not identify an element in this collection value.",
            range,
        )
    };
    if value.is_null() {
        return Err(error(
            "Attempt to index null value",
            "This value is null, so it does not have any indices.",
            range,
        ));
    }
    if key.is_null() {
        return Err(error(
            "Invalid index",
            "Can't use a null value as an indexing key.",
            range,
        ));
    }
    match value {
        Value::List(items) | Value::Tuple(items) => {
            let n = to_number(key).ok_or_else(|| {
                error(
                    "Invalid index",
                    "The given key does not identify an element in this collection value: a number is required.",
                    range,
                )
            })?;
            if n.fract() != 0.0 || n < 0.0 {
                return Err(missing());
            }
            items.get(n as usize).cloned().ok_or_else(missing)
        }
        Value::Set(_) => Err(error(
            "Invalid index",
            "Elements of a set are identified only by their value and don't have any separate index or key to select with, so it's only possible to perform operations across all elements of the set.",
            range,
        )),
        Value::Map(m) | Value::Object(m) => {
            let k = string_of(key).ok_or_else(|| {
                error(
                    "Invalid index",
                    "The given key does not identify an element in this collection value: a string is required.",
                    range,
                )
            })?;
            m.get(&k).cloned().ok_or_else(missing)
        }
        _ => Err(error(
            "Invalid index",
            "This value does not have any indices.",
            range,
        )),
    }
}

fn call(
    name: &str,
    args: &[Expr],
    expand_final: bool,
    scope: &Scope<'_>,
    item: Option<&Value>,
    range: &SourceRange,
) -> EvalResult {
    match name {
        "try" => return eval_try(args, scope, item, range),
        "can" => return eval_can(args, scope, item, range),
        _ => {}
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, scope, item)?);
    }
    if expand_final && let Some(last) = values.pop() {
        let detail = match &last {
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                values.extend(items.iter().cloned());
                None
            }
            Value::Null => Some("The expanding argument (indicated by ...) must not be null."),
            _ => Some(
                "The expanding argument (indicated by ...) must be of a tuple, list, or set type.",
            ),
        };
        if let Some(detail) = detail {
            let arg_range = args.last().map(|a| &a.range).unwrap_or(range);
            return Err(error("Invalid expanding argument value", detail, arg_range));
        }
    }

    match scope.functions().call(name, &values) {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(error(
            "Error in function call",
            format!("Call to function {:?} failed: {}.", name, e),
            range,
        )),
        None => Err(error(
            "Call to unknown function",
            format!(
                "There is no function named {:?}.{}",
                name,
                did_you_mean(name, Functions::names())
            ),
            range,
        )),
    }
}

/// `try(a, b, ...)`: the first argument that evaluates without error
fn eval_try(args: &[Expr], scope: &Scope<'_>, item: Option<&Value>, range: &SourceRange) -> EvalResult {
    if args.is_empty() {
        return Err(error(
            "Error in function call",
            "Call to function \"try\" failed: at least one argument is required.",
            range,
        ));
    }
    let mut failures = Vec::new();
    for arg in args {
        match eval(arg, scope, item) {
            Ok(value) => return Ok(value),
            Err(diag) => failures.push(diag),
        }
    }
    let mut detail = String::from("Call to function \"try\" failed: no expression succeeded:\n");
    for diag in &failures {
        detail.push_str(&format!("- {}\n  {}\n", diag.summary, diag.detail));
    }
    detail.push_str("\nAt least one expression must produce a successful result.");
    Err(error("Error in function call", detail, range))
}

/// `can(expr)`: whether `expr` evaluates without error
fn eval_can(args: &[Expr], scope: &Scope<'_>, item: Option<&Value>, range: &SourceRange) -> EvalResult {
    match args {
        [arg] => Ok(Value::Bool(eval(arg, scope, item).is_ok())),
        _ => Err(error(
            "Error in function call",
            format!(
                "Call to function \"can\" failed: expected 1 argument, got {}.",
                args.len()
            ),
            range,
        )),
    }
}

fn unary(op: UnaryOp, value: &Value, range: &SourceRange) -> EvalResult {
    match op {
        UnaryOp::Not => truthy(value).map(|b| Value::Bool(!b)).ok_or_else(|| {
            error(
                "Invalid operand",
                "Unsuitable value for unary operand: bool required.",
                range,
            )
        }),
        UnaryOp::Negate => to_number(value).map(|n| Value::Number(-n)).ok_or_else(|| {
            error(
                "Invalid operand",
                "Unsuitable value for unary operand: number required.",
                range,
            )
        }),
    }
}

fn binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: &Scope<'_>,
    item: Option<&Value>,
    range: &SourceRange,
) -> EvalResult {
    let operand_bool = |e: &Expr, side: &str| -> Result<bool, Diagnostic> {
        let value = eval(e, scope, item)?;
        truthy(&value).ok_or_else(|| {
            error(
                "Invalid operand",
                format!("Unsuitable value for {} operand: bool required.", side),
                &e.range,
            )
        })
    };

    match op {
        BinaryOp::And => {
            if !operand_bool(lhs, "left")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(operand_bool(rhs, "right")?))
        }
        BinaryOp::Or => {
            if operand_bool(lhs, "left")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(operand_bool(rhs, "right")?))
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            let l = eval(lhs, scope, item)?;
            let r = eval(rhs, scope, item)?;
            let eq = l.equals(&r);
            Ok(Value::Bool(if op == BinaryOp::Equal { eq } else { !eq }))
        }
        _ => {
            let operand_number = |e: &Expr, side: &str| -> Result<f64, Diagnostic> {
                let value = eval(e, scope, item)?;
                to_number(&value).ok_or_else(|| {
                    error(
                        "Invalid operand",
                        format!(
                            "Unsuitable value for {} operand: a number is required, got {}.",
                            side,
                            value.type_name()
                        ),
                        &e.range,
                    )
                })
            };
            let l = operand_number(lhs, "left")?;
            let r = operand_number(rhs, "right")?;
            let divide_by_zero = || {
                error(
                    "Operation failed",
                    "Error during operation: can't divide by zero.",
                    range,
                )
            };
            Ok(match op {
                BinaryOp::Add => Value::Number(l + r),
                BinaryOp::Subtract => Value::Number(l - r),
                BinaryOp::Multiply => Value::Number(l * r),
                BinaryOp::Divide if r == 0.0 => return Err(divide_by_zero()),
                BinaryOp::Divide => Value::Number(l / r),
                BinaryOp::Modulo if r == 0.0 => return Err(divide_by_zero()),
                BinaryOp::Modulo => Value::Number(l % r),
                BinaryOp::Less => Value::Bool(l < r),
                BinaryOp::Greater => Value::Bool(l > r),
                BinaryOp::LessOrEqual => Value::Bool(l <= r),
                BinaryOp::GreaterOrEqual => Value::Bool(l >= r),
                BinaryOp::And | BinaryOp::Or | BinaryOp::Equal | BinaryOp::NotEqual => {
                    unreachable!("handled above")
                }
            })
        }
    }
}

fn render_parts(
    parts: &[TemplatePart],
    scope: &Scope<'_>,
    item: Option<&Value>,
    out: &mut String,
) -> Result<(), Diagnostic> {
    for part in parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(text),
            TemplatePart::Interp(expr) => {
                let value = eval(expr, scope, item)?;
                let text = value.to_template_string().map_err(|e| {
                    error(
                        "Invalid template interpolation value",
                        format!("Cannot include the given value in a string template: {}.", e),
                        &expr.range,
                    )
                })?;
                out.push_str(&text);
            }
            TemplatePart::If {
                cond,
                then,
                otherwise,
            } => {
                let value = eval(cond, scope, item)?;
                match truthy(&value) {
                    Some(true) => render_parts(then, scope, item, out)?,
                    Some(false) => render_parts(otherwise, scope, item, out)?,
                    None => {
                        return Err(error(
                            "Invalid template if directive",
                            "The condition value must be of type bool.",
                            &cond.range,
                        ));
                    }
                }
            }
            TemplatePart::For {
                key_var,
                value_var,
                coll,
                body,
            } => {
                let collection = eval(coll, scope, item)?;
                for (k, v) in iterate(&collection, &coll.range)? {
                    let mut inner = scope.child();
                    if let Some(kv) = key_var {
                        inner.set(kv.clone(), k);
                    }
                    inner.set(value_var.clone(), v);
                    render_parts(body, &inner, item, out)?;
                }
            }
        }
    }
    Ok(())
}
