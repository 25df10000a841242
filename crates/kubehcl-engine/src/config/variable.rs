//! `variable` blocks and type expressions

use std::collections::BTreeMap;

use kubehcl_core::types::ObjectAttr;
use kubehcl_core::{Address, AddrKind, AddressMap, Diagnostic, Diagnostics, SourceRange, TypeConstraint};
use kubehcl_syntax::{Block, Expr, ExprKind};

use super::{allowed_attributes, constant_string, just_attributes, single_label};

/// Names reserved for module call arguments
const RESERVED_NAMES: &[&str] = &["version", "source"];

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub description: Option<String>,
    pub type_constraint: TypeConstraint,
    /// Default from the declaration, or the value assigned by a vars file,
    /// `--var` or the calling module
    pub default: Option<Expr>,
    pub decl_range: SourceRange,
}

impl Variable {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Decode every `variable` block of a file, keyed by name
pub fn decode_variable_blocks<'a>(
    blocks: impl Iterator<Item = &'a Block>,
    addrs: &mut AddressMap,
    diags: &mut Diagnostics,
) -> BTreeMap<String, Variable> {
    let mut out = BTreeMap::new();
    for block in blocks {
        let Some(variable) = decode_variable_block(block, diags) else {
            continue;
        };
        let addr = Address::new(AddrKind::Variable, variable.name.clone());
        if addrs.insert(addr, &variable.decl_range).is_err() {
            diags.error(
                "Variables must have different names",
                format!("Two variables have the same name: {}", variable.name),
                &block.header_range(),
            );
            continue;
        }
        out.insert(variable.name.clone(), variable);
    }
    out
}

fn decode_variable_block(block: &Block, diags: &mut Diagnostics) -> Option<Variable> {
    let name = single_label(block, diags)?;
    let decl_range = block.header_range();

    if RESERVED_NAMES.contains(&name) {
        diags.error(
            "Invalid variable name",
            format!(
                "Variable name {} is reserved for internal use, please use other name",
                name
            ),
            &decl_range,
        );
    }

    allowed_attributes(&block.body, &["type", "default", "description"], diags);
    just_attributes(&block.body, diags);

    let description = block
        .body
        .attribute("description")
        .and_then(|attr| match constant_string(&attr.expr, "Description") {
            Ok(s) => Some(s),
            Err(d) => {
                diags.push(d);
                None
            }
        });

    let type_constraint = match block.body.attribute("type") {
        Some(attr) => parse_type_expr(&attr.expr).unwrap_or_else(|d| {
            diags.push(d);
            TypeConstraint::Any
        }),
        None => TypeConstraint::Any,
    };

    Some(Variable {
        name: name.to_string(),
        description,
        type_constraint,
        default: block.body.attribute("default").map(|a| a.expr.clone()),
        decl_range,
    })
}

fn invalid_type(detail: impl Into<String>, range: &SourceRange) -> Diagnostic {
    Diagnostic::error("Invalid type specification", detail).with_subject(range)
}

/// Parse a type expression such as `list(object({ name = string }))`
pub fn parse_type_expr(expr: &Expr) -> Result<TypeConstraint, Diagnostic> {
    match &expr.kind {
        ExprKind::Parens(inner) => parse_type_expr(inner),
        ExprKind::Variable(keyword) => match keyword.as_str() {
            "string" => Ok(TypeConstraint::String),
            "number" => Ok(TypeConstraint::Number),
            "bool" => Ok(TypeConstraint::Bool),
            "any" => Ok(TypeConstraint::Any),
            "list" | "set" | "map" => Err(invalid_type(
                format!(
                    "The {} type constructor requires one argument specifying the element type.",
                    keyword
                ),
                &expr.range,
            )),
            other => Err(invalid_type(
                format!("The keyword {:?} is not a valid type specification.", other),
                &expr.range,
            )),
        },
        ExprKind::Call { name, args, .. } => match (name.as_str(), args.as_slice()) {
            ("list", [elem]) => Ok(TypeConstraint::List(Box::new(parse_type_expr(elem)?))),
            ("set", [elem]) => Ok(TypeConstraint::Set(Box::new(parse_type_expr(elem)?))),
            ("map", [elem]) => Ok(TypeConstraint::Map(Box::new(parse_type_expr(elem)?))),
            ("tuple", [elems]) => match &elems.kind {
                ExprKind::Tuple(items) => items
                    .iter()
                    .map(parse_type_expr)
                    .collect::<Result<Vec<_>, _>>()
                    .map(TypeConstraint::Tuple),
                _ => Err(invalid_type(
                    "The tuple type constructor requires a list of element types.",
                    &elems.range,
                )),
            },
            ("object", [attrs]) => match &attrs.kind {
                ExprKind::Object(items) => {
                    let mut out = BTreeMap::new();
                    for (key, value) in items {
                        let key = match key.static_value() {
                            Some(kubehcl_core::Value::String(s)) => s,
                            _ => {
                                return Err(invalid_type(
                                    "Object constructor map keys must be attribute names.",
                                    &key.range,
                                ));
                            }
                        };
                        out.insert(key, parse_object_attr(value)?);
                    }
                    Ok(TypeConstraint::Object(out))
                }
                _ => Err(invalid_type(
                    "The object type constructor requires one argument specifying the attribute types as a map.",
                    &attrs.range,
                )),
            },
            ("optional", _) => Err(invalid_type(
                "Keyword \"optional\" is valid only as a modifier for object type attributes.",
                &expr.range,
            )),
            (ctor @ ("list" | "set" | "map" | "tuple" | "object"), _) => Err(invalid_type(
                format!("The {} type constructor requires one argument.", ctor),
                &expr.range,
            )),
            (other, _) => Err(invalid_type(
                format!("Keyword {:?} is not a valid type constructor.", other),
                &expr.range,
            )),
        },
        _ => Err(invalid_type(
            "A type specification is either a primitive type keyword (bool, number, string) or a complex type constructor call, like list(string).",
            &expr.range,
        )),
    }
}

fn parse_object_attr(expr: &Expr) -> Result<ObjectAttr, Diagnostic> {
    let ExprKind::Call { name, args, .. } = &expr.kind else {
        return Ok(ObjectAttr {
            ty: parse_type_expr(expr)?,
            optional: false,
            default: None,
        });
    };
    if name != "optional" {
        return Ok(ObjectAttr {
            ty: parse_type_expr(expr)?,
            optional: false,
            default: None,
        });
    }
    match args.as_slice() {
        [ty] => Ok(ObjectAttr {
            ty: parse_type_expr(ty)?,
            optional: true,
            default: None,
        }),
        [ty, default] => {
            let ty = parse_type_expr(ty)?;
            let value = default.static_value().ok_or_else(|| {
                invalid_type(
                    "The default value of an optional attribute must be a constant.",
                    &default.range,
                )
            })?;
            let value = ty.convert(&value).map_err(|e| {
                invalid_type(
                    format!("Invalid default value for optional attribute: {}.", e),
                    &default.range,
                )
            })?;
            Ok(ObjectAttr {
                ty,
                optional: true,
                default: Some(value),
            })
        }
        _ => Err(invalid_type(
            "Optional attribute modifier expects one or two arguments: the attribute type and an optional default value.",
            &expr.range,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_core::Value;
    use kubehcl_syntax::{parse_expression, parse_file};

    fn ty(src: &str) -> Result<TypeConstraint, Diagnostic> {
        parse_type_expr(&parse_expression(src, "t.hcl").unwrap())
    }

    fn decode(src: &str) -> (BTreeMap<String, Variable>, Diagnostics) {
        let (body, mut diags) = parse_file(src, "vars.hcl");
        let mut addrs = AddressMap::new();
        let vars = decode_variable_blocks(body.blocks_of("variable"), &mut addrs, &mut diags);
        (vars, diags)
    }

    #[test]
    fn test_primitive_and_collection_types() {
        assert_eq!(ty("string").unwrap(), TypeConstraint::String);
        assert_eq!(
            ty("list(number)").unwrap(),
            TypeConstraint::List(Box::new(TypeConstraint::Number))
        );
        assert_eq!(
            ty("tuple([string, bool])").unwrap(),
            TypeConstraint::Tuple(vec![TypeConstraint::String, TypeConstraint::Bool])
        );
        assert!(ty("list").is_err());
        assert!(ty("strin").is_err());
        assert!(ty("optional(string)").is_err());
    }

    #[test]
    fn test_object_with_optional_attrs() {
        let TypeConstraint::Object(attrs) = ty("object({ name = string, port = optional(number, 80) })").unwrap() else {
            panic!("expected object type");
        };
        assert!(!attrs["name"].optional);
        assert!(attrs["port"].optional);
        assert_eq!(attrs["port"].default, Some(Value::from(80i64)));
    }

    #[test]
    fn test_variable_block() {
        let (vars, diags) = decode(
            "variable \"replicas\" {\n  type = number\n  default = 2\n  description = \"pods\"\n}\n",
        );
        assert!(!diags.has_errors());
        let v = &vars["replicas"];
        assert!(v.has_default());
        assert_eq!(v.description.as_deref(), Some("pods"));
        assert_eq!(v.type_constraint, TypeConstraint::Number);
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let (_, diags) = decode("variable \"source\" {}\n");
        assert_eq!(diags.errors().next().unwrap().summary, "Invalid variable name");

        let (vars, diags) = decode("variable \"a\" {}\nvariable \"a\" {}\n");
        assert_eq!(vars.len(), 1);
        assert_eq!(
            diags.errors().next().unwrap().summary,
            "Variables must have different names"
        );
    }

    #[test]
    fn test_unknown_attribute() {
        let (_, diags) = decode("variable \"a\" {\n  defualt = 1\n}\n");
        let err = diags.errors().next().unwrap();
        assert_eq!(err.summary, "Unsupported argument");
        assert!(err.detail.contains("\"default\""));
    }
}
