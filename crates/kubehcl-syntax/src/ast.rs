//! Syntax tree for kubehcl configuration files
//!
//! A file is a [`Body`] of attributes and nested blocks. Attribute values
//! are [`Expr`] trees which are evaluated later against a scope.

use std::fmt;

use kubehcl_core::{SourceRange, Value};

/// Attributes and blocks of a file or block, in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
    pub range: SourceRange,
}

impl Body {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Blocks of the given type, in source order
    pub fn blocks_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.blocks.is_empty()
    }
}

/// `name = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub expr: Expr,
    pub name_range: SourceRange,
    pub range: SourceRange,
}

/// `kind "label" ... { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub label_ranges: Vec<SourceRange>,
    pub body: Body,
    pub type_range: SourceRange,
    pub range: SourceRange,
}

impl Block {
    /// Range covering the block header, used as diagnostic subject
    pub fn header_range(&self) -> SourceRange {
        match self.label_ranges.last() {
            Some(last) => self.type_range.to(last),
            None => self.type_range.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One step of a static reference such as `kube_resource.web`
#[derive(Debug, Clone, PartialEq)]
pub enum TraversalStep {
    Root(String),
    Attr(String),
    Index(Value),
}

/// An expression with the source range it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    /// String template with at least one interpolation or directive
    Template(Vec<TemplatePart>),
    Tuple(Vec<Expr>),
    /// Key/value pairs; bare identifier keys are already string literals
    Object(Vec<(Expr, Expr)>),
    Variable(String),
    GetAttr {
        source: Box<Expr>,
        name: String,
    },
    Index {
        source: Box<Expr>,
        key: Box<Expr>,
    },
    /// `source.*.x` / `source[*].x`; `each` is evaluated once per element
    /// with [`ExprKind::SplatItem`] bound to that element
    Splat {
        source: Box<Expr>,
        each: Box<Expr>,
    },
    SplatItem,
    Call {
        name: String,
        args: Vec<Expr>,
        /// `f(list...)`: the last argument is expanded into positional ones
        expand_final: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    ForTuple {
        key_var: Option<String>,
        value_var: String,
        coll: Box<Expr>,
        value: Box<Expr>,
        cond: Option<Box<Expr>>,
    },
    ForObject {
        key_var: Option<String>,
        value_var: String,
        coll: Box<Expr>,
        key: Box<Expr>,
        value: Box<Expr>,
        cond: Option<Box<Expr>>,
        /// `...` after the value: values sharing a key are grouped into lists
        group: bool,
    },
    Parens(Box<Expr>),
}

/// Piece of a string template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interp(Expr),
    If {
        cond: Expr,
        then: Vec<TemplatePart>,
        otherwise: Vec<TemplatePart>,
    },
    For {
        key_var: Option<String>,
        value_var: String,
        coll: Expr,
        body: Vec<TemplatePart>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, range: SourceRange) -> Self {
        Self { kind, range }
    }

    pub fn literal(value: impl Into<Value>, range: SourceRange) -> Self {
        Self::new(ExprKind::Literal(value.into()), range)
    }

    /// Static reference path like `module.db` or `var.x["k"]`, if the
    /// expression is nothing but a traversal from a root name
    pub fn traversal(&self) -> Option<Vec<TraversalStep>> {
        match &self.kind {
            ExprKind::Variable(name) => Some(vec![TraversalStep::Root(name.clone())]),
            ExprKind::GetAttr { source, name } => {
                let mut steps = source.traversal()?;
                steps.push(TraversalStep::Attr(name.clone()));
                Some(steps)
            }
            ExprKind::Index { source, key } => {
                let ExprKind::Literal(value) = &key.kind else {
                    return None;
                };
                let mut steps = source.traversal()?;
                steps.push(TraversalStep::Index(value.clone()));
                Some(steps)
            }
            _ => None,
        }
    }

    /// Attribute names of a traversal, ignoring index steps
    pub fn traversal_names(&self) -> Option<Vec<String>> {
        let steps = self.traversal()?;
        Some(
            steps
                .into_iter()
                .filter_map(|step| match step {
                    TraversalStep::Root(n) | TraversalStep::Attr(n) => Some(n),
                    TraversalStep::Index(_) => None,
                })
                .collect(),
        )
    }

    /// A bare identifier such as `string` in `type = string`
    pub fn as_keyword(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Variable(name) => Some(name),
            _ => None,
        }
    }

    /// Value of an expression that contains no references or calls
    pub fn static_value(&self) -> Option<Value> {
        match &self.kind {
            ExprKind::Literal(v) => Some(v.clone()),
            ExprKind::Parens(inner) => inner.static_value(),
            ExprKind::Tuple(items) => items
                .iter()
                .map(Expr::static_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Tuple),
            ExprKind::Object(items) => {
                let mut out = std::collections::BTreeMap::new();
                for (k, v) in items {
                    let key = k.static_value()?;
                    out.insert(key.as_str()?.to_string(), v.static_value()?);
                }
                Some(Value::Object(out))
            }
            ExprKind::Unary {
                op: UnaryOp::Negate,
                operand,
            } => match operand.static_value()? {
                Value::Number(n) => Some(Value::Number(-n)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Every root name referenced anywhere in the expression
    pub fn root_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_roots(&mut Vec::new(), &mut out);
        out
    }

    fn collect_roots(&self, bound: &mut Vec<String>, out: &mut Vec<String>) {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::SplatItem => {}
            ExprKind::Variable(name) => {
                if !bound.contains(name) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
            ExprKind::Template(parts) => collect_template_roots(parts, bound, out),
            ExprKind::Tuple(items) => items.iter().for_each(|e| e.collect_roots(bound, out)),
            ExprKind::Object(items) => {
                for (k, v) in items {
                    k.collect_roots(bound, out);
                    v.collect_roots(bound, out);
                }
            }
            ExprKind::GetAttr { source, .. } => source.collect_roots(bound, out),
            ExprKind::Index { source, key } => {
                source.collect_roots(bound, out);
                key.collect_roots(bound, out);
            }
            ExprKind::Splat { source, each } => {
                source.collect_roots(bound, out);
                each.collect_roots(bound, out);
            }
            ExprKind::Call { args, .. } => args.iter().for_each(|e| e.collect_roots(bound, out)),
            ExprKind::Unary { operand, .. } => operand.collect_roots(bound, out),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.collect_roots(bound, out);
                rhs.collect_roots(bound, out);
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_roots(bound, out);
                then.collect_roots(bound, out);
                otherwise.collect_roots(bound, out);
            }
            ExprKind::ForTuple {
                key_var,
                value_var,
                coll,
                value,
                cond,
            } => {
                coll.collect_roots(bound, out);
                let mark = bound.len();
                bound.extend(key_var.iter().cloned());
                bound.push(value_var.clone());
                value.collect_roots(bound, out);
                if let Some(c) = cond {
                    c.collect_roots(bound, out);
                }
                bound.truncate(mark);
            }
            ExprKind::ForObject {
                key_var,
                value_var,
                coll,
                key,
                value,
                cond,
                ..
            } => {
                coll.collect_roots(bound, out);
                let mark = bound.len();
                bound.extend(key_var.iter().cloned());
                bound.push(value_var.clone());
                key.collect_roots(bound, out);
                value.collect_roots(bound, out);
                if let Some(c) = cond {
                    c.collect_roots(bound, out);
                }
                bound.truncate(mark);
            }
            ExprKind::Parens(inner) => inner.collect_roots(bound, out),
        }
    }
}

fn collect_template_roots(parts: &[TemplatePart], bound: &mut Vec<String>, out: &mut Vec<String>) {
    for part in parts {
        match part {
            TemplatePart::Literal(_) => {}
            TemplatePart::Interp(e) => e.collect_roots(bound, out),
            TemplatePart::If {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_roots(bound, out);
                collect_template_roots(then, bound, out);
                collect_template_roots(otherwise, bound, out);
            }
            TemplatePart::For {
                key_var,
                value_var,
                coll,
                body,
            } => {
                coll.collect_roots(bound, out);
                let mark = bound.len();
                bound.extend(key_var.iter().cloned());
                bound.push(value_var.clone());
                collect_template_roots(body, bound, out);
                bound.truncate(mark);
            }
        }
    }
}
