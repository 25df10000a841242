//! kubehcl Syntax - the configuration language front end
//!
//! - `parser`: pest grammar driver producing a syntax tree with source ranges
//! - `ast`: bodies, attributes, blocks and expression trees
//! - `fmt`: canonical source formatting used by `kubehcl fmt`

pub mod ast;
pub mod fmt;
pub mod parser;

pub use ast::{
    Attribute, BinaryOp, Block, Body, Expr, ExprKind, TemplatePart, TraversalStep, UnaryOp,
};
pub use fmt::format_source;
pub use parser::{ParseError, parse_expression, parse_file, parse_template};
