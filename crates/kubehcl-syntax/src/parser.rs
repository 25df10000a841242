//! Configuration language parser
//!
//! Parses kubehcl source into the syntax tree in [`crate::ast`] using pest.
//! Operator precedence is resolved with a Pratt parser; string templates are
//! parsed into a flat list first and then folded into `if`/`for` trees.

use once_cell::sync::Lazy;
use pest::Parser;
use pest::error::{InputLocation, LineColLocation};
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;
use thiserror::Error;

use kubehcl_core::{Diagnostic, Diagnostics, Pos, SourceRange, Value};

use crate::ast::*;

#[derive(Parser)]
#[grammar = "hcl.pest"]
struct HclParser;

/// Parser error
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Parse error: {0}")]
    Pest(Box<pest::error::Error<Rule>>),

    #[error("{message}")]
    Syntax { message: String, range: SourceRange },

    #[error("Invalid number: {text}")]
    InvalidNumber { text: String, range: SourceRange },

    #[error("Invalid escape sequence: {text}")]
    InvalidEscape { text: String, range: SourceRange },

    #[error("{message}")]
    Template { message: String, range: SourceRange },

    #[error("Incomplete {0:?}")]
    Incomplete(Rule),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        ParseError::Pest(Box::new(e))
    }
}

impl ParseError {
    /// Summary line used when reporting the error as a diagnostic
    pub fn summary(&self) -> &'static str {
        match self {
            ParseError::Pest(_) | ParseError::Syntax { .. } | ParseError::Incomplete(_) => {
                "Invalid syntax"
            }
            ParseError::InvalidNumber { .. } => "Invalid number literal",
            ParseError::InvalidEscape { .. } => "Invalid escape sequence",
            ParseError::Template { .. } => "Invalid template",
        }
    }

    pub fn to_diagnostic(&self, filename: &str) -> Diagnostic {
        let (detail, range) = match self {
            ParseError::Pest(e) => (e.variant.message().to_string(), pest_range(e, filename, 0)),
            ParseError::Syntax { message, range } | ParseError::Template { message, range } => {
                (message.clone(), range.clone())
            }
            ParseError::InvalidNumber { text, range } => {
                (format!("{:?} is not a valid number", text), range.clone())
            }
            ParseError::InvalidEscape { text, range } => (
                format!("The sequence {:?} is not a valid escape", text),
                range.clone(),
            ),
            ParseError::Incomplete(rule) => (
                format!("Unexpected end of {:?}", rule),
                SourceRange::new(filename, Pos::default(), Pos::default()),
            ),
        };
        Diagnostic::error(self.summary(), detail).with_subject(&range)
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;

fn pest_range(e: &pest::error::Error<Rule>, filename: &str, line_offset: usize) -> SourceRange {
    let (start_byte, end_byte) = match e.location {
        InputLocation::Pos(p) => (p, p),
        InputLocation::Span((s, t)) => (s, t),
    };
    let ((sl, sc), (el, ec)) = match e.line_col {
        LineColLocation::Pos((l, c)) => ((l, c), (l, c)),
        LineColLocation::Span(start, end) => (start, end),
    };
    SourceRange::new(
        filename,
        Pos::new(sl + line_offset, sc, start_byte),
        Pos::new(el + line_offset, ec, end_byte),
    )
}

static PRATT: Lazy<PrattParser<Rule>> = Lazy::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::neq, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::not) | Op::prefix(Rule::neg))
});

/// Where the text being parsed sits inside its file
#[derive(Debug, Clone, Copy)]
struct Ctx<'a> {
    filename: &'a str,
    line_offset: usize,
    byte_offset: usize,
}

impl<'a> Ctx<'a> {
    fn new(filename: &'a str) -> Self {
        Self {
            filename,
            line_offset: 0,
            byte_offset: 0,
        }
    }

    fn range(&self, span: pest::Span<'_>) -> SourceRange {
        let (sl, sc) = span.start_pos().line_col();
        let (el, ec) = span.end_pos().line_col();
        SourceRange::new(
            self.filename,
            Pos::new(sl + self.line_offset, sc, span.start() + self.byte_offset),
            Pos::new(el + self.line_offset, ec, span.end() + self.byte_offset),
        )
    }

    /// Re-anchor an error from a nested parse to the enclosing file
    fn lift(&self, e: pest::error::Error<Rule>) -> ParseError {
        let mut range = pest_range(&e, self.filename, self.line_offset);
        range.start.byte += self.byte_offset;
        range.end.byte += self.byte_offset;
        ParseError::Syntax {
            message: e.variant.message().to_string(),
            range,
        }
    }
}

/// Parse a whole configuration file
///
/// Syntax errors are reported as diagnostics together with an empty body,
/// so callers can keep loading other files and report everything at once.
pub fn parse_file(src: &str, filename: &str) -> (Body, Diagnostics) {
    let ctx = Ctx::new(filename);
    let mut diags = Diagnostics::new();

    let parsed = HclParser::parse(Rule::file, src)
        .map_err(ParseError::from)
        .and_then(|mut pairs| {
            let file = next_pair(&mut pairs, Rule::file)?;
            let range = ctx.range(file.as_span());
            let body = file
                .into_inner()
                .find(|p| p.as_rule() == Rule::body)
                .ok_or(ParseError::Incomplete(Rule::file))?;
            let mut body = parse_body(body, &ctx, &mut diags)?;
            body.range = range;
            Ok(body)
        });

    match parsed {
        Ok(body) => (body, diags),
        Err(e) => {
            tracing::debug!(file = filename, error = %e, "syntax error");
            diags.push(e.to_diagnostic(filename));
            (Body::default(), diags)
        }
    }
}

/// Parse a single expression, e.g. the value half of `--var key=value`
pub fn parse_expression(src: &str, filename: &str) -> Result<Expr> {
    let ctx = Ctx::new(filename);
    let mut pairs = HclParser::parse(Rule::standalone_expression, src)?;
    let outer = next_pair(&mut pairs, Rule::standalone_expression)?;
    let expr = outer
        .into_inner()
        .find(|p| p.as_rule() == Rule::expression)
        .ok_or(ParseError::Incomplete(Rule::standalone_expression))?;
    parse_expr(expr, &ctx)
}

/// Parse template text where only `${...}` and `%{...}` are special,
/// as used for heredoc bodies and `templatefile`
pub fn parse_template(src: &str, filename: &str) -> Result<Expr> {
    let ctx = Ctx::new(filename);
    parse_template_source(src, &ctx, None)
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, within: Rule) -> Result<Pair<'i, Rule>> {
    pairs.next().ok_or(ParseError::Incomplete(within))
}

fn parse_body(pair: Pair<Rule>, ctx: &Ctx, diags: &mut Diagnostics) -> Result<Body> {
    let mut body = Body {
        range: ctx.range(pair.as_span()),
        ..Default::default()
    };

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::attribute => {
                let attr = parse_attribute(inner, ctx)?;
                if let Some(prev) = body.attribute(&attr.name) {
                    diags.error(
                        "Attribute redefined",
                        format!(
                            "The argument \"{}\" was already set at {}. Each argument may be set only once.",
                            attr.name, prev.name_range
                        ),
                        &attr.name_range,
                    );
                    continue;
                }
                body.attributes.push(attr);
            }
            Rule::block => body.blocks.push(parse_block(inner, ctx, diags)?),
            _ => {}
        }
    }

    Ok(body)
}

fn parse_attribute(pair: Pair<Rule>, ctx: &Ctx) -> Result<Attribute> {
    let range = ctx.range(pair.as_span());
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, Rule::attribute)?;
    let expr = next_pair(&mut inner, Rule::attribute)?;
    Ok(Attribute {
        name: name.as_str().to_string(),
        name_range: ctx.range(name.as_span()),
        expr: parse_expr(expr, ctx)?,
        range,
    })
}

fn parse_block(pair: Pair<Rule>, ctx: &Ctx, diags: &mut Diagnostics) -> Result<Block> {
    let range = ctx.range(pair.as_span());
    let mut inner = pair.into_inner();
    let kind = next_pair(&mut inner, Rule::block)?;

    let mut block = Block {
        kind: kind.as_str().to_string(),
        labels: Vec::new(),
        label_ranges: Vec::new(),
        body: Body::default(),
        type_range: ctx.range(kind.as_span()),
        range,
    };

    for part in inner {
        match part.as_rule() {
            Rule::identifier => {
                block.labels.push(part.as_str().to_string());
                block.label_ranges.push(ctx.range(part.as_span()));
            }
            Rule::label_string => {
                let label_range = ctx.range(part.as_span());
                let raw = part
                    .into_inner()
                    .next()
                    .map(|p| p.as_str())
                    .unwrap_or_default();
                block.labels.push(unescape_quoted(raw, &label_range)?);
                block.label_ranges.push(label_range);
            }
            Rule::body => block.body = parse_body(part, ctx, diags)?,
            _ => {}
        }
    }

    Ok(block)
}

fn parse_expr(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    match pair.as_rule() {
        Rule::expression => {
            let mut inner = pair.into_inner();
            parse_conditional(next_pair(&mut inner, Rule::expression)?, ctx)
        }
        Rule::conditional => parse_conditional(pair, ctx),
        _ => Err(ParseError::Incomplete(pair.as_rule())),
    }
}

fn parse_conditional(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = ctx.range(pair.as_span());
    let mut inner = pair.into_inner();
    let cond = parse_binary(next_pair(&mut inner, Rule::conditional)?, ctx)?;

    match (inner.next(), inner.next()) {
        (Some(then), Some(otherwise)) => Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(parse_expr(then, ctx)?),
                otherwise: Box::new(parse_expr(otherwise, ctx)?),
            },
            range,
        )),
        _ => Ok(cond),
    }
}

fn parse_binary(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    PRATT
        .map_primary(|primary| parse_postfix_expr(primary, ctx))
        .map_prefix(|op, operand| {
            let operand = operand?;
            let range = ctx.range(op.as_span()).to(&operand.range);
            let op = match op.as_rule() {
                Rule::not => UnaryOp::Not,
                _ => UnaryOp::Negate,
            };
            Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                range,
            ))
        })
        .map_infix(|lhs, op, rhs| {
            let (lhs, rhs) = (lhs?, rhs?);
            let op = match op.as_rule() {
                Rule::or => BinaryOp::Or,
                Rule::and => BinaryOp::And,
                Rule::eq => BinaryOp::Equal,
                Rule::neq => BinaryOp::NotEqual,
                Rule::lt => BinaryOp::Less,
                Rule::gt => BinaryOp::Greater,
                Rule::le => BinaryOp::LessOrEqual,
                Rule::ge => BinaryOp::GreaterOrEqual,
                Rule::add => BinaryOp::Add,
                Rule::sub => BinaryOp::Subtract,
                Rule::mul => BinaryOp::Multiply,
                Rule::div => BinaryOp::Divide,
                _ => BinaryOp::Modulo,
            };
            let range = lhs.range.to(&rhs.range);
            Ok(Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            ))
        })
        .parse(pair.into_inner())
}

fn parse_postfix_expr(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let mut expr = parse_primary(next_pair(&mut inner, Rule::postfix_expr)?, ctx)?;
    for step in inner {
        expr = apply_postfix(expr, step, ctx)?;
    }
    Ok(expr)
}

fn apply_postfix(source: Expr, step: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = source.range.to(&ctx.range(step.as_span()));
    let kind = match step.as_rule() {
        Rule::get_attr => {
            let mut inner = step.into_inner();
            let name = next_pair(&mut inner, Rule::get_attr)?;
            ExprKind::GetAttr {
                source: Box::new(source),
                name: name.as_str().to_string(),
            }
        }
        Rule::legacy_index => {
            let mut inner = step.into_inner();
            let digits = next_pair(&mut inner, Rule::legacy_index)?;
            let key = parse_number(digits.as_str(), ctx.range(digits.as_span()))?;
            ExprKind::Index {
                source: Box::new(source),
                key: Box::new(key),
            }
        }
        Rule::index => {
            let mut inner = step.into_inner();
            let key = parse_expr(next_pair(&mut inner, Rule::index)?, ctx)?;
            ExprKind::Index {
                source: Box::new(source),
                key: Box::new(key),
            }
        }
        Rule::attr_splat | Rule::full_splat => {
            let mut each = Expr::new(ExprKind::SplatItem, range.clone());
            for traversal in step.into_inner() {
                each = apply_postfix(each, traversal, ctx)?;
            }
            ExprKind::Splat {
                source: Box::new(source),
                each: Box::new(each),
            }
        }
        other => return Err(ParseError::Incomplete(other)),
    };
    Ok(Expr::new(kind, range))
}

fn parse_number(text: &str, range: SourceRange) -> Result<Expr> {
    let n: f64 = text.parse().map_err(|_| ParseError::InvalidNumber {
        text: text.to_string(),
        range: range.clone(),
    })?;
    Ok(Expr::literal(Value::Number(n), range))
}

fn parse_primary(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = ctx.range(pair.as_span());
    match pair.as_rule() {
        Rule::number => parse_number(pair.as_str(), range),
        Rule::boolean => Ok(Expr::literal(pair.as_str() == "true", range)),
        Rule::null => Ok(Expr::literal(Value::Null, range)),
        Rule::variable => Ok(Expr::new(
            ExprKind::Variable(pair.as_str().trim().to_string()),
            range,
        )),
        Rule::parens => {
            let mut inner = pair.into_inner();
            let expr = parse_expr(next_pair(&mut inner, Rule::parens)?, ctx)?;
            Ok(Expr::new(ExprKind::Parens(Box::new(expr)), range))
        }
        Rule::function_call => parse_call(pair, ctx),
        Rule::tuple => {
            let items = pair
                .into_inner()
                .map(|p| parse_expr(p, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::new(ExprKind::Tuple(items), range))
        }
        Rule::object => {
            let mut items = Vec::new();
            for item in pair.into_inner() {
                let mut inner = item.into_inner();
                let key = parse_object_key(next_pair(&mut inner, Rule::object_item)?, ctx)?;
                let value = parse_expr(next_pair(&mut inner, Rule::object_item)?, ctx)?;
                items.push((key, value));
            }
            Ok(Expr::new(ExprKind::Object(items), range))
        }
        Rule::for_tuple => parse_for_tuple(pair, ctx),
        Rule::for_object => parse_for_object(pair, ctx),
        Rule::template_string => parse_quoted_template(pair, ctx),
        Rule::heredoc => parse_heredoc(pair, ctx),
        other => Err(ParseError::Incomplete(other)),
    }
}

/// Object keys written as bare identifiers name the key literally
fn parse_object_key(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let key = parse_expr(pair, ctx)?;
    match key.kind {
        ExprKind::Variable(name) => Ok(Expr::literal(name, key.range)),
        _ => Ok(key),
    }
}

fn parse_call(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = ctx.range(pair.as_span());
    let mut name = String::new();
    let mut args = Vec::new();
    let mut expand_final = false;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => name = inner.as_str().to_string(),
            Rule::expression => args.push(parse_expr(inner, ctx)?),
            Rule::expand_final => expand_final = true,
            _ => {}
        }
    }

    Ok(Expr::new(
        ExprKind::Call {
            name,
            args,
            expand_final,
        },
        range,
    ))
}

fn parse_for_intro(pair: Pair<Rule>, ctx: &Ctx) -> Result<(Option<String>, String, Expr)> {
    let mut names = Vec::new();
    let mut coll = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => names.push(inner.as_str().to_string()),
            Rule::expression => coll = Some(parse_expr(inner, ctx)?),
            _ => {}
        }
    }
    let coll = coll.ok_or(ParseError::Incomplete(Rule::for_intro))?;
    let mut names = names.into_iter();
    match (names.next(), names.next()) {
        (Some(value), None) => Ok((None, value, coll)),
        (Some(key), Some(value)) => Ok((Some(key), value, coll)),
        _ => Err(ParseError::Incomplete(Rule::for_intro)),
    }
}

fn parse_for_cond(pair: Pair<Rule>, ctx: &Ctx) -> Result<Box<Expr>> {
    let mut inner = pair.into_inner();
    Ok(Box::new(parse_expr(
        next_pair(&mut inner, Rule::for_cond)?,
        ctx,
    )?))
}

fn parse_for_tuple(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = ctx.range(pair.as_span());
    let mut intro = None;
    let mut value = None;
    let mut cond = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::for_intro => intro = Some(parse_for_intro(inner, ctx)?),
            Rule::expression => value = Some(parse_expr(inner, ctx)?),
            Rule::for_cond => cond = Some(parse_for_cond(inner, ctx)?),
            _ => {}
        }
    }

    let (key_var, value_var, coll) = intro.ok_or(ParseError::Incomplete(Rule::for_tuple))?;
    let value = value.ok_or(ParseError::Incomplete(Rule::for_tuple))?;
    Ok(Expr::new(
        ExprKind::ForTuple {
            key_var,
            value_var,
            coll: Box::new(coll),
            value: Box::new(value),
            cond,
        },
        range,
    ))
}

fn parse_for_object(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = ctx.range(pair.as_span());
    let mut intro = None;
    let mut exprs = Vec::new();
    let mut cond = None;
    let mut group = false;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::for_intro => intro = Some(parse_for_intro(inner, ctx)?),
            Rule::expression => exprs.push(parse_expr(inner, ctx)?),
            Rule::ellipsis => group = true,
            Rule::for_cond => cond = Some(parse_for_cond(inner, ctx)?),
            _ => {}
        }
    }

    let (key_var, value_var, coll) = intro.ok_or(ParseError::Incomplete(Rule::for_object))?;
    let mut exprs = exprs.into_iter();
    let (Some(key), Some(value)) = (exprs.next(), exprs.next()) else {
        return Err(ParseError::Incomplete(Rule::for_object));
    };
    Ok(Expr::new(
        ExprKind::ForObject {
            key_var,
            value_var,
            coll: Box::new(coll),
            key: Box::new(key),
            value: Box::new(value),
            cond,
            group,
        },
        range,
    ))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Template element before `if`/`for` nesting is resolved
#[derive(Debug)]
struct FlatPart {
    item: FlatItem,
    strip_left: bool,
    strip_right: bool,
    range: SourceRange,
}

#[derive(Debug)]
enum FlatItem {
    Literal(String),
    Interp(Expr),
    If(Expr),
    Else,
    EndIf,
    For {
        key_var: Option<String>,
        value_var: String,
        coll: Expr,
    },
    EndFor,
}

enum Closing {
    Else(SourceRange),
    EndIf(SourceRange),
    EndFor(SourceRange),
}

impl Closing {
    fn into_error(self) -> ParseError {
        let (name, range) = match self {
            Closing::Else(r) => ("else", r),
            Closing::EndIf(r) => ("endif", r),
            Closing::EndFor(r) => ("endfor", r),
        };
        ParseError::Template {
            message: format!("Unexpected {} directive", name),
            range,
        }
    }
}

fn parse_quoted_template(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = ctx.range(pair.as_span());
    let flat = flatten_template(pair.into_inner(), ctx)?;
    build_template(flat, range)
}

fn parse_heredoc(pair: Pair<Rule>, ctx: &Ctx) -> Result<Expr> {
    let range = ctx.range(pair.as_span());
    let mut strip_indent = false;
    let mut body = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::heredoc_op => strip_indent = inner.as_str() == "<<-",
            Rule::heredoc_body => body = Some(inner),
            _ => {}
        }
    }
    let body = body.ok_or(ParseError::Incomplete(Rule::heredoc))?;

    let (start_line, _) = body.as_span().start_pos().line_col();
    let nested = Ctx {
        filename: ctx.filename,
        line_offset: ctx.line_offset + start_line - 1,
        byte_offset: ctx.byte_offset + body.as_span().start(),
    };

    let text = if strip_indent {
        dedent(body.as_str())
    } else {
        body.as_str().to_string()
    };
    parse_template_source(&text, &nested, Some(range))
}

fn parse_template_source(src: &str, ctx: &Ctx, range: Option<SourceRange>) -> Result<Expr> {
    let mut pairs = HclParser::parse(Rule::template_body, src).map_err(|e| ctx.lift(e))?;
    let body = next_pair(&mut pairs, Rule::template_body)?;
    let range = range.unwrap_or_else(|| ctx.range(body.as_span()));
    let flat = flatten_template(body.into_inner(), ctx)?;
    build_template(flat, range)
}

/// Remove the indentation shared by every non-blank line
fn dedent(text: &str) -> String {
    let indent_of = |line: &str| {
        line.chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .count()
    };
    let min = text
        .split_inclusive('\n')
        .filter(|line| !line.trim().is_empty())
        .map(indent_of)
        .min()
        .unwrap_or(0);

    text.split_inclusive('\n')
        .map(|line| {
            let cut = indent_of(line).min(min);
            &line[cut..]
        })
        .collect()
}

fn flatten_template(pairs: Pairs<Rule>, ctx: &Ctx) -> Result<Vec<FlatPart>> {
    let mut flat = Vec::new();
    for pair in pairs {
        let range = ctx.range(pair.as_span());
        match pair.as_rule() {
            Rule::quoted_literal => flat.push(FlatPart {
                item: FlatItem::Literal(unescape_quoted(pair.as_str(), &range)?),
                strip_left: false,
                strip_right: false,
                range,
            }),
            Rule::heredoc_literal => flat.push(FlatPart {
                item: FlatItem::Literal(unescape_template_markers(pair.as_str())),
                strip_left: false,
                strip_right: false,
                range,
            }),
            Rule::template_interp | Rule::template_directive => {
                flat.push(parse_template_item(pair, ctx, range)?)
            }
            _ => {}
        }
    }
    Ok(flat)
}

fn parse_template_item(pair: Pair<Rule>, ctx: &Ctx, range: SourceRange) -> Result<FlatPart> {
    let mut strip_left = false;
    let mut strip_right = false;
    let mut item = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::strip_mark if item.is_none() => strip_left = true,
            Rule::strip_mark => strip_right = true,
            Rule::expression => item = Some(FlatItem::Interp(parse_expr(inner, ctx)?)),
            Rule::dir_if => {
                let mut parts = inner.into_inner();
                let cond = parse_expr(next_pair(&mut parts, Rule::dir_if)?, ctx)?;
                item = Some(FlatItem::If(cond));
            }
            Rule::dir_else => item = Some(FlatItem::Else),
            Rule::dir_endif => item = Some(FlatItem::EndIf),
            Rule::dir_endfor => item = Some(FlatItem::EndFor),
            Rule::dir_for => {
                let mut names = Vec::new();
                let mut coll = None;
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::identifier => names.push(part.as_str().to_string()),
                        Rule::expression => coll = Some(parse_expr(part, ctx)?),
                        _ => {}
                    }
                }
                let coll = coll.ok_or(ParseError::Incomplete(Rule::dir_for))?;
                let mut names = names.into_iter();
                let (key_var, value_var) = match (names.next(), names.next()) {
                    (Some(v), None) => (None, v),
                    (Some(k), Some(v)) => (Some(k), v),
                    _ => return Err(ParseError::Incomplete(Rule::dir_for)),
                };
                item = Some(FlatItem::For {
                    key_var,
                    value_var,
                    coll,
                });
            }
            _ => {}
        }
    }

    Ok(FlatPart {
        item: item.ok_or(ParseError::Incomplete(Rule::template_interp))?,
        strip_left,
        strip_right,
        range,
    })
}

/// Apply `~` strip markers, then nest directives into a template tree
fn build_template(mut flat: Vec<FlatPart>, range: SourceRange) -> Result<Expr> {
    for i in 0..flat.len() {
        let (left, right) = (flat[i].strip_left, flat[i].strip_right);
        if left && i > 0 {
            if let FlatItem::Literal(s) = &mut flat[i - 1].item {
                *s = s.trim_end().to_string();
            }
        }
        if right && i + 1 < flat.len() {
            if let FlatItem::Literal(s) = &mut flat[i + 1].item {
                *s = s.trim_start().to_string();
            }
        }
    }

    let mut iter = flat.into_iter();
    let (parts, closing) = nest_parts(&mut iter)?;
    if let Some(closing) = closing {
        return Err(closing.into_error());
    }

    // A template that is exactly one interpolation yields the raw value
    if let [TemplatePart::Interp(_)] = parts.as_slice() {
        if let Some(TemplatePart::Interp(expr)) = parts.into_iter().next() {
            return Ok(expr);
        }
        return Err(ParseError::Incomplete(Rule::template_interp));
    }

    if parts.iter().all(|p| matches!(p, TemplatePart::Literal(_))) {
        let text: String = parts
            .into_iter()
            .filter_map(|p| match p {
                TemplatePart::Literal(s) => Some(s),
                _ => None,
            })
            .collect();
        return Ok(Expr::literal(text, range));
    }

    Ok(Expr::new(ExprKind::Template(parts), range))
}

fn nest_parts(
    iter: &mut std::vec::IntoIter<FlatPart>,
) -> Result<(Vec<TemplatePart>, Option<Closing>)> {
    let mut parts = Vec::new();

    while let Some(flat) = iter.next() {
        match flat.item {
            FlatItem::Literal(s) => {
                if !s.is_empty() {
                    parts.push(TemplatePart::Literal(s));
                }
            }
            FlatItem::Interp(expr) => parts.push(TemplatePart::Interp(expr)),
            FlatItem::If(cond) => {
                let (then, closing) = nest_parts(iter)?;
                let otherwise = match closing {
                    Some(Closing::EndIf(_)) => Vec::new(),
                    Some(Closing::Else(_)) => match nest_parts(iter)? {
                        (otherwise, Some(Closing::EndIf(_))) => otherwise,
                        (_, Some(other)) => return Err(other.into_error()),
                        (_, None) => return Err(unterminated("if", "endif", flat.range)),
                    },
                    Some(other) => return Err(other.into_error()),
                    None => return Err(unterminated("if", "endif", flat.range)),
                };
                parts.push(TemplatePart::If {
                    cond,
                    then,
                    otherwise,
                });
            }
            FlatItem::For {
                key_var,
                value_var,
                coll,
            } => {
                let body = match nest_parts(iter)? {
                    (body, Some(Closing::EndFor(_))) => body,
                    (_, Some(other)) => return Err(other.into_error()),
                    (_, None) => return Err(unterminated("for", "endfor", flat.range)),
                };
                parts.push(TemplatePart::For {
                    key_var,
                    value_var,
                    coll,
                    body,
                });
            }
            FlatItem::Else => return Ok((parts, Some(Closing::Else(flat.range)))),
            FlatItem::EndIf => return Ok((parts, Some(Closing::EndIf(flat.range)))),
            FlatItem::EndFor => return Ok((parts, Some(Closing::EndFor(flat.range)))),
        }
    }

    Ok((parts, None))
}

fn unterminated(directive: &str, closing: &str, range: SourceRange) -> ParseError {
    ParseError::Template {
        message: format!(
            "Unterminated template {} directive: missing %{{{}}}",
            directive, closing
        ),
        range,
    }
}

fn unescape_template_markers(raw: &str) -> String {
    raw.replace("$${", "${").replace("%%{", "%{")
}

fn unescape_quoted(raw: &str, range: &SourceRange) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escape = chars.next().unwrap_or('\\');
                match escape {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    'u' | 'U' => {
                        let len = if escape == 'u' { 4 } else { 8 };
                        let hex: String = chars.by_ref().take(len).collect();
                        let decoded = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| ParseError::InvalidEscape {
                                text: format!("\\{}{}", escape, hex),
                                range: range.clone(),
                            })?;
                        out.push(decoded);
                    }
                    other => {
                        return Err(ParseError::InvalidEscape {
                            text: format!("\\{}", other),
                            range: range.clone(),
                        });
                    }
                }
            }
            '$' | '%' if chars.peek() == Some(&c) => {
                let mut ahead = chars.clone();
                ahead.next();
                if ahead.peek() == Some(&'{') {
                    chars.next();
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse_expression(src, "test.hcl").unwrap()
    }

    fn body(src: &str) -> Body {
        let (body, diags) = parse_file(src, "test.hcl");
        assert!(!diags.has_errors(), "{:?}", diags);
        body
    }

    #[test]
    fn test_attributes_and_blocks() {
        let body = body(
            r#"
            # leading comment
            name = "web"
            kube_resource "web" {
              replicas = 2 // trailing
              metadata {
                labels = { app = "web" }
              }
            }
            "#,
        );

        assert_eq!(body.attributes.len(), 1);
        assert_eq!(body.attributes[0].name, "name");
        let block = &body.blocks[0];
        assert_eq!(block.kind, "kube_resource");
        assert_eq!(block.labels, vec!["web"]);
        assert_eq!(block.body.blocks_of("metadata").count(), 1);
        assert_eq!(block.type_range.start.line, 4);
    }

    #[test]
    fn test_operator_precedence() {
        let e = expr("1 + 2 * 3 == 7 && !false");
        let ExprKind::Binary { op, lhs, rhs } = e.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(rhs.kind, ExprKind::Unary { op: UnaryOp::Not, .. }));
        let ExprKind::Binary { op, lhs, .. } = lhs.kind else {
            panic!("expected comparison");
        };
        assert_eq!(op, BinaryOp::Equal);
        let ExprKind::Binary { op, rhs, .. } = lhs.kind else {
            panic!("expected sum");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_conditional_and_traversal() {
        let e = expr("var.enabled ? local.items[0].name : null");
        let ExprKind::Conditional { cond, then, .. } = e.kind else {
            panic!("expected conditional");
        };
        assert_eq!(
            cond.traversal_names(),
            Some(vec!["var".to_string(), "enabled".to_string()])
        );
        assert_eq!(
            then.traversal_names(),
            Some(vec!["local".to_string(), "items".to_string(), "name".to_string()])
        );
    }

    #[test]
    fn test_single_interpolation_is_raw_expression() {
        let e = expr(r#""${var.replicas}""#);
        assert!(matches!(e.kind, ExprKind::GetAttr { .. }));

        let e = expr(r#""plain \"text\"\n""#);
        assert_eq!(e.kind, ExprKind::Literal(Value::string("plain \"text\"\n")));

        let e = expr(r#""$${not} %%{this}""#);
        assert_eq!(e.kind, ExprKind::Literal(Value::string("${not} %{this}")));
    }

    #[test]
    fn test_strip_markers() {
        let e = expr(r#""a   ${~ x ~}   b""#);
        let ExprKind::Template(parts) = e.kind else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], TemplatePart::Literal("a".into()));
        assert_eq!(parts[2], TemplatePart::Literal("b".into()));
    }

    #[test]
    fn test_template_directives_nest() {
        let e = expr(r#""%{ for x in list }%{ if x }y%{ else }n%{ endif }%{ endfor }""#);
        let ExprKind::Template(parts) = e.kind else {
            panic!("expected template");
        };
        let [TemplatePart::For { body, value_var, .. }] = parts.as_slice() else {
            panic!("expected for");
        };
        assert_eq!(value_var, "x");
        assert!(matches!(body.as_slice(), [TemplatePart::If { otherwise, .. }] if otherwise.len() == 1));
    }

    #[test]
    fn test_unterminated_directive() {
        let err = parse_expression(r#""%{ if x }yes""#, "t.hcl").unwrap_err();
        assert!(err.to_string().contains("missing %{endif}"));

        let err = parse_expression(r#""a%{ endfor }""#, "t.hcl").unwrap_err();
        assert!(err.to_string().contains("Unexpected endfor"));
    }

    #[test]
    fn test_heredoc_with_indent_stripping() {
        let body = body("data = <<-EOT\n    hello ${name}\n      world\n    EOT\nnext = 1\n");
        let data = &body.attribute("data").unwrap().expr;
        let ExprKind::Template(parts) = &data.kind else {
            panic!("expected template");
        };
        assert_eq!(parts[0], TemplatePart::Literal("hello ".into()));
        assert_eq!(parts[2], TemplatePart::Literal("\n  world\n".into()));
        assert!(body.attribute("next").is_some());
    }

    #[test]
    fn test_plain_heredoc_keeps_text() {
        let body = body("data = <<EOT\n  a\n  b\nEOT\n");
        assert_eq!(
            body.attributes[0].expr.kind,
            ExprKind::Literal(Value::string("  a\n  b\n"))
        );
    }

    #[test]
    fn test_for_expressions() {
        let e = expr("{ for k, v in var.m : v => k... if k != \"x\" }");
        let ExprKind::ForObject {
            key_var,
            value_var,
            group,
            cond,
            ..
        } = e.kind
        else {
            panic!("expected for object");
        };
        assert_eq!(key_var.as_deref(), Some("k"));
        assert_eq!(value_var, "v");
        assert!(group);
        assert!(cond.is_some());

        let e = expr("[for s in var.list : upper(s)]");
        assert!(matches!(e.kind, ExprKind::ForTuple { key_var: None, .. }));
    }

    #[test]
    fn test_splat_and_calls() {
        let e = expr("var.items[*].name");
        let ExprKind::Splat { each, .. } = e.kind else {
            panic!("expected splat");
        };
        assert!(matches!(each.kind, ExprKind::GetAttr { ref name, .. } if name == "name"));

        let e = expr("max(var.list...)");
        assert!(matches!(e.kind, ExprKind::Call { expand_final: true, ref args, .. } if args.len() == 1));
    }

    #[test]
    fn test_object_keys() {
        let e = expr(r#"{ app = "web", "x-y": 1, (var.k) = 2 }"#);
        let ExprKind::Object(items) = e.kind else {
            panic!("expected object");
        };
        assert_eq!(items[0].0.kind, ExprKind::Literal(Value::string("app")));
        assert_eq!(items[1].0.kind, ExprKind::Literal(Value::string("x-y")));
        assert!(matches!(items[2].0.kind, ExprKind::Parens(_)));
    }

    #[test]
    fn test_syntax_error_becomes_diagnostic() {
        let (body, diags) = parse_file("a = 1\nb = \n", "broken.hcl");
        assert!(body.is_empty());
        assert!(diags.has_errors());
        let diag = diags.errors().next().unwrap();
        assert_eq!(diag.summary, "Invalid syntax");
        assert_eq!(diag.subject.as_ref().unwrap().filename, "broken.hcl");
    }

    #[test]
    fn test_duplicate_attribute() {
        let (_, diags) = parse_file("a = 1\na = 2\n", "dup.hcl");
        assert_eq!(diags.errors().next().unwrap().summary, "Attribute redefined");
    }

    #[test]
    fn test_static_value() {
        let e = expr(r#"{ a = [1, -2, "x"], b = null }"#);
        let value = e.static_value().unwrap();
        let expected = Value::object([
            (
                "a".to_string(),
                Value::Tuple(vec![1i64.into(), (-2i64).into(), "x".into()]),
            ),
            ("b".to_string(), Value::Null),
        ]);
        assert_eq!(value, expected);
        assert!(expr("var.x").static_value().is_none());
    }
}
