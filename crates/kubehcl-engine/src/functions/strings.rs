//! String functions

use std::collections::BTreeMap;

use kubehcl_core::Value;
use kubehcl_core::value::format_number;
use regex::Regex;

use super::{Args, FnResult, FunctionError, Functions, string_of};

/// Usage: chomp("hello\n")
pub(crate) fn chomp(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let s = a.string(0)?;
    Ok(Value::string(s.trim_end_matches(['\n', '\r'])))
}

/// Usage: endswith("hello", "lo")
pub(crate) fn endswith(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    Ok(Value::Bool(a.string(0)?.ends_with(&a.string(1)?)))
}

/// Usage: startswith("hello", "he")
pub(crate) fn startswith(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    Ok(Value::Bool(a.string(0)?.starts_with(&a.string(1)?)))
}

/// Usage: strcontains("hello", "ell")
pub(crate) fn strcontains(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    Ok(Value::Bool(a.string(0)?.contains(&a.string(1)?)))
}

/// Usage: format("%s-%03d", "web", 7)
pub(crate) fn format(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    let spec = a.string(0)?;
    Ok(Value::string(format_values(&spec, &a.all()[1..])?))
}

/// Usage: formatlist("%s.example.com", ["a", "b"])
pub(crate) fn formatlist(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    let spec = a.string(0)?;
    let rest = &a.all()[1..];

    let mut len: Option<usize> = None;
    for (i, v) in rest.iter().enumerate() {
        if let Some(items) = v.as_sequence() {
            match len {
                Some(l) if l != items.len() => {
                    return Err(FunctionError::Argument {
                        index: i + 2,
                        message: format!(
                            "argument {} has length {}, which is inconsistent with argument {} of length {}",
                            i + 2,
                            items.len(),
                            2,
                            l
                        ),
                    });
                }
                _ => len = Some(items.len()),
            }
        }
    }
    let len = len.unwrap_or(1);

    let mut out = Vec::with_capacity(len);
    for row in 0..len {
        let row_args: Vec<Value> = rest
            .iter()
            .map(|v| match v.as_sequence() {
                Some(items) => items[row].clone(),
                None => v.clone(),
            })
            .collect();
        out.push(Value::string(format_values(&spec, &row_args)?));
    }
    Ok(Value::List(out))
}

/// Usage: indent(2, "a\nb")
pub(crate) fn indent(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let spaces = " ".repeat(a.integer(0)?.max(0) as usize);
    let text = a.string(1)?;
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
            out.push_str(&spaces);
        }
        out.push_str(line);
    }
    Ok(Value::string(out))
}

/// Usage: join(", ", ["a", "b"])
pub(crate) fn join(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 2)?;
    let sep = a.string(0)?;
    let mut parts = Vec::new();
    for i in 1..a.len() {
        parts.extend(a.strings(i)?);
    }
    Ok(Value::string(parts.join(&sep)))
}

/// Usage: lower("HELLO")
pub(crate) fn lower(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::string(a.string(0)?.to_lowercase()))
}

/// Usage: upper("hello")
pub(crate) fn upper(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::string(a.string(0)?.to_uppercase()))
}

fn compile(pattern: &str) -> Result<Regex, FunctionError> {
    Regex::new(pattern).map_err(|e| FunctionError::Argument {
        index: 1,
        message: format!("invalid regular expression pattern: {}", e),
    })
}

/// Result of one match: the match itself, a list of unnamed groups, or
/// an object of named groups
fn capture_value(re: &Regex, caps: &regex::Captures<'_>) -> Value {
    let text = |m: Option<regex::Match<'_>>| Value::string(m.map(|m| m.as_str()).unwrap_or(""));
    if re.captures_len() == 1 {
        return text(caps.get(0));
    }
    let named: Vec<&str> = re.capture_names().flatten().collect();
    if !named.is_empty() {
        let entries: BTreeMap<String, Value> = named
            .iter()
            .map(|name| (name.to_string(), text(caps.name(name))))
            .collect();
        return Value::Object(entries);
    }
    Value::Tuple((1..re.captures_len()).map(|i| text(caps.get(i))).collect())
}

/// Usage: regex("^(\\d+)-(\\d+)$", "10-20")
pub(crate) fn regex(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let re = compile(&a.string(0)?)?;
    let text = a.string(1)?;
    let caps = re
        .captures(&text)
        .ok_or_else(|| FunctionError::failed("pattern did not match any part of the given string"))?;
    Ok(capture_value(&re, &caps))
}

/// Usage: regexall("[a-z]+", "ab 12 cd")
pub(crate) fn regexall(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let re = compile(&a.string(0)?)?;
    let text = a.string(1)?;
    Ok(Value::List(
        re.captures_iter(&text)
            .map(|caps| capture_value(&re, &caps))
            .collect(),
    ))
}

/// Usage: replace("a-b-c", "-", "_") or replace("v1.2", "/\\d/", "N")
pub(crate) fn replace(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 3)?;
    let text = a.string(0)?;
    let search = a.string(1)?;
    let replacement = a.string(2)?;
    if search.len() > 1 && search.starts_with('/') && search.ends_with('/') {
        let re = compile(&search[1..search.len() - 1])?;
        return Ok(Value::string(
            re.replace_all(&text, replacement.as_str()).into_owned(),
        ));
    }
    Ok(Value::string(text.replace(&search, &replacement)))
}

/// Usage: split(",", "a,b,c")
pub(crate) fn split(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let sep = a.string(0)?;
    let text = a.string(1)?;
    if text.is_empty() {
        return Ok(Value::List(vec![Value::string("")]));
    }
    Ok(Value::List(
        text.split(sep.as_str()).map(Value::string).collect(),
    ))
}

/// Usage: strrev("hello")
pub(crate) fn strrev(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::string(a.string(0)?.chars().rev().collect::<String>()))
}

/// Usage: substr("hello world", 1, 4)
pub(crate) fn substr(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 3)?;
    let chars: Vec<char> = a.string(0)?.chars().collect();
    let total = chars.len() as i64;
    let mut offset = a.integer(1)?;
    let length = a.integer(2)?;

    if offset < 0 {
        offset += total;
    }
    if offset < 0 || offset > total {
        return Err(FunctionError::Argument {
            index: 2,
            message: "offset out of range".to_string(),
        });
    }
    let end = if length < 0 {
        total
    } else {
        (offset + length).min(total)
    };
    Ok(Value::string(
        chars[offset as usize..end as usize].iter().collect::<String>(),
    ))
}

/// Usage: title("hello world")
pub(crate) fn title(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let mut out = String::new();
    let mut at_word_start = true;
    for c in a.string(0)?.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    Ok(Value::string(out))
}

/// Usage: trim("?!hello?!", "!?")
pub(crate) fn trim(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let cutset: Vec<char> = a.string(1)?.chars().collect();
    Ok(Value::string(
        a.string(0)?.trim_matches(|c| cutset.contains(&c)),
    ))
}

/// Usage: trimprefix("helloworld", "hello")
pub(crate) fn trimprefix(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let text = a.string(0)?;
    let prefix = a.string(1)?;
    Ok(Value::string(text.strip_prefix(prefix.as_str()).unwrap_or(&text)))
}

/// Usage: trimsuffix("helloworld", "world")
pub(crate) fn trimsuffix(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let text = a.string(0)?;
    let suffix = a.string(1)?;
    Ok(Value::string(text.strip_suffix(suffix.as_str()).unwrap_or(&text)))
}

/// Usage: trimspace("  hello\n")
pub(crate) fn trimspace(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::string(a.string(0)?.trim()))
}

#[derive(Debug, Default)]
struct Verb {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    sharp: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// printf-style formatting with the verbs `%v %t %s %q %d %b %o %x %X %e %E %f %g %G`
pub(crate) fn format_values(spec: &str, args: &[Value]) -> Result<String, FunctionError> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = String::new();
    let mut next_arg = 0usize;
    let mut used = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.get(i) == Some(&'%') {
            out.push('%');
            i += 1;
            continue;
        }

        let mut verb = Verb::default();
        while let Some(flag) = chars.get(i) {
            match flag {
                '-' => verb.left = true,
                '+' => verb.plus = true,
                ' ' => verb.space = true,
                '0' => verb.zero = true,
                '#' => verb.sharp = true,
                _ => break,
            }
            i += 1;
        }
        if chars.get(i) == Some(&'[') {
            let close = chars[i..]
                .iter()
                .position(|c| *c == ']')
                .ok_or_else(|| FunctionError::failed("unterminated argument index"))?;
            let index: String = chars[i + 1..i + close].iter().collect();
            let index: usize = index
                .parse()
                .map_err(|_| FunctionError::failed(format!("invalid argument index {:?}", index)))?;
            if index == 0 {
                return Err(FunctionError::failed("argument index must be at least 1"));
            }
            next_arg = index - 1;
            i += close + 1;
        }
        let (width, after) = read_digits(&chars, i);
        verb.width = width;
        i = after;
        if chars.get(i) == Some(&'.') {
            let (precision, after) = read_digits(&chars, i + 1);
            verb.precision = Some(precision.unwrap_or(0));
            i = after;
        }

        let Some(&kind) = chars.get(i) else {
            return Err(FunctionError::failed("format string ends with an incomplete verb"));
        };
        i += 1;
        let arg = args.get(next_arg).ok_or_else(|| {
            FunctionError::failed(format!("not enough arguments for %{}", kind))
        })?;
        next_arg += 1;
        used = used.max(next_arg);

        let rendered = render_verb(kind, &verb, arg)?;
        out.push_str(&pad(&verb, rendered, matches!(kind, 'd' | 'b' | 'o' | 'x' | 'X' | 'e' | 'E' | 'f' | 'g' | 'G')));
    }

    if used < args.len() {
        return Err(FunctionError::failed(format!(
            "too many arguments; only {} used by format string",
            used
        )));
    }
    Ok(out)
}

fn read_digits(chars: &[char], start: usize) -> (Option<usize>, usize) {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return (None, start);
    }
    let digits: String = chars[start..end].iter().collect();
    (digits.parse().ok(), end)
}

fn render_verb(kind: char, verb: &Verb, arg: &Value) -> Result<String, FunctionError> {
    let number = || {
        super::to_number(arg).ok_or_else(|| {
            FunctionError::failed(format!(
                "unsupported value for \"%{}\": number required",
                kind
            ))
        })
    };
    let integer = || -> Result<i64, FunctionError> {
        let n = number()?;
        if n.fract() != 0.0 {
            return Err(FunctionError::failed(format!(
                "unsupported value for \"%{}\": whole number required",
                kind
            )));
        }
        Ok(n as i64)
    };
    let signed = |n: f64, body: String| -> String {
        if n >= 0.0 && verb.plus {
            format!("+{}", body)
        } else if n >= 0.0 && verb.space {
            format!(" {}", body)
        } else {
            body
        }
    };

    Ok(match kind {
        'v' => match arg {
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            other => serde_json::to_string(&other.to_json())
                .map_err(|e| FunctionError::failed(e.to_string()))?,
        },
        't' => match arg {
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(FunctionError::failed(
                    "unsupported value for \"%t\": bool required",
                ));
            }
        },
        's' => {
            let s = string_of(arg).ok_or_else(|| {
                FunctionError::failed(format!(
                    "unsupported value for \"%s\": string required, got {}",
                    arg.type_name()
                ))
            })?;
            match verb.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
        'q' => {
            let s = string_of(arg).ok_or_else(|| {
                FunctionError::failed("unsupported value for \"%q\": string required")
            })?;
            serde_json::to_string(&s).map_err(|e| FunctionError::failed(e.to_string()))?
        }
        'd' => {
            let n = integer()?;
            signed(n as f64, n.to_string())
        }
        'b' => radix(integer()?, |v| format!("{:b}", v)),
        'o' => {
            let body = radix(integer()?, |v| format!("{:o}", v));
            if verb.sharp { format!("0{}", body) } else { body }
        }
        'x' => {
            let body = radix(integer()?, |v| format!("{:x}", v));
            if verb.sharp { format!("0x{}", body) } else { body }
        }
        'X' => {
            let body = radix(integer()?, |v| format!("{:X}", v));
            if verb.sharp { format!("0X{}", body) } else { body }
        }
        'f' => {
            let n = number()?;
            signed(n, format!("{:.*}", verb.precision.unwrap_or(6), n))
        }
        'e' | 'E' => {
            let n = number()?;
            let body = exponent(n, verb.precision.unwrap_or(6));
            signed(n, if kind == 'E' { body.to_uppercase() } else { body })
        }
        'g' | 'G' => {
            let n = number()?;
            let body = match verb.precision {
                Some(p) => format!("{:.*}", p, n),
                None => format_number(n),
            };
            signed(n, if kind == 'G' { body.to_uppercase() } else { body })
        }
        other => {
            return Err(FunctionError::failed(format!(
                "unsupported format verb %{}",
                other
            )));
        }
    })
}

fn radix(n: i64, render: impl Fn(u64) -> String) -> String {
    if n < 0 {
        format!("-{}", render(n.unsigned_abs()))
    } else {
        render(n as u64)
    }
}

/// `1.500000e+03` style exponent notation
fn exponent(n: f64, precision: usize) -> String {
    let rendered = format!("{:.*e}", precision, n);
    match rendered.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => rendered,
    }
}

fn pad(verb: &Verb, text: String, numeric: bool) -> String {
    let Some(width) = verb.width else {
        return text;
    };
    let len = text.chars().count();
    if len >= width {
        return text;
    }
    let fill = width - len;
    if verb.left {
        format!("{}{}", text, " ".repeat(fill))
    } else if verb.zero && numeric {
        let (sign, digits) = match text.chars().next() {
            Some(c @ ('-' | '+' | ' ')) => (c.to_string(), text[1..].to_string()),
            _ => (String::new(), text),
        };
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_format_verbs() {
        assert_eq!(
            call("format", vec![s("%s-%03d"), s("web"), n(7.0)]),
            s("web-007")
        );
        assert_eq!(call("format", vec![s("%.2f%%"), n(12.3456)]), s("12.35%"));
        assert_eq!(call("format", vec![s("%-5s|"), s("ab")]), s("ab   |"));
        assert_eq!(call("format", vec![s("%q"), s("a\"b")]), s("\"a\\\"b\""));
        assert_eq!(call("format", vec![s("%#x"), n(255.0)]), s("0xff"));
        assert_eq!(
            call("format", vec![s("%[2]s %[1]s"), s("a"), s("b")]),
            s("b a")
        );
        assert_eq!(
            call("format", vec![s("%v"), list(vec![n(1.0), s("x")])]),
            s("[1,\"x\"]")
        );
    }

    #[test]
    fn test_format_argument_count() {
        assert!(matches!(
            call_err("format", vec![s("%s %s"), s("a")]),
            FunctionError::Failed(m) if m.contains("not enough arguments")
        ));
        assert!(matches!(
            call_err("format", vec![s("%s"), s("a"), s("b")]),
            FunctionError::Failed(m) if m.contains("too many arguments")
        ));
    }

    #[test]
    fn test_formatlist_broadcasts_scalars() {
        assert_eq!(
            call(
                "formatlist",
                vec![s("%s=%s"), list(vec![s("a"), s("b")]), s("x")]
            ),
            list(vec![s("a=x"), s("b=x")])
        );
    }

    #[test]
    fn test_regex_shapes() {
        assert_eq!(call("regex", vec![s("[a-z]+"), s("12abc")]), s("abc"));
        assert_eq!(
            call("regex", vec![s("(\\d+)-(\\d+)"), s("10-20")]),
            Value::Tuple(vec![s("10"), s("20")])
        );
        assert_eq!(
            call("regex", vec![s("(?P<major>\\d+)\\.(?P<minor>\\d+)"), s("1.2")]),
            Value::object([("major".to_string(), s("1")), ("minor".to_string(), s("2"))])
        );
        call_err("regex", vec![s("z"), s("abc")]);
        assert_eq!(
            call("regexall", vec![s("[a-z]+"), s("ab 12 cd")]),
            list(vec![s("ab"), s("cd")])
        );
    }

    #[test]
    fn test_replace_literal_and_regex() {
        assert_eq!(call("replace", vec![s("a-b-c"), s("-"), s("_")]), s("a_b_c"));
        assert_eq!(
            call("replace", vec![s("v1.2"), s("/(\\d)/"), s("<$1>")]),
            s("v<1>.<2>")
        );
    }

    #[test]
    fn test_substr_and_trim() {
        assert_eq!(call("substr", vec![s("hello world"), n(1.0), n(4.0)]), s("ello"));
        assert_eq!(call("substr", vec![s("hello"), n(-3.0), n(-1.0)]), s("llo"));
        assert_eq!(call("trim", vec![s("?!hi?!"), s("!?")]), s("hi"));
        assert_eq!(call("trimprefix", vec![s("helloworld"), s("hello")]), s("world"));
        assert_eq!(call("chomp", vec![s("x\r\n\n")]), s("x"));
    }

    #[test]
    fn test_misc() {
        assert_eq!(call("title", vec![s("hello big-world")]), s("Hello Big-World"));
        assert_eq!(call("indent", vec![n(2.0), s("a\nb")]), s("a\n  b"));
        assert_eq!(
            call("join", vec![s(","), list(vec![s("a")]), list(vec![s("b"), n(1.0)])]),
            s("a,b,1")
        );
        assert_eq!(call("split", vec![s(","), s("a,b")]), list(vec![s("a"), s("b")]));
        assert_eq!(call("strrev", vec![s("abc")]), s("cba"));
        assert_eq!(call("format", vec![s("%e"), n(1500.0)]), s("1.500000e+03"));
    }
}
