//! Numeric functions

use kubehcl_core::Value;

use super::{Args, FnResult, FunctionError, Functions};

/// Usage: abs(-3)
pub(crate) fn abs(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::Number(a.number(0)?.abs()))
}

/// Usage: ceil(4.1)
pub(crate) fn ceil(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::Number(a.number(0)?.ceil()))
}

/// Usage: floor(4.9)
pub(crate) fn floor(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    Ok(Value::Number(a.number(0)?.floor()))
}

/// Usage: log(16, 2)
pub(crate) fn log(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    Ok(Value::Number(a.number(0)?.log(a.number(1)?)))
}

/// Numbers of a variadic call or of a single list argument
fn numbers(args: &[Value]) -> Result<Vec<f64>, FunctionError> {
    let a = Args::at_least(args, 1)?;
    (0..a.len()).map(|i| a.number(i)).collect()
}

/// Usage: max(1, 5, 3)
pub(crate) fn max(_: &Functions, args: &[Value]) -> FnResult {
    let values = numbers(args)?;
    Ok(Value::Number(
        values.into_iter().fold(f64::NEG_INFINITY, f64::max),
    ))
}

/// Usage: min(1, 5, 3)
pub(crate) fn min(_: &Functions, args: &[Value]) -> FnResult {
    let values = numbers(args)?;
    Ok(Value::Number(values.into_iter().fold(f64::INFINITY, f64::min)))
}

/// Usage: parseint("ff", 16)
pub(crate) fn parseint(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let text = a.string(0)?;
    let base = a.integer(1)?;
    if !(2..=62).contains(&base) {
        return Err(FunctionError::Argument {
            index: 2,
            message: "base must be a whole number between 2 and 62 inclusive".to_string(),
        });
    }
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(&text)),
    };
    if digits.is_empty() {
        return Err(FunctionError::failed(format!(
            "cannot parse {:?} as a base {} integer",
            text, base
        )));
    }
    let mut acc: i128 = 0;
    for c in digits.chars() {
        let digit = digit_value(c)
            .filter(|d| (*d as i64) < base)
            .ok_or_else(|| {
                FunctionError::failed(format!(
                    "cannot parse {:?} as a base {} integer",
                    text, base
                ))
            })?;
        acc = acc
            .checked_mul(base as i128)
            .and_then(|v| v.checked_add(digit as i128))
            .ok_or_else(|| FunctionError::failed("number is too large"))?;
    }
    let n = if negative { -acc } else { acc };
    Ok(Value::Number(n as f64))
}

fn digit_value(c: char) -> Option<u32> {
    match c {
        '0'..='9' => Some(c as u32 - '0' as u32),
        'a'..='z' => Some(c as u32 - 'a' as u32 + 10),
        'A'..='Z' => Some(c as u32 - 'A' as u32 + 36),
        _ => None,
    }
}

/// Usage: pow(2, 10)
pub(crate) fn pow(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    Ok(Value::Number(a.number(0)?.powf(a.number(1)?)))
}

/// Usage: signum(-7)
pub(crate) fn signum(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let n = a.number(0)?;
    let sign = if n > 0.0 {
        1.0
    } else if n < 0.0 {
        -1.0
    } else {
        0.0
    };
    Ok(Value::Number(sign))
}

/// Usage: sum([1, 2, 3])
pub(crate) fn sum(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let items = a.seq(0)?;
    if items.is_empty() {
        return Err(FunctionError::failed("cannot sum an empty list"));
    }
    let mut total = 0.0;
    for item in items {
        total += super::to_number(item).ok_or_else(|| {
            FunctionError::failed(format!(
                "argument must be list of numbers, got {}",
                item.type_name()
            ))
        })?;
    }
    Ok(Value::Number(total))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;

    #[test]
    fn test_min_max() {
        assert_eq!(call("max", vec![n(1.0), n(5.0), s("3")]), n(5.0));
        assert_eq!(call("min", vec![n(1.0), n(-5.0)]), n(-5.0));
    }

    #[test]
    fn test_parseint_bases() {
        assert_eq!(call("parseint", vec![s("ff"), n(16.0)]), n(255.0));
        assert_eq!(call("parseint", vec![s("-101"), n(2.0)]), n(-5.0));
        call_err("parseint", vec![s("12"), n(1.0)]);
        call_err("parseint", vec![s("19"), n(8.0)]);
    }

    #[test]
    fn test_log_pow_signum() {
        assert_eq!(call("log", vec![n(16.0), n(2.0)]), n(4.0));
        assert_eq!(call("pow", vec![n(2.0), n(10.0)]), n(1024.0));
        assert_eq!(call("signum", vec![n(-3.0)]), n(-1.0));
    }

    #[test]
    fn test_sum() {
        assert_eq!(call("sum", vec![list(vec![n(1.0), n(2.5)])]), n(3.5));
        call_err("sum", vec![list(vec![])]);
    }
}
