//! Time functions over RFC 3339 timestamps

use chrono::{DateTime, Datelike, Duration, FixedOffset, SecondsFormat, Timelike, Utc};
use kubehcl_core::Value;

use super::{Args, FnResult, FunctionError, Functions};

fn parse_timestamp(text: &str, index: usize) -> Result<DateTime<FixedOffset>, FunctionError> {
    DateTime::parse_from_rfc3339(text).map_err(|e| FunctionError::Argument {
        index,
        message: format!("not a valid RFC3339 timestamp: {}", e),
    })
}

fn render(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Usage: timestamp()
pub(crate) fn timestamp(_: &Functions, args: &[Value]) -> FnResult {
    Args::exact(args, 0)?;
    Ok(Value::string(
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}

/// Usage: timeadd("2024-01-01T00:00:00Z", "1h30m")
pub(crate) fn timeadd(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let ts = parse_timestamp(&a.string(0)?, 1)?;
    let duration = parse_duration(&a.string(1)?)?;
    let shifted = ts
        .checked_add_signed(duration)
        .ok_or_else(|| FunctionError::failed("resulting timestamp is out of range"))?;
    Ok(Value::string(render(&shifted)))
}

/// Usage: timecmp("2024-01-01T00:00:00Z", "2024-01-01T01:00:00+01:00")
pub(crate) fn timecmp(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let left = parse_timestamp(&a.string(0)?, 1)?;
    let right = parse_timestamp(&a.string(1)?, 2)?;
    let ord = left.cmp(&right) as i8;
    Ok(Value::Number(ord as f64))
}

/// Go style duration: `300ms`, `-1.5h`, `2h45m`
fn parse_duration(text: &str) -> Result<Duration, FunctionError> {
    let invalid = || FunctionError::Argument {
        index: 2,
        message: format!("invalid duration {:?}", text),
    };
    let (negative, mut rest) = match text.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        total_nanos += amount * scale;
        rest = &rest[unit_len..];
    }

    let nanos = total_nanos.round() as i64;
    Ok(Duration::nanoseconds(if negative { -nanos } else { nanos }))
}

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Usage: formatdate("DD MMM YYYY hh:mm ZZZ", "2024-03-05T14:07:09Z")
pub(crate) fn formatdate(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let spec: Vec<char> = a.string(0)?.chars().collect();
    let ts = parse_timestamp(&a.string(1)?, 2)?;
    let mut out = String::new();
    let mut i = 0;

    while i < spec.len() {
        let c = spec[i];
        if c == '\'' {
            let mut j = i + 1;
            loop {
                match spec.get(j) {
                    None => {
                        return Err(FunctionError::failed("unterminated literal '"));
                    }
                    Some('\'') if spec.get(j + 1) == Some(&'\'') => {
                        out.push('\'');
                        j += 2;
                    }
                    Some('\'') => break,
                    Some(other) => {
                        out.push(*other);
                        j += 1;
                    }
                }
            }
            i = j + 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }

        let run = spec[i..].iter().take_while(|x| **x == c).count();
        let token: String = spec[i..i + run].iter().collect();
        i += run;
        out.push_str(&format_token(&token, &ts)?);
    }
    Ok(Value::string(out))
}

fn format_token(token: &str, ts: &DateTime<FixedOffset>) -> Result<String, FunctionError> {
    let offset = ts.offset().local_minus_utc();
    let hour12 = match ts.hour() % 12 {
        0 => 12,
        h => h,
    };
    Ok(match token {
        "YYYY" => format!("{:04}", ts.year()),
        "YY" => format!("{:02}", ts.year() % 100),
        "MMMM" => MONTHS[ts.month0() as usize].to_string(),
        "MMM" => MONTHS[ts.month0() as usize][..3].to_string(),
        "MM" => format!("{:02}", ts.month()),
        "M" => ts.month().to_string(),
        "DD" => format!("{:02}", ts.day()),
        "D" => ts.day().to_string(),
        "EEEE" => WEEKDAYS[ts.weekday().num_days_from_monday() as usize].to_string(),
        "EEE" => WEEKDAYS[ts.weekday().num_days_from_monday() as usize][..3].to_string(),
        "hh" => format!("{:02}", ts.hour()),
        "h" => ts.hour().to_string(),
        "HH" => format!("{:02}", hour12),
        "H" => hour12.to_string(),
        "AA" => if ts.hour() < 12 { "AM" } else { "PM" }.to_string(),
        "aa" => if ts.hour() < 12 { "am" } else { "pm" }.to_string(),
        "mm" => format!("{:02}", ts.minute()),
        "m" => ts.minute().to_string(),
        "ss" => format!("{:02}", ts.second()),
        "s" => ts.second().to_string(),
        "ZZZZZ" => offset_string(offset, true),
        "ZZZZ" => offset_string(offset, false),
        "ZZZ" if offset == 0 => "UTC".to_string(),
        "ZZZ" => offset_string(offset, false),
        "Z" if offset == 0 => "Z".to_string(),
        "Z" => offset_string(offset, true),
        other => {
            return Err(FunctionError::failed(format!(
                "invalid date format verb {:?}",
                other
            )));
        }
    })
}

fn offset_string(seconds: i32, colon: bool) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    if colon {
        format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
    } else {
        format!("{}{:02}{:02}", sign, minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;

    #[test]
    fn test_formatdate_tokens() {
        assert_eq!(
            call(
                "formatdate",
                vec![s("DD MMM YYYY hh:mm ZZZ"), s("2024-03-05T14:07:09Z")]
            ),
            s("05 Mar 2024 14:07 UTC")
        );
        assert_eq!(
            call(
                "formatdate",
                vec![s("EEEE, h:mmaa 'o''clock' Z"), s("2024-03-05T00:07:09+02:00")]
            ),
            s("Tuesday, 0:07am o'clock +02:00")
        );
        call_err("formatdate", vec![s("QQ"), s("2024-03-05T14:07:09Z")]);
    }

    #[test]
    fn test_timeadd() {
        assert_eq!(
            call("timeadd", vec![s("2024-01-01T00:00:00Z"), s("1h30m")]),
            s("2024-01-01T01:30:00Z")
        );
        assert_eq!(
            call("timeadd", vec![s("2024-01-01T00:00:00Z"), s("-1.5h")]),
            s("2023-12-31T22:30:00Z")
        );
        call_err("timeadd", vec![s("2024-01-01T00:00:00Z"), s("5 days")]);
    }

    #[test]
    fn test_timecmp() {
        assert_eq!(
            call(
                "timecmp",
                vec![s("2024-01-01T00:00:00Z"), s("2024-01-01T01:00:00+01:00")]
            ),
            n(0.0)
        );
        assert_eq!(
            call("timecmp", vec![s("2024-01-01T00:00:00Z"), s("2025-01-01T00:00:00Z")]),
            n(-1.0)
        );
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let now = call("timestamp", vec![]);
        assert!(chrono::DateTime::parse_from_rfc3339(now.as_str().unwrap()).is_ok());
    }
}
