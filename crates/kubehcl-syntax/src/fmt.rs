//! Canonical source formatting
//!
//! The formatter works line by line and never reparses expressions:
//! - indentation is two spaces per open bracket
//! - `=` signs of consecutive single-line attributes are aligned
//! - runs of blank lines collapse to one
//! - heredoc bodies and block comments are copied untouched

use once_cell::sync::Lazy;
use regex::Regex;

static ATTRIBUTE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)\s*=(.*)$").expect("static regex")
});

static HEREDOC_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<<-?([A-Za-z_][A-Za-z0-9_]*)\s*$").expect("static regex")
});

const INDENT: &str = "  ";

#[derive(Debug)]
enum Line {
    Blank,
    /// Copied as-is (heredoc body, block comment)
    Verbatim(String),
    Code {
        depth: usize,
        text: String,
    },
    Attribute {
        depth: usize,
        name: String,
        value: String,
    },
}

/// Bracket summary of one line of code
#[derive(Debug, Default)]
struct Scan {
    opens: usize,
    closes: usize,
    leading_closes: usize,
    /// Line ends inside an unterminated `/*` comment
    in_comment: bool,
}

/// Format kubehcl source into its canonical layout
pub fn format_source(src: &str) -> String {
    let lines = classify(src);
    render(&lines)
}

/// Whether `src` is already canonically formatted
pub fn is_formatted(src: &str) -> bool {
    format_source(src) == src
}

fn classify(src: &str) -> Vec<Line> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut heredoc: Option<String> = None;
    let mut in_comment = false;

    for raw in src.lines() {
        let raw = raw.trim_end_matches('\r');

        if let Some(marker) = &heredoc {
            if raw.trim() == marker {
                heredoc = None;
            }
            out.push(Line::Verbatim(raw.to_string()));
            continue;
        }

        if in_comment {
            if let Some(end) = raw.find("*/") {
                in_comment = false;
                let scan = scan_line(&raw[end + 2..], false);
                depth = (depth + scan.opens).saturating_sub(scan.closes);
                in_comment = scan.in_comment;
            }
            out.push(Line::Verbatim(raw.to_string()));
            continue;
        }

        let text = raw.trim();
        if text.is_empty() {
            out.push(Line::Blank);
            continue;
        }

        let scan = scan_line(text, false);
        let line_depth = depth.saturating_sub(scan.leading_closes);
        let balanced = scan.opens == scan.closes;

        match ATTRIBUTE_LINE.captures(text) {
            Some(caps)
                if balanced
                    && !caps[2].starts_with('=')
                    && !caps[2].starts_with('>') =>
            {
                out.push(Line::Attribute {
                    depth: line_depth,
                    name: caps[1].to_string(),
                    value: caps[2].trim().to_string(),
                });
            }
            Some(caps) if !caps[2].starts_with('=') && !caps[2].starts_with('>') => {
                // Attribute whose value continues on the next lines
                out.push(Line::Code {
                    depth: line_depth,
                    text: format!("{} = {}", &caps[1], caps[2].trim()),
                });
            }
            _ => out.push(Line::Code {
                depth: line_depth,
                text: text.to_string(),
            }),
        }

        depth = (depth + scan.opens).saturating_sub(scan.closes);
        in_comment = scan.in_comment;
        if let Some(caps) = HEREDOC_START.captures(text) {
            heredoc = Some(caps[1].to_string());
        }
    }

    out
}

/// Count brackets outside of strings and comments
fn scan_line(line: &str, start_in_comment: bool) -> Scan {
    #[derive(PartialEq)]
    enum Frame {
        Str,
        Interp(usize),
    }

    let mut scan = Scan {
        in_comment: start_in_comment,
        ..Default::default()
    };
    let mut stack: Vec<Frame> = Vec::new();
    let mut leading = true;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if scan.in_comment {
            if c == '*' && next == Some('/') {
                scan.in_comment = false;
                i += 1;
            }
            i += 1;
            continue;
        }

        match stack.last_mut() {
            None => match c {
                '#' => break,
                '/' if next == Some('/') => break,
                '/' if next == Some('*') => {
                    scan.in_comment = true;
                    i += 1;
                }
                '"' => stack.push(Frame::Str),
                '{' | '[' | '(' => scan.opens += 1,
                '}' | ']' | ')' => {
                    scan.closes += 1;
                    if leading {
                        scan.leading_closes += 1;
                    }
                }
                _ => {}
            },
            Some(Frame::Str) => match c {
                '\\' => i += 1,
                '"' => {
                    stack.pop();
                }
                '$' | '%' if next == Some('{') => {
                    stack.push(Frame::Interp(0));
                    i += 1;
                }
                _ => {}
            },
            Some(Frame::Interp(open)) => match c {
                '"' => stack.push(Frame::Str),
                '{' => *open += 1,
                '}' if *open == 0 => {
                    stack.pop();
                }
                '}' => *open -= 1,
                _ => {}
            },
        }

        if !matches!(c, '}' | ']' | ')' | ' ' | '\t' | ',') {
            leading = false;
        }
        i += 1;
    }

    scan
}

fn render(lines: &[Line]) -> String {
    let mut out = String::new();
    let mut pending_blank = false;
    let mut i = 0;

    while i < lines.len() {
        match &lines[i] {
            Line::Blank => {
                pending_blank = !out.is_empty();
                i += 1;
                continue;
            }
            Line::Verbatim(text) => {
                flush_blank(&mut out, &mut pending_blank);
                out.push_str(text);
                out.push('\n');
                i += 1;
            }
            Line::Code { depth, text } => {
                // No blank line directly before a closing bracket
                if !text.starts_with(['}', ']', ')']) {
                    flush_blank(&mut out, &mut pending_blank);
                }
                pending_blank = false;
                push_indented(&mut out, *depth, text);
                i += 1;
            }
            Line::Attribute { depth, .. } => {
                flush_blank(&mut out, &mut pending_blank);
                let group_end = attribute_run_end(lines, i, *depth);
                let width = lines[i..group_end]
                    .iter()
                    .filter_map(|l| match l {
                        Line::Attribute { name, .. } => Some(name.chars().count()),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0);
                for line in &lines[i..group_end] {
                    if let Line::Attribute { depth, name, value } = line {
                        let text = if value.is_empty() {
                            format!("{:width$} =", name, width = width)
                        } else {
                            format!("{:width$} = {}", name, value, width = width)
                        };
                        push_indented(&mut out, *depth, &text);
                    }
                }
                i = group_end;
            }
        }
    }

    out
}

/// End index of the run of single-line attributes at `depth` starting at `start`
fn attribute_run_end(lines: &[Line], start: usize, depth: usize) -> usize {
    let mut end = start;
    while let Some(Line::Attribute { depth: d, .. }) = lines.get(end) {
        if *d != depth {
            break;
        }
        end += 1;
    }
    end
}

fn flush_blank(out: &mut String, pending: &mut bool) {
    if *pending {
        out.push('\n');
        *pending = false;
    }
}

fn push_indented(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indents_and_aligns() {
        let src = "kube_resource \"web\" {\napiVersion = \"v1\"\nkind=\"ConfigMap\"\nmetadata = {\nname = \"web\"\n}\n}\n";
        let expected = "kube_resource \"web\" {\n  apiVersion = \"v1\"\n  kind       = \"ConfigMap\"\n  metadata = {\n    name = \"web\"\n  }\n}\n";
        assert_eq!(format_source(src), expected);
        assert!(is_formatted(expected));
    }

    #[test]
    fn test_collapses_blank_lines() {
        let src = "\n\na = 1\n\n\n\nb = 2\n\n";
        assert_eq!(format_source(src), "a = 1\n\nb = 2\n");
    }

    #[test]
    fn test_ignores_brackets_in_strings_and_comments() {
        let src = "a = \"{ ${format(\"}\", x)}\" # {\nb = 1\n";
        assert_eq!(format_source(src), src);
    }

    #[test]
    fn test_heredoc_body_untouched() {
        let src = "data = <<EOT\n   keep { me\nEOT\nb   =  2\n";
        assert_eq!(format_source(src), "data = <<EOT\n   keep { me\nEOT\nb = 2\n");
    }

    #[test]
    fn test_comparison_is_not_an_attribute() {
        let src = "locals {\nok = a == b\n}\n";
        assert_eq!(format_source(src), "locals {\n  ok = a == b\n}\n");
    }

    #[test]
    fn test_module_layout_snapshot() {
        let src = "backend_storage {\nkube_secret {}\n}\n\n\nkube_resource \"web\" {\napiVersion=\"apps/v1\"\nkind = \"Deployment\"\nmetadata {\nname = \"web\"\nlabels = {\napp = \"web\"\n}\n}\n}\n";
        insta::assert_snapshot!(format_source(src), @r#"
        backend_storage {
          kube_secret {}
        }

        kube_resource "web" {
          apiVersion = "apps/v1"
          kind       = "Deployment"
          metadata {
            name = "web"
            labels = {
              app = "web"
            }
          }
        }
        "#);
    }

    #[test]
    fn test_is_idempotent() {
        let src = "variable \"x\" {\n  type    = list(string)\n  default = [\n    \"a\",\n  ]\n}\n";
        let once = format_source(src);
        assert_eq!(format_source(&once), once);
    }
}
