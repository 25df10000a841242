//! Diagnostic rendering
//!
//! Diagnostics are sorted, diagnostics sharing a summary are folded into one,
//! and a warnings-only run collapses to a compact list. A diagnostic whose
//! source file can still be read is drawn through miette with the offending
//! range underlined; anything else falls back to plain text.

use console::Style;
use kubehcl_core::{Diagnostic, Diagnostics, Severity, SourceRange};
use miette::{GraphicalReportHandler, GraphicalTheme, LabeledSpan, MietteDiagnostic, NamedSource};

use crate::error::{CliError, Result};

/// Diagnostics sharing a summary beyond this count are folded
const CONSOLIDATE_THRESHOLD: usize = 1;

/// Terminal output settings
#[derive(Debug, Clone, Copy)]
pub struct View {
    colors: bool,
}

impl View {
    pub fn new(no_color: bool) -> Self {
        if no_color {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }
        Self {
            colors: !no_color && console::colors_enabled_stderr(),
        }
    }

    pub fn colors(&self) -> bool {
        self.colors
    }

    pub fn print(&self, diags: Diagnostics) {
        if !diags.is_empty() {
            eprintln!("{}", render_diagnostics(diags, self.colors));
        }
    }

    /// Print `diags` to stderr, failing when any of them is an error
    pub fn check(&self, diags: Diagnostics) -> Result<()> {
        let errors = diags.errors().count();
        self.print(diags);
        if errors > 0 {
            return Err(CliError::invalid(errors));
        }
        Ok(())
    }

    /// Print the diagnostics of a failed operation
    pub fn fail(&self, diags: Diagnostics) -> CliError {
        let errors = diags.errors().count().max(1);
        self.print(diags);
        CliError::failed(errors)
    }
}

pub fn render_diagnostics(mut diags: Diagnostics, colors: bool) -> String {
    diags.sort();
    let diags = diags.consolidate(CONSOLIDATE_THRESHOLD);
    if let Some(compact) = diags.compact_warnings() {
        return compact;
    }
    diags
        .iter()
        .map(|diag| render_diagnostic(diag, colors))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_diagnostic(diag: &Diagnostic, colors: bool) -> String {
    if let Some(subject) = &diag.subject
        && let Some(rendered) = render_with_source(diag, subject, colors)
    {
        return rendered;
    }
    render_plain(diag, colors)
}

fn render_with_source(diag: &Diagnostic, subject: &SourceRange, colors: bool) -> Option<String> {
    let src = std::fs::read_to_string(&subject.filename).ok()?;
    if subject.start.byte > src.len() {
        return None;
    }
    let end = subject.end.byte.clamp(subject.start.byte, src.len());

    let severity = match diag.severity {
        Severity::Error => miette::Severity::Error,
        Severity::Warning => miette::Severity::Warning,
    };
    let mut report = MietteDiagnostic::new(diag.summary.clone())
        .with_severity(severity)
        .with_label(LabeledSpan::at(subject.start.byte..end, "here"));
    if !diag.detail.is_empty() {
        report = report.with_help(diag.detail.clone());
    }
    let report = miette::Report::new(report)
        .with_source_code(NamedSource::new(subject.filename.clone(), src));

    let theme = if colors {
        GraphicalTheme::unicode()
    } else {
        GraphicalTheme::unicode_nocolor()
    };
    let mut out = String::new();
    GraphicalReportHandler::new_themed(theme)
        .render_report(&mut out, &*report)
        .ok()?;
    Some(out)
}

fn render_plain(diag: &Diagnostic, colors: bool) -> String {
    let style = match diag.severity {
        Severity::Error => Style::new().red().bold(),
        Severity::Warning => Style::new().yellow().bold(),
    }
    .force_styling(colors);

    let mut out = format!(
        "{} {}",
        style.apply_to(format!("{}:", diag.severity)),
        Style::new().bold().force_styling(colors).apply_to(&diag.summary)
    );
    if let Some(subject) = &diag.subject {
        out.push_str(&format!("\n\n  on {}", subject));
    }
    if !diag.detail.is_empty() {
        out.push_str(&format!("\n\n{}", diag.detail));
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_core::Pos;

    #[test]
    fn test_plain_rendering() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error("Couldn't pull module", "Tag v2 cannot be pulled"));
        let out = render_diagnostics(diags, false);
        assert_eq!(out, "Error: Couldn't pull module\n\nTag v2 cannot be pulled\n");
    }

    #[test]
    fn test_warnings_only_are_compact() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("Storage kind has changed", ""));
        diags.push(Diagnostic::warning("Release does not exist", ""));
        let out = render_diagnostics(diags, false);
        assert!(out.starts_with("Warnings:\n"), "{out}");
        assert!(out.contains("- Release does not exist"));
    }

    #[test]
    fn test_duplicate_errors_are_folded() {
        let mut diags = Diagnostics::new();
        for _ in 0..3 {
            diags.push(Diagnostic::error("Unsupported argument", ""));
        }
        let out = render_diagnostics(diags, false);
        assert_eq!(out.matches("Unsupported argument").count(), 1);
        assert!(out.contains("(and 2 more similar messages elsewhere)"));
    }

    #[test]
    fn test_source_snippet() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("main.hcl");
        let src = "kube_resource \"cm\" {\n  kind = 3\n}\n";
        std::fs::write(&file, src).unwrap();
        let start = src.find("3").unwrap();
        let range = SourceRange::new(
            file.display().to_string(),
            Pos::new(2, 10, start),
            Pos::new(2, 11, start + 1),
        );
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error("Incorrect attribute value type", "").with_subject(&range));

        let out = render_diagnostics(diags, false);
        assert!(out.contains("Incorrect attribute value type"), "{out}");
        assert!(out.contains("kind = 3"), "{out}");
        assert!(out.contains("main.hcl"), "{out}");
    }

    #[test]
    fn test_missing_source_falls_back_to_plain() {
        let range = SourceRange::new("/nowhere/main.hcl", Pos::new(1, 1, 0), Pos::new(1, 2, 1));
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error("Unknown block", "").with_subject(&range));
        let out = render_diagnostics(diags, false);
        assert!(out.starts_with("Error: Unknown block\n\n  on /nowhere/main.hcl"), "{out}");
    }
}
