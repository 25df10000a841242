//! Diagnostics accumulated while loading, evaluating and applying modules
//!
//! Configuration problems are not Rust errors: decoders push diagnostics and
//! keep going so that a single run reports every problem it can find.
//! Only `Diagnostics::has_errors` decides whether a stage may continue.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A position inside a source file (1-based line and column)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize, byte: usize) -> Self {
        Self { line, column, byte }
    }
}

/// A contiguous range in a named source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub filename: String,
    pub start: Pos,
    pub end: Pos,
}

impl SourceRange {
    pub fn new(filename: impl Into<String>, start: Pos, end: Pos) -> Self {
        Self {
            filename: filename.into(),
            start,
            end,
        }
    }

    /// Range covering both `self` and `other` (same file assumed)
    pub fn to(&self, other: &SourceRange) -> SourceRange {
        let start = if other.start.byte < self.start.byte {
            other.start
        } else {
            self.start
        };
        let end = if other.end.byte > self.end.byte {
            other.end
        } else {
            self.end
        };
        SourceRange::new(self.filename.clone(), start, end)
    }

    /// Byte length of the range
    pub fn len(&self) -> usize {
        self.end.byte.saturating_sub(self.start.byte)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{},{}-{}",
            self.filename, self.start.line, self.start.column, self.end.column
        )
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

/// A single error or warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    /// The construct the diagnostic is about
    pub subject: Option<SourceRange>,
    /// A wider range giving context to `subject`
    pub context: Option<SourceRange>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
            context: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(summary, detail)
        }
    }

    /// Wrap a Rust error raised outside of configuration decoding
    pub fn from_error(summary: impl Into<String>, err: &dyn std::error::Error) -> Self {
        Self::error(summary, err.to_string())
    }

    #[must_use]
    pub fn with_subject(mut self, range: &SourceRange) -> Self {
        self.subject = Some(range.clone());
        self
    }

    #[must_use]
    pub fn with_context(mut self, range: &SourceRange) -> Self {
        self.context = Some(range.clone());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    fn sort_key(&self, other: &Diagnostic) -> Ordering {
        self.severity
            .cmp(&other.severity)
            .then_with(|| match (&self.subject, &other.subject) {
                (Some(a), Some(b)) => a
                    .filename
                    .cmp(&b.filename)
                    .then(a.start.byte.cmp(&b.start.byte)),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.summary.cmp(&other.summary))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        if let Some(subject) = &self.subject {
            write!(f, "\n\n  on {}", subject)?;
        }
        if !self.detail.is_empty() {
            write!(f, "\n\n{}", self.detail)?;
        }
        Ok(())
    }
}

/// An ordered collection of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    /// Push an error diagnostic pointing at `range`
    pub fn error(
        &mut self,
        summary: impl Into<String>,
        detail: impl Into<String>,
        range: &SourceRange,
    ) {
        self.push(Diagnostic::error(summary, detail).with_subject(range));
    }

    /// Push a warning diagnostic pointing at `range`
    pub fn warning(
        &mut self,
        summary: impl Into<String>,
        detail: impl Into<String>,
        range: &SourceRange,
    ) {
        self.push(Diagnostic::warning(summary, detail).with_subject(range));
    }

    pub fn append(&mut self, mut other: Diagnostics) {
        self.0.append(&mut other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn has_warnings(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| !d.is_error())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Errors first, then by file and position, then by summary
    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| a.sort_key(b));
    }

    /// Merge diagnostics sharing severity and summary once more than
    /// `threshold` of them exist. The first occurrence is kept and its detail
    /// records how many others were folded into it.
    pub fn consolidate(self, threshold: usize) -> Diagnostics {
        let mut counts: BTreeMap<(Severity, String), usize> = BTreeMap::new();
        for diag in &self.0 {
            *counts
                .entry((diag.severity, diag.summary.clone()))
                .or_default() += 1;
        }

        let mut seen: BTreeSet<(Severity, String)> = BTreeSet::new();
        let mut out = Vec::new();
        for mut diag in self.0 {
            let key = (diag.severity, diag.summary.clone());
            let total = counts.get(&key).copied().unwrap_or(1);
            if total <= threshold {
                out.push(diag);
                continue;
            }
            if !seen.insert(key) {
                continue;
            }
            let others = total - 1;
            let suffix = if others == 1 {
                "(and 1 more similar message elsewhere)".to_string()
            } else {
                format!("(and {} more similar messages elsewhere)", others)
            };
            if diag.detail.is_empty() {
                diag.detail = suffix;
            } else {
                diag.detail = format!("{}\n\n{}", diag.detail, suffix);
            }
            out.push(diag);
        }
        Diagnostics(out)
    }

    /// One-line-per-warning rendering used when no errors are present
    pub fn compact_warnings(&self) -> Option<String> {
        if self.has_errors() || !self.has_warnings() {
            return None;
        }
        let mut out = String::from("Warnings:\n");
        for diag in self.warnings() {
            out.push_str("\n- ");
            out.push_str(&diag.summary);
            if let Some(subject) = &diag.subject {
                out.push_str(&format!(
                    "\n  on {} line {}",
                    subject.filename, subject.start.line
                ));
            }
        }
        Some(out)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}
