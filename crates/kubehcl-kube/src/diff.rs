//! Plan output: what an install would change
//!
//! Each planned resource is rendered as YAML on both sides and compared
//! line by line. Server populated fields are stripped first so that only
//! differences kubehcl would act on show up.

use console::style;
use serde::Serialize;
use serde_json::Value as JsonValue;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::Result;
use crate::patch::merged;
use crate::resource::strip_server_fields;

/// Lines of context around each change
const CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

impl ChangeType {
    fn symbol(self) -> &'static str {
        match self {
            ChangeType::Added => "+",
            ChangeType::Modified => "~",
            ChangeType::Removed => "-",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            ChangeType::Added => "will be created",
            ChangeType::Modified => "will be updated",
            ChangeType::Removed => "will be destroyed",
        }
    }
}

/// One resource whose cluster object would change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceChange {
    /// Instance name, e.g. `module.test[s1].kube_resource.web`
    pub key: String,
    pub change: ChangeType,
    /// Object as it is now, `None` when added
    pub current: Option<JsonValue>,
    /// Object after the install, `None` when removed
    pub wanted: Option<JsonValue>,
}

impl ResourceChange {
    /// Unified YAML diff between both sides
    pub fn diff_text(&self) -> Result<String> {
        let before = to_yaml(self.current.as_ref())?;
        let after = to_yaml(self.wanted.as_ref())?;
        let diff = TextDiff::from_lines(&before, &after);
        let mut out = String::new();
        for group in diff.grouped_ops(CONTEXT_LINES) {
            for op in group {
                for change in diff.iter_changes(&op) {
                    let sign = match change.tag() {
                        ChangeTag::Delete => "-",
                        ChangeTag::Insert => "+",
                        ChangeTag::Equal => " ",
                    };
                    let _ = writeln!(out, "{}{}", sign, change.value().trim_end_matches('\n'));
                }
            }
        }
        Ok(out)
    }
}

fn to_yaml(object: Option<&JsonValue>) -> Result<String> {
    match object {
        Some(object) => Ok(serde_yaml::to_string(object)?),
        None => Ok(String::new()),
    }
}

/// Every change an install would make, ordered by key
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanResult {
    pub changes: Vec<ResourceChange>,
}

impl PlanResult {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn count(&self, change: ChangeType) -> usize {
        self.changes.iter().filter(|c| c.change == change).count()
    }

    pub fn summary(&self) -> String {
        if !self.has_changes() {
            return "No changes. The cluster matches the configuration.".to_string();
        }
        format!(
            "Plan: {} to add, {} to change, {} to destroy.",
            self.count(ChangeType::Added),
            self.count(ChangeType::Modified),
            self.count(ChangeType::Removed)
        )
    }

    /// Human readable plan, coloured when `colors` is set
    pub fn render(&self, colors: bool) -> Result<String> {
        let mut out = String::new();
        for change in &self.changes {
            let header = format!(
                "{} {} {}",
                change.change.symbol(),
                change.key,
                change.change.verb()
            );
            let header = match (colors, change.change) {
                (false, _) => header,
                (true, ChangeType::Added) => style(header).green().bold().to_string(),
                (true, ChangeType::Modified) => style(header).yellow().bold().to_string(),
                (true, ChangeType::Removed) => style(header).red().bold().to_string(),
            };
            let _ = writeln!(out, "{header}");
            for line in change.diff_text()?.lines() {
                let line = match line.chars().next() {
                    Some('+') if colors => style(line).green().to_string(),
                    Some('-') if colors => style(line).red().to_string(),
                    _ => line.to_string(),
                };
                let _ = writeln!(out, "  {line}");
            }
            out.push('\n');
        }
        out.push_str(&self.summary());
        out.push('\n');
        Ok(out)
    }
}

/// Side of one resource when planning
#[derive(Debug, Clone, Default)]
pub struct PlannedResource {
    /// Last applied object from the release state
    pub stored: Option<JsonValue>,
    /// Object on the cluster
    pub live: Option<JsonValue>,
}

/// Compare the wanted objects against what the cluster holds
///
/// `wanted` maps instance names to the objects the configuration produces,
/// `current` maps instance names to what is stored and live for them. A
/// current entry missing from `wanted` is a removal.
pub fn compare(
    wanted: &BTreeMap<String, JsonValue>,
    current: &BTreeMap<String, PlannedResource>,
) -> PlanResult {
    let mut changes = Vec::new();
    for (key, object) in wanted {
        let entry = current.get(key);
        match entry.and_then(|e| e.live.as_ref()) {
            None => changes.push(ResourceChange {
                key: key.clone(),
                change: ChangeType::Added,
                current: None,
                wanted: Some(normalized(object)),
            }),
            Some(live) => {
                let stored = entry.and_then(|e| e.stored.as_ref());
                let before = normalized(live);
                let after = normalized(&merged(stored, object, live));
                if before != after {
                    changes.push(ResourceChange {
                        key: key.clone(),
                        change: ChangeType::Modified,
                        current: Some(before),
                        wanted: Some(after),
                    });
                }
            }
        }
    }
    for (key, entry) in current {
        if wanted.contains_key(key) {
            continue;
        }
        if let Some(object) = entry.live.as_ref().or(entry.stored.as_ref()) {
            changes.push(ResourceChange {
                key: key.clone(),
                change: ChangeType::Removed,
                current: Some(normalized(object)),
                wanted: None,
            });
        }
    }
    changes.sort_by(|a, b| a.key.cmp(&b.key));
    PlanResult { changes }
}

fn normalized(object: &JsonValue) -> JsonValue {
    let mut object = object.clone();
    strip_server_fields(&mut object);
    object
}
