//! Snapshot model and comparator.
//!
//! A [`ServerSnapshot`] is the pinned view of a downstream server's
//! configuration surface: its instructions text plus every tool's name,
//! description, and input schema. Snapshots are immutable values; a refresh
//! builds a new one. [`diff_snapshots`] is the pure comparator that produces
//! the human-reviewable change set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use warden_types::protocol::McpToolDef;

use crate::canonical::{hash_instructions, hash_tool, normalize_schema};

// ============================================================
// Snapshot types
// ============================================================

/// One tool's pinned surface: name, description, and raw input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name, compared case-sensitively.
    pub name: String,
    /// Tool description, compared byte-exactly (modulo one trailing newline).
    pub description: String,
    /// The tool's input schema as received, unnormalized.
    pub input_schema: serde_json::Value,
}

impl From<McpToolDef> for ToolSpec {
    fn from(def: McpToolDef) -> Self {
        Self {
            name: def.name,
            description: def.description.unwrap_or_default(),
            input_schema: def.input_schema,
        }
    }
}

/// A point-in-time view of a downstream server's configuration surface.
///
/// Tools are keyed by name; ordering in the downstream's `tools/list`
/// response carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    /// Server instructions. Absent and empty are distinct.
    pub instructions: Option<String>,
    /// Tools keyed by name.
    pub tools: BTreeMap<String, ToolSpec>,
}

impl ServerSnapshot {
    /// Build a snapshot from an `initialize` instructions field and a
    /// `tools/list` result. A duplicate tool name keeps the last definition.
    pub fn from_parts(instructions: Option<String>, tools: Vec<McpToolDef>) -> Self {
        let tools = tools
            .into_iter()
            .map(|def| (def.name.clone(), ToolSpec::from(def)))
            .collect();
        Self {
            instructions,
            tools,
        }
    }

    /// Look up a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Tool names in deterministic order.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}

// ============================================================
// Comparator
// ============================================================

/// Field-level annotations for one modified tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolChanges {
    /// The description text changed.
    pub description_changed: bool,
    /// The input schema changed after normalization.
    pub schema_changed: bool,
}

/// Differences between two snapshots, for human review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDiff {
    /// The instructions text changed (including appearing or disappearing).
    pub instructions_changed: bool,
    /// Tools present only in the new snapshot.
    pub added_tools: Vec<String>,
    /// Tools present only in the old snapshot.
    pub removed_tools: Vec<String>,
    /// Tools present in both but no longer equal, with what changed.
    pub modified_tools: BTreeMap<String, ToolChanges>,
}

impl ConfigDiff {
    /// Whether the two snapshots differ at all.
    pub fn has_differences(&self) -> bool {
        self.instructions_changed
            || !self.added_tools.is_empty()
            || !self.removed_tools.is_empty()
            || !self.modified_tools.is_empty()
    }
}

impl std::fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_differences() {
            return write!(f, "No differences found.");
        }
        if self.instructions_changed {
            writeln!(f, "Instructions changed.")?;
        }
        if !self.added_tools.is_empty() {
            writeln!(f, "Added tools:")?;
            for name in &self.added_tools {
                writeln!(f, "  + {name}")?;
            }
        }
        if !self.removed_tools.is_empty() {
            writeln!(f, "Removed tools:")?;
            for name in &self.removed_tools {
                writeln!(f, "  - {name}")?;
            }
        }
        if !self.modified_tools.is_empty() {
            writeln!(f, "Modified tools:")?;
            for (name, changes) in &self.modified_tools {
                let mut fields = Vec::new();
                if changes.description_changed {
                    fields.push("description");
                }
                if changes.schema_changed {
                    fields.push("input schema");
                }
                writeln!(f, "  ~ {name}: {} changed", fields.join(" and "))?;
            }
        }
        Ok(())
    }
}

/// Compare two snapshots. Pure; neither snapshot is mutated.
///
/// Tool comparison is semantic: descriptions byte-exact modulo one trailing
/// newline, schemas equal after canonical normalization. A tool whose schema
/// fails to normalize on either side counts as modified.
pub fn diff_snapshots(old: &ServerSnapshot, new: &ServerSnapshot) -> ConfigDiff {
    let mut diff = ConfigDiff {
        instructions_changed: hash_instructions(old.instructions.as_deref())
            != hash_instructions(new.instructions.as_deref()),
        ..ConfigDiff::default()
    };

    for name in new.tools.keys() {
        if !old.tools.contains_key(name) {
            diff.added_tools.push(name.clone());
        }
    }
    for name in old.tools.keys() {
        if !new.tools.contains_key(name) {
            diff.removed_tools.push(name.clone());
        }
    }

    for (name, old_tool) in &old.tools {
        let Some(new_tool) = new.tools.get(name) else {
            continue;
        };
        match (hash_tool(old_tool), hash_tool(new_tool)) {
            (Ok(old_hash), Ok(new_hash)) if old_hash == new_hash => continue,
            _ => {}
        }
        let description_changed = strip_newline(&old_tool.description)
            != strip_newline(&new_tool.description);
        let schema_changed = match (
            normalize_schema(&old_tool.input_schema),
            normalize_schema(&new_tool.input_schema),
        ) {
            (Ok(a), Ok(b)) => a != b,
            // A malformed schema on either side is itself a change.
            _ => true,
        };
        diff.modified_tools.insert(
            name.clone(),
            ToolChanges {
                description_changed,
                schema_changed,
            },
        );
    }

    diff
}

fn strip_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_types::protocol::McpToolDef;

    fn tool_def(name: &str, description: &str, schema: serde_json::Value) -> McpToolDef {
        McpToolDef {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: schema,
        }
    }

    fn echo_schema() -> serde_json::Value {
        json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x"]})
    }

    #[test]
    fn snapshot_ignores_tool_declaration_order() {
        let a = ServerSnapshot::from_parts(
            Some("Hi".to_string()),
            vec![
                tool_def("echo", "Echo", echo_schema()),
                tool_def("sum", "Sum", json!({"type": "object"})),
            ],
        );
        let b = ServerSnapshot::from_parts(
            Some("Hi".to_string()),
            vec![
                tool_def("sum", "Sum", json!({"type": "object"})),
                tool_def("echo", "Echo", echo_schema()),
            ],
        );
        assert_eq!(a, b);
        assert!(!diff_snapshots(&a, &b).has_differences());
    }

    #[test]
    fn diff_reports_added_and_removed_tools() {
        let old = ServerSnapshot::from_parts(None, vec![tool_def("echo", "Echo", echo_schema())]);
        let new = ServerSnapshot::from_parts(None, vec![tool_def("sum", "Sum", echo_schema())]);
        let diff = diff_snapshots(&old, &new);
        assert_eq!(diff.added_tools, vec!["sum"]);
        assert_eq!(diff.removed_tools, vec!["echo"]);
        assert!(diff.modified_tools.is_empty());
        assert!(!diff.instructions_changed);
    }

    #[test]
    fn diff_annotates_what_changed_in_a_tool() {
        let old = ServerSnapshot::from_parts(None, vec![tool_def("echo", "Echo", echo_schema())]);
        let new_desc =
            ServerSnapshot::from_parts(None, vec![tool_def("echo", "Echo v2", echo_schema())]);
        let diff = diff_snapshots(&old, &new_desc);
        let changes = diff.modified_tools.get("echo").unwrap();
        assert!(changes.description_changed);
        assert!(!changes.schema_changed);

        let new_schema = ServerSnapshot::from_parts(
            None,
            vec![tool_def("echo", "Echo", json!({"type": "object"}))],
        );
        let diff = diff_snapshots(&old, &new_schema);
        let changes = diff.modified_tools.get("echo").unwrap();
        assert!(!changes.description_changed);
        assert!(changes.schema_changed);
    }

    #[test]
    fn diff_detects_instruction_appearance_and_disappearance() {
        let absent = ServerSnapshot::from_parts(None, vec![]);
        let empty = ServerSnapshot::from_parts(Some(String::new()), vec![]);
        assert!(diff_snapshots(&absent, &empty).instructions_changed);
        assert!(diff_snapshots(&empty, &absent).instructions_changed);
        assert!(!diff_snapshots(&absent, &absent).instructions_changed);
    }

    #[test]
    fn schema_key_order_is_not_a_modification() {
        let old = ServerSnapshot::from_parts(
            None,
            vec![tool_def(
                "echo",
                "Echo",
                json!({"type": "object", "required": ["a", "b"]}),
            )],
        );
        let new = ServerSnapshot::from_parts(
            None,
            vec![tool_def(
                "echo",
                "Echo",
                json!({"required": ["b", "a"], "type": "object"}),
            )],
        );
        assert!(!diff_snapshots(&old, &new).has_differences());
    }

    #[test]
    fn malformed_schema_counts_as_modified() {
        let old = ServerSnapshot::from_parts(None, vec![tool_def("echo", "Echo", echo_schema())]);
        let new = ServerSnapshot::from_parts(None, vec![tool_def("echo", "Echo", json!("bogus"))]);
        let diff = diff_snapshots(&old, &new);
        assert!(diff.modified_tools.get("echo").unwrap().schema_changed);
    }

    #[test]
    fn diff_display_is_reviewable() {
        let old = ServerSnapshot::from_parts(
            Some("Hi".to_string()),
            vec![tool_def("echo", "Echo", echo_schema())],
        );
        let new = ServerSnapshot::from_parts(
            Some("Hello".to_string()),
            vec![tool_def("echo", "Echo v2", echo_schema())],
        );
        let rendered = diff_snapshots(&old, &new).to_string();
        assert!(rendered.contains("Instructions changed."));
        assert!(rendered.contains("~ echo: description changed"));

        let none = diff_snapshots(&old, &old).to_string();
        assert_eq!(none, "No differences found.");
    }
}
