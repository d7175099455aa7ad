//! Diff engine for comparing declarations against recorded state.
//!
//! Inputs are compared structurally and unresolved: a reference equals
//! another reference to the same output, whatever that output currently
//! holds.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::ConfigHasher;
use crate::graph::{InputValue, ResourceNode};
use crate::state::StateRecord;

/// Engine for computing per-node diffs.
#[derive(Debug, Default)]
pub struct DiffEngine {
    hasher: ConfigHasher,
}

/// Difference for a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    /// Node id.
    pub node_id: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Changed fields, empty when unchanged.
    pub details: Vec<DiffDetail>,
    /// Recorded input fingerprint, if any.
    pub old_hash: Option<String>,
    /// Declared input fingerprint, if the node is still declared.
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// No record exists.
    Create,
    /// Inputs or kind differ from the record, or declared outputs are
    /// missing from it.
    Update,
    /// Recorded but no longer declared.
    Delete,
    /// Identical to the record.
    NoChange,
}

/// How a field changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Field is new.
    Added,
    /// Field was dropped.
    Removed,
    /// Field value differs.
    Modified,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffDetail {
    /// Input name, `kind` for a kind change, or `outputs` for declared
    /// outputs missing from the record.
    pub field: String,
    /// How the field changed.
    pub change: ChangeKind,
    /// Recorded value.
    pub old_value: Option<InputValue>,
    /// Declared value.
    pub new_value: Option<InputValue>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Diffs a declared node against its record, if any.
    #[must_use]
    pub fn diff_node(&self, node: &ResourceNode, record: Option<&StateRecord>) -> ResourceDiff {
        let new_hash = self.hasher.hash_inputs(&node.inputs);

        let Some(record) = record else {
            debug!("{} has no record, will be created", node.id);
            return ResourceDiff {
                node_id: node.id.clone(),
                diff_type: DiffType::Create,
                details: Vec::new(),
                old_hash: None,
                new_hash: Some(new_hash),
            };
        };

        let mut details = Vec::new();
        if record.kind != node.kind {
            details.push(DiffDetail {
                field: String::from("kind"),
                change: ChangeKind::Modified,
                old_value: Some(InputValue::string(record.kind.as_str())),
                new_value: Some(InputValue::string(node.kind.as_str())),
            });
        }
        details.extend(Self::diff_inputs(node, record));
        details.extend(Self::diff_outputs(node, record));

        let diff_type = if details.is_empty() {
            DiffType::NoChange
        } else {
            debug!("{} changed in {} field(s)", node.id, details.len());
            DiffType::Update
        };

        ResourceDiff {
            node_id: node.id.clone(),
            diff_type,
            details,
            old_hash: Some(self.hasher.hash_inputs(&record.last_applied_inputs)),
            new_hash: Some(new_hash),
        }
    }

    /// Diffs a record whose node is no longer declared.
    #[must_use]
    pub fn diff_removed(&self, record: &StateRecord) -> ResourceDiff {
        ResourceDiff {
            node_id: record.node_id.clone(),
            diff_type: DiffType::Delete,
            details: Vec::new(),
            old_hash: Some(self.hasher.hash_inputs(&record.last_applied_inputs)),
            new_hash: None,
        }
    }

    /// Declared outputs the last apply never produced force an update, so
    /// the provider is asked for them before any consumer resolves them.
    fn diff_outputs(node: &ResourceNode, record: &StateRecord) -> Option<DiffDetail> {
        let missing: Vec<InputValue> = node
            .outputs
            .iter()
            .filter(|name| !record.last_known_outputs.contains_key(*name))
            .map(|name| InputValue::string(name.as_str()))
            .collect();
        if missing.is_empty() {
            return None;
        }
        Some(DiffDetail {
            field: String::from("outputs"),
            change: ChangeKind::Added,
            old_value: None,
            new_value: Some(InputValue::List(missing)),
        })
    }

    fn diff_inputs(node: &ResourceNode, record: &StateRecord) -> Vec<DiffDetail> {
        let names: BTreeSet<&String> = node
            .inputs
            .keys()
            .chain(record.last_applied_inputs.keys())
            .collect();

        names
            .into_iter()
            .filter_map(|name| {
                let old = record.last_applied_inputs.get(name);
                let new = node.inputs.get(name);
                let change = match (old, new) {
                    (None, Some(_)) => ChangeKind::Added,
                    (Some(_), None) => ChangeKind::Removed,
                    (Some(a), Some(b)) if a != b => ChangeKind::Modified,
                    _ => return None,
                };
                Some(DiffDetail {
                    field: name.clone(),
                    change,
                    old_value: old.cloned(),
                    new_value: new.cloned(),
                })
            })
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.old_value, &self.new_value) {
            (Some(old), Some(new)) => write!(f, "~ {}: {old} -> {new}", self.field),
            (None, Some(new)) => write!(f, "+ {}: {new}", self.field),
            (Some(old), None) => write!(f, "- {}: {old}", self.field),
            (None, None) => write!(f, "  {}", self.field),
        }
    }
}
