//! State types.
//!
//! The state is the engine's record of what it has applied: one record per
//! node, holding the inputs last sent to the provider and the outputs it
//! returned. Planning compares declarations against these records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::{InputValue, RemovalPolicy, ResourceKind, ResourceNode};
use crate::provider::Outputs;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete recorded state of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last fully applied declaration set.
    pub declaration_hash: String,
    /// Records by node id.
    #[serde(default)]
    pub records: BTreeMap<String, StateRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// What the engine last applied for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Node id.
    pub node_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Inputs as declared, references unresolved.
    pub last_applied_inputs: BTreeMap<String, InputValue>,
    /// Outputs the provider returned.
    pub last_known_outputs: Outputs,
    /// Removal policy in effect when last applied.
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
    /// Declaration position when last applied, used to order teardown.
    #[serde(default)]
    pub position: usize,
    /// Fingerprint of `last_applied_inputs`.
    #[serde(default)]
    pub inputs_hash: String,
    /// When the record was written.
    pub applied_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Declaration hash at the time of the run.
    pub declaration_hash: String,
    /// Nodes the run touched.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Plan applied.
    Apply,
    /// Stack torn down.
    Destroy,
    /// Record dropped by hand.
    Forget,
}

impl StackState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(stack: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            environment: environment.to_string(),
            declaration_hash: String::new(),
            records: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a record by node id.
    #[must_use]
    pub fn get_record(&self, node_id: &str) -> Option<&StateRecord> {
        self.records.get(node_id)
    }

    /// Adds or replaces a record.
    pub fn upsert_record(&mut self, record: StateRecord) {
        self.records.insert(record.node_id.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by node id.
    pub fn remove_record(&mut self, node_id: &str) -> Option<StateRecord> {
        let result = self.records.remove(node_id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns records ordered by declaration position, then id.
    #[must_use]
    pub fn records_by_position(&self) -> Vec<&StateRecord> {
        let mut records: Vec<&StateRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.node_id.cmp(&b.node_id)));
        records
    }

    /// Returns all recorded node ids.
    #[must_use]
    pub fn record_ids(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl StateRecord {
    /// Rebuilds the node this record was applied from.
    ///
    /// Declared outputs are not recorded; the known outputs stand in for
    /// them.
    #[must_use]
    pub fn to_node(&self) -> ResourceNode {
        ResourceNode {
            id: self.node_id.clone(),
            kind: self.kind.clone(),
            inputs: self.last_applied_inputs.clone(),
            outputs: self.last_known_outputs.keys().cloned().collect(),
            removal_policy: self.removal_policy,
        }
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: Operation, declaration_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            declaration_hash: declaration_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: Operation,
        declaration_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            success: false,
            ..Self::new(operation, declaration_hash, resources)
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Forget => "forget",
        };
        write!(f, "{op}")
    }
}
