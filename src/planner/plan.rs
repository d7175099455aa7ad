//! Plan types and construction.
//!
//! A plan lists one action per declared node, in topological order, followed
//! by the deletes for recorded nodes that are no longer declared, in reverse
//! topological order of the graph they were applied from. Executing the
//! actions strictly in sequence never needs an output that is not yet
//! available.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::ConfigHasher;
use crate::error::GraphError;
use crate::graph::{DependencyGraph, InputValue, RemovalPolicy, ResourceKind};
use crate::provider::Outputs;
use crate::state::{StackState, StateRecord};

use super::diff::{DiffDetail, DiffEngine, DiffType};

/// An ordered, dependency-safe sequence of actions.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the declarations this plan was built from.
    pub declaration_hash: String,
    /// Actions in execution order.
    pub actions: Vec<Action>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct Action {
    /// Target node id.
    pub node_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// What to do.
    pub verb: Verb,
    /// Inputs, references unresolved. For deletes, the last applied inputs.
    pub inputs: BTreeMap<String, InputValue>,
    /// Outputs the declarations expect back.
    pub declared_outputs: BTreeSet<String>,
    /// Outputs from the last apply, empty if never applied.
    pub prior_outputs: Outputs,
    /// Removal policy to record, or to honour for deletes.
    pub removal_policy: RemovalPolicy,
    /// Declaration position to record.
    pub position: usize,
    /// Indices of earlier actions that must succeed first.
    pub dependencies: Vec<usize>,
    /// Changed fields, for display.
    pub changes: Vec<DiffDetail>,
    /// Fingerprint of `inputs`.
    pub fingerprint: String,
}

/// Action verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
    /// Create a resource that has no record.
    Create,
    /// Update a resource whose declared inputs changed.
    Update,
    /// Delete, or forget, a resource that is no longer declared.
    Delete,
    /// Leave a resource as is and publish its recorded outputs.
    NoOp,
}

/// Action counts by verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Number of creates.
    pub creates: usize,
    /// Number of updates.
    pub updates: usize,
    /// Number of deletes.
    pub deletes: usize,
    /// Number of no-ops.
    pub unchanged: usize,
}

/// Builds plans from a dependency graph and the recorded state.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    diff: DiffEngine,
    hasher: ConfigHasher,
}

impl PlanBuilder {
    /// Creates a new plan builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            diff: DiffEngine::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Builds the plan that brings `prior` in line with `graph`.
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependency` if either the declared graph or the graph
    /// rebuilt from `prior` has a cycle.
    pub fn build(&self, graph: &DependencyGraph, prior: &StackState) -> Result<Plan, GraphError> {
        let order = graph.topological_order()?;
        let mut actions: Vec<Action> = Vec::with_capacity(order.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for node in order {
            let record = prior.get_record(&node.id);
            let diff = self.diff.diff_node(node, record);
            let verb = match diff.diff_type {
                DiffType::Create => Verb::Create,
                DiffType::Update => Verb::Update,
                DiffType::Delete | DiffType::NoChange => Verb::NoOp,
            };

            let mut dependencies: Vec<usize> = node
                .producer_ids()
                .into_iter()
                .filter_map(|id| index.get(id).copied())
                .collect();
            dependencies.sort_unstable();

            index.insert(node.id.clone(), actions.len());
            actions.push(Action {
                node_id: node.id.clone(),
                kind: node.kind.clone(),
                verb,
                inputs: node.inputs.clone(),
                declared_outputs: node.outputs.clone(),
                prior_outputs: record.map(|r| r.last_known_outputs.clone()).unwrap_or_default(),
                removal_policy: node.removal_policy,
                position: graph.position(&node.id).unwrap_or_default(),
                dependencies,
                changes: diff.details,
                fingerprint: diff.new_hash.unwrap_or_default(),
            });
        }

        self.append_deletes(prior, |id| !graph.contains(id), &mut index, &mut actions)?;

        let plan = Plan {
            created_at: Utc::now(),
            declaration_hash: self.hasher.hash_nodes(graph.nodes()),
            actions,
        };
        debug!("Built plan: {}", plan.summary());
        Ok(plan)
    }

    /// Builds a plan that deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependency` if the recorded graph has a cycle.
    pub fn destroy(&self, prior: &StackState) -> Result<Plan, GraphError> {
        let mut actions = Vec::with_capacity(prior.records.len());
        self.append_deletes(prior, |_| true, &mut HashMap::new(), &mut actions)?;

        Ok(Plan {
            created_at: Utc::now(),
            declaration_hash: self.hasher.hash_nodes(&[]),
            actions,
        })
    }

    /// Appends deletes for the recorded nodes selected by `removed`.
    ///
    /// A delete waits for the actions of every node whose recorded inputs
    /// referenced it: deletes of removed dependents, and updates of
    /// surviving ones that dropped the reference.
    fn append_deletes<F>(
        &self,
        prior: &StackState,
        removed: F,
        index: &mut HashMap<String, usize>,
        actions: &mut Vec<Action>,
    ) -> Result<(), GraphError>
    where
        F: Fn(&str) -> bool,
    {
        let prior_graph = recorded_graph(prior);
        let order = prior_graph.topological_order()?;

        for node in order.into_iter().rev().filter(|n| removed(n.id.as_str())) {
            let Some(record) = prior.get_record(&node.id) else {
                continue;
            };

            let mut dependencies: Vec<usize> = prior_graph
                .dependents_of(&node.id)
                .into_iter()
                .filter_map(|id| index.get(id).copied())
                .collect();
            dependencies.sort_unstable();

            let diff = self.diff.diff_removed(record);
            index.insert(node.id.clone(), actions.len());
            actions.push(Action::delete(record, dependencies, diff.old_hash.unwrap_or_default()));
        }
        Ok(())
    }
}

/// Rebuilds the graph the recorded state was applied from.
///
/// Nodes are inserted by recorded position so ties break the way they did
/// when the records were written.
fn recorded_graph(state: &StackState) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for record in state.records_by_position() {
        // record ids are map keys, so they are unique
        let _ = graph.add_node(record.to_node());
    }
    graph.add_known_reference_edges();
    graph
}

impl Action {
    fn delete(record: &StateRecord, dependencies: Vec<usize>, fingerprint: String) -> Self {
        Self {
            node_id: record.node_id.clone(),
            kind: record.kind.clone(),
            verb: Verb::Delete,
            inputs: record.last_applied_inputs.clone(),
            declared_outputs: BTreeSet::new(),
            prior_outputs: record.last_known_outputs.clone(),
            removal_policy: record.removal_policy,
            position: record.position,
            dependencies,
            changes: Vec::new(),
            fingerprint,
        }
    }

    /// Returns true if the action calls the provider or changes state.
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.verb != Verb::NoOp
    }

    /// Returns true for deletes that only drop the record.
    #[must_use]
    pub fn is_forget(&self) -> bool {
        self.verb == Verb::Delete && self.removal_policy == RemovalPolicy::Retain
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.verb {
            Verb::Create => format!("Create {} '{}'", self.kind, self.node_id),
            Verb::Update => format!(
                "Update {} '{}' ({} change(s))",
                self.kind,
                self.node_id,
                self.changes.len()
            ),
            Verb::Delete if self.is_forget() => {
                format!("Forget {} '{}' (retained)", self.kind, self.node_id)
            }
            Verb::Delete => format!("Delete {} '{}'", self.kind, self.node_id),
            Verb::NoOp => format!("No change for '{}'", self.node_id),
        }
    }
}

impl Plan {
    /// Builds a teardown plan for everything in `prior`.
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependency` if the recorded graph has a cycle.
    pub fn destroy(prior: &StackState) -> Result<Self, GraphError> {
        PlanBuilder::new().destroy(prior)
    }

    /// Returns true if any action would call the provider or change state.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(Action::is_change)
    }

    /// Returns true if the plan has no actions at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns the index of the action for `node_id`.
    #[must_use]
    pub fn position_of(&self, node_id: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.node_id == node_id)
    }

    /// Returns `(verb, node_id)` pairs in plan order.
    #[must_use]
    pub fn steps(&self) -> Vec<(Verb, &str)> {
        self.actions
            .iter()
            .map(|a| (a.verb, a.node_id.as_str()))
            .collect()
    }

    /// True if both plans come from the same declarations and would make
    /// the same calls against the same recorded outputs.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.declaration_hash == other.declaration_hash
            && self.actions.len() == other.actions.len()
            && self.actions.iter().zip(&other.actions).all(|(a, b)| {
                a.verb == b.verb
                    && a.node_id == b.node_id
                    && a.changes == b.changes
                    && a.prior_outputs == b.prior_outputs
            })
    }

    /// Counts actions by verb.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        self.actions
            .iter()
            .fold(PlanSummary::default(), |mut summary, action| {
                match action.verb {
                    Verb::Create => summary.creates += 1,
                    Verb::Update => summary.updates += 1,
                    Verb::Delete => summary.deletes += 1,
                    Verb::NoOp => summary.unchanged += 1,
                }
                summary
            })
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.creates, self.updates, self.deletes, self.unchanged
        )
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({}):", self.summary())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {}", action.description())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DeclarationSet, ResourceNode};
    use serde_json::json;

    fn bucket() -> ResourceNode {
        ResourceNode::new("bucket", "storage.bucket")
            .with_input("encryption", InputValue::string("s3_managed"))
            .with_output("arn")
    }

    fn cdn() -> ResourceNode {
        ResourceNode::new("cdn", "cdn.distribution")
            .with_input("origin", InputValue::reference("bucket", "arn"))
            .with_output("domain_name")
    }

    fn graph(nodes: Vec<ResourceNode>) -> DependencyGraph {
        let decls = nodes
            .into_iter()
            .fold(DeclarationSet::new("test"), DeclarationSet::with);
        DependencyGraph::from_declarations(&decls).unwrap()
    }

    /// Records every node of `graph` as applied, with all declared outputs.
    fn applied(graph: &DependencyGraph) -> StackState {
        let mut state = StackState::new("test", "dev");
        for (position, node) in graph.nodes().iter().enumerate() {
            let mut outputs = Outputs::from([("arn".to_string(), json!(format!("arn:{}", node.id)))]);
            for name in &node.outputs {
                outputs
                    .entry(name.clone())
                    .or_insert_with(|| json!(format!("{}:{name}", node.id)));
            }
            state.upsert_record(StateRecord {
                node_id: node.id.clone(),
                kind: node.kind.clone(),
                last_applied_inputs: node.inputs.clone(),
                last_known_outputs: outputs,
                removal_policy: node.removal_policy,
                position,
                inputs_hash: String::new(),
                applied_at: Utc::now(),
            });
        }
        state
    }

    #[test]
    fn test_empty_state_creates_in_dependency_order() {
        let g = graph(vec![cdn(), bucket()]);
        let plan = PlanBuilder::new().build(&g, &StackState::new("test", "dev")).unwrap();

        assert_eq!(plan.steps(), vec![(Verb::Create, "bucket"), (Verb::Create, "cdn")]);
        assert_eq!(plan.actions[1].dependencies, vec![0]);
        assert!(plan.has_changes());
    }

    #[test]
    fn test_applied_state_yields_no_ops() {
        let g = graph(vec![bucket(), cdn()]);
        let plan = PlanBuilder::new().build(&g, &applied(&g)).unwrap();

        assert_eq!(plan.steps(), vec![(Verb::NoOp, "bucket"), (Verb::NoOp, "cdn")]);
        assert!(!plan.has_changes());
        assert_eq!(plan.actions[0].prior_outputs["arn"], json!("arn:bucket"));
    }

    #[test]
    fn test_input_change_is_update() {
        let g = graph(vec![bucket(), cdn()]);
        let state = applied(&g);
        let changed = graph(vec![
            bucket().with_input("encryption", InputValue::string("kms")),
            cdn(),
        ]);

        let plan = PlanBuilder::new().build(&changed, &state).unwrap();
        assert_eq!(plan.steps(), vec![(Verb::Update, "bucket"), (Verb::NoOp, "cdn")]);
        assert_eq!(plan.actions[0].changes.len(), 1);
    }

    #[test]
    fn test_newly_declared_output_updates_producer() {
        let g = graph(vec![bucket(), cdn()]);
        let state = applied(&g);
        let pool = ResourceNode::new("pool", "identity.user_pool")
            .with_input("callback", InputValue::reference("cdn", "hosted_zone"));
        let grown = graph(vec![bucket(), cdn().with_output("hosted_zone"), pool]);

        let plan = PlanBuilder::new().build(&grown, &state).unwrap();
        assert_eq!(
            plan.steps(),
            vec![(Verb::NoOp, "bucket"), (Verb::Update, "cdn"), (Verb::Create, "pool")]
        );
        assert_eq!(plan.actions[1].changes[0].field, "outputs");
        assert_eq!(plan.actions[2].dependencies, vec![1]);
    }

    #[test]
    fn test_removed_nodes_delete_dependents_first() {
        let g = graph(vec![bucket(), cdn()]);
        let state = applied(&g);

        let plan = PlanBuilder::new().build(&graph(vec![]), &state).unwrap();
        assert_eq!(plan.steps(), vec![(Verb::Delete, "cdn"), (Verb::Delete, "bucket")]);
        assert_eq!(plan.actions[1].dependencies, vec![0]);
    }

    #[test]
    fn test_delete_waits_for_surviving_dependent_update() {
        let old = graph(vec![bucket(), cdn()]);
        let state = applied(&old);
        let detached = ResourceNode::new("cdn", "cdn.distribution")
            .with_input("origin", InputValue::string("https://example.com"));

        let plan = PlanBuilder::new().build(&graph(vec![detached]), &state).unwrap();
        assert_eq!(plan.steps(), vec![(Verb::Update, "cdn"), (Verb::Delete, "bucket")]);
        assert_eq!(plan.actions[1].dependencies, vec![0]);
    }

    #[test]
    fn test_retained_delete_is_forget() {
        let g = graph(vec![bucket().with_removal_policy(RemovalPolicy::Retain)]);
        let state = applied(&g);

        let plan = PlanBuilder::new().build(&graph(vec![]), &state).unwrap();
        assert!(plan.actions[0].is_forget());
        assert!(plan.actions[0].description().starts_with("Forget"));
    }

    #[test]
    fn test_destroy_plan_reverses_dependency_order() {
        let g = graph(vec![bucket(), cdn()]);
        let plan = Plan::destroy(&applied(&g)).unwrap();

        assert_eq!(plan.steps(), vec![(Verb::Delete, "cdn"), (Verb::Delete, "bucket")]);
        assert_eq!(plan.summary().deletes, 2);
    }

    #[test]
    fn test_cycle_fails_before_planning() {
        let decls = DeclarationSet::new("test")
            .with(ResourceNode::new("a", "k").with_input("x", InputValue::reference("b", "id")))
            .with(ResourceNode::new("b", "k").with_input("x", InputValue::reference("a", "id")));
        let g = DependencyGraph::from_declarations(&decls).unwrap();

        let err = PlanBuilder::new().build(&g, &StackState::new("test", "dev")).unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency { .. }));
    }

    #[test]
    fn test_equivalence_tracks_recorded_state() {
        let g = graph(vec![bucket(), cdn()]);
        let empty = StackState::new("test", "dev");
        let builder = PlanBuilder::new();

        let first = builder.build(&g, &empty).unwrap();
        assert!(first.is_equivalent(&builder.build(&g, &empty).unwrap()));
        assert!(!first.is_equivalent(&builder.build(&g, &applied(&g)).unwrap()));
    }

    #[test]
    fn test_plans_are_deterministic() {
        let g = graph(vec![bucket(), cdn()]);
        let state = StackState::new("test", "dev");
        let builder = PlanBuilder::new();

        let first = builder.build(&g, &state).unwrap();
        let second = builder.build(&g, &state).unwrap();
        assert_eq!(first.steps(), second.steps());
        assert_eq!(first.declaration_hash, second.declaration_hash);
    }
}
