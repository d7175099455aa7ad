//! Dependency graph construction and ordering.
//!
//! Nodes are vertices; an edge runs from a producer to every consumer that
//! references one of its outputs. Ordering uses Kahn's algorithm with ties
//! broken by declaration order, so the same declarations always produce the
//! same order.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::GraphError;
use super::declaration::DeclarationSet;
use super::node::ResourceNode;

/// Directed graph of resource nodes keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    /// producer -> consumers
    dependents: Vec<BTreeSet<usize>>,
    /// consumer -> producers
    dependencies: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a declaration set and links every reference.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate ids or dangling references.
    pub fn from_declarations(declarations: &DeclarationSet) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in declarations.nodes() {
            graph.add_node(node.clone())?;
        }
        graph.add_reference_edges()?;
        debug!(
            "Built dependency graph for '{}' with {} nodes",
            declarations.name(),
            graph.len()
        );
        Ok(graph)
    }

    /// Inserts a node.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if a node with the same id already exists.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateId { id: node.id });
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        self.dependents.push(BTreeSet::new());
        self.dependencies.push(BTreeSet::new());
        Ok(())
    }

    /// Derives edges from every reference held by every node.
    ///
    /// Edges are rebuilt from scratch, so calling this twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns `DanglingReference` if a reference names an unknown node.
    pub fn add_reference_edges(&mut self) -> Result<(), GraphError> {
        self.link(true)
    }

    /// Like [`Self::add_reference_edges`], but skips references to unknown
    /// nodes instead of failing.
    ///
    /// Used for graphs rebuilt from recorded state, where a producer may
    /// already have been forgotten.
    pub(crate) fn add_known_reference_edges(&mut self) {
        // Non-strict linking never fails.
        let _ = self.link(false);
    }

    fn link(&mut self, strict: bool) -> Result<(), GraphError> {
        let mut dependents = vec![BTreeSet::new(); self.nodes.len()];
        let mut dependencies = vec![BTreeSet::new(); self.nodes.len()];

        for (consumer, node) in self.nodes.iter().enumerate() {
            for (input, reference) in node.references() {
                match self.index.get(&reference.node_id) {
                    Some(&producer) => {
                        dependents[producer].insert(consumer);
                        dependencies[consumer].insert(producer);
                    }
                    None if strict => {
                        return Err(GraphError::DanglingReference {
                            consumer: node.id.clone(),
                            input: input.to_string(),
                            producer: reference.node_id.clone(),
                            output: reference.output.clone(),
                        });
                    }
                    None => {}
                }
            }
        }

        self.dependents = dependents;
        self.dependencies = dependencies;
        Ok(())
    }

    /// Returns every node with producers before consumers.
    ///
    /// Among nodes that are ready at the same time, the one declared first
    /// comes first.
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependency` with the full cycle path if the graph is
    /// not a DAG.
    pub fn topological_order(&self) -> Result<Vec<&ResourceNode>, GraphError> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, degree)| *degree == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &consumer in &self.dependents[idx] {
                in_degree[consumer] -= 1;
                if in_degree[consumer] == 0 {
                    ready.insert(consumer);
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(GraphError::CyclicDependency {
                cycle: self.find_cycle(&in_degree),
            });
        }

        Ok(order.into_iter().map(|idx| &self.nodes[idx]).collect())
    }

    /// Walks producer edges among the nodes Kahn's algorithm could not
    /// place until a node repeats.
    ///
    /// Every unplaced node has at least one unplaced producer, so the walk
    /// always closes a cycle.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let stuck = |idx: usize| in_degree[idx] > 0;
        let Some(start) = (0..self.nodes.len()).find(|&idx| stuck(idx)) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut seen = HashMap::from([(start, 0usize)]);
        let mut current = start;
        loop {
            let Some(&producer) = self.dependencies[current].iter().find(|&&p| stuck(p)) else {
                return Vec::new();
            };
            if let Some(&pos) = seen.get(&producer) {
                // path runs consumer -> producer; report producer -> consumer
                let mut cycle: Vec<usize> = path[pos..].iter().rev().copied().collect();
                if let Some(first) = cycle
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, &idx)| idx)
                    .map(|(i, _)| i)
                {
                    cycle.rotate_left(first);
                }
                let mut ids: Vec<String> = cycle
                    .iter()
                    .map(|&idx| self.nodes[idx].id.clone())
                    .collect();
                ids.push(ids[0].clone());
                return ids;
            }
            seen.insert(producer, path.len());
            path.push(producer);
            current = producer;
        }
    }

    /// Returns a node by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    /// Returns true if the graph has a node with this id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the declaration position of a node.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns the ids of the nodes `id` directly references.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.dependencies)
    }

    /// Returns the ids of the nodes that directly reference `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.dependents)
    }

    fn neighbours<'a>(&'a self, id: &str, edges: &'a [BTreeSet<usize>]) -> Vec<&'a str> {
        self.index.get(id).map_or_else(Vec::new, |&idx| {
            edges[idx]
                .iter()
                .map(|&other| self.nodes[other].id.as_str())
                .collect()
        })
    }

    /// Returns the nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of distinct producer/consumer edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependents.iter().map(BTreeSet::len).sum()
    }
}
