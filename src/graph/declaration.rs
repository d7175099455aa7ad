//! Declaration sets.

use super::node::ResourceNode;

/// The user's declared resources, in declaration order.
///
/// A declaration set is allowed to contain mistakes (duplicate ids,
/// dangling references); they are reported when the dependency graph is
/// built from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclarationSet {
    name: String,
    nodes: Vec<ResourceNode>,
}

impl DeclarationSet {
    /// Creates an empty declaration set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Appends a node.
    pub fn declare(&mut self, node: ResourceNode) {
        self.nodes.push(node);
    }

    /// Appends a node, builder style.
    #[must_use]
    pub fn with(mut self, node: ResourceNode) -> Self {
        self.declare(node);
        self
    }

    /// Returns the name of the stack.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns the first node with the given id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
