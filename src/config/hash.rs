//! Declaration hashing for change detection.
//!
//! Hashes are display and audit aids: the declaration hash is recorded in
//! state and history, and per-node input fingerprints are shown in plans.
//! Planning itself compares inputs structurally.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::graph::{DeclarationSet, InputValue, ResourceNode, TemplatePart};

/// Hasher for computing declaration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a whole declaration set.
    ///
    /// Depends on declaration order as well as content, since order breaks
    /// ties in the plan.
    #[must_use]
    pub fn hash_declarations(&self, declarations: &DeclarationSet) -> String {
        self.hash_nodes(declarations.nodes())
    }

    /// Computes a hash of a sequence of nodes.
    #[must_use]
    pub fn hash_nodes(&self, nodes: &[ResourceNode]) -> String {
        let mut hasher = Sha256::new();
        for node in nodes {
            hasher.update(self.hash_node(node).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single node.
    #[must_use]
    pub fn hash_node(&self, node: &ResourceNode) -> String {
        let mut hasher = Sha256::new();
        field(&mut hasher, node.id.as_bytes());
        field(&mut hasher, node.kind.as_str().as_bytes());
        field(&mut hasher, node.removal_policy.to_string().as_bytes());
        for output in &node.outputs {
            field(&mut hasher, output.as_bytes());
        }
        hasher.update(self.hash_inputs(&node.inputs).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes the fingerprint of a node's inputs.
    #[must_use]
    pub fn hash_inputs(&self, inputs: &BTreeMap<String, InputValue>) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in inputs {
            field(&mut hasher, name.as_bytes());
            feed_value(&mut hasher, value);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

/// Length-prefixes a field so adjacent fields cannot run together.
fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn feed_value(hasher: &mut Sha256, value: &InputValue) {
    match value {
        InputValue::Null => hasher.update([0u8]),
        InputValue::Bool(b) => hasher.update([1u8, u8::from(*b)]),
        InputValue::Number(n) => {
            hasher.update([2u8]);
            field(hasher, n.to_string().as_bytes());
        }
        InputValue::String(s) => {
            hasher.update([3u8]);
            field(hasher, s.as_bytes());
        }
        InputValue::List(items) => {
            hasher.update([4u8]);
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                feed_value(hasher, item);
            }
        }
        InputValue::Map(map) => {
            hasher.update([5u8]);
            hasher.update((map.len() as u64).to_be_bytes());
            for (key, item) in map {
                field(hasher, key.as_bytes());
                feed_value(hasher, item);
            }
        }
        InputValue::Reference(r) => {
            hasher.update([6u8]);
            field(hasher, r.node_id.as_bytes());
            field(hasher, r.output.as_bytes());
        }
        InputValue::Template(parts) => {
            hasher.update([7u8]);
            hasher.update((parts.len() as u64).to_be_bytes());
            for part in parts {
                match part {
                    TemplatePart::Text(text) => {
                        hasher.update([0u8]);
                        field(hasher, text.as_bytes());
                    }
                    TemplatePart::Reference(r) => {
                        hasher.update([1u8]);
                        field(hasher, r.node_id.as_bytes());
                        field(hasher, r.output.as_bytes());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(encryption: &str) -> ResourceNode {
        ResourceNode::new("bucket", "storage.bucket")
            .with_input("encryption", InputValue::string(encryption))
            .with_output("arn")
    }

    #[test]
    fn test_node_hash_deterministic() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_node(&bucket("s3")), hasher.hash_node(&bucket("s3")));
    }

    #[test]
    fn test_input_change_changes_hash() {
        let hasher = ConfigHasher::new();
        assert_ne!(
            hasher.hash_inputs(&bucket("s3").inputs),
            hasher.hash_inputs(&bucket("kms").inputs)
        );
    }

    #[test]
    fn test_reference_differs_from_equivalent_string() {
        let hasher = ConfigHasher::new();
        let literal = BTreeMap::from([("origin".to_string(), InputValue::string("bucket.arn"))]);
        let reference = BTreeMap::from([(
            "origin".to_string(),
            InputValue::reference("bucket", "arn"),
        )]);
        assert_ne!(hasher.hash_inputs(&literal), hasher.hash_inputs(&reference));
    }

    #[test]
    fn test_declaration_order_matters() {
        let hasher = ConfigHasher::new();
        let cdn = ResourceNode::new("cdn", "cdn.distribution");
        let forward = DeclarationSet::new("s").with(bucket("s3")).with(cdn.clone());
        let backward = DeclarationSet::new("s").with(cdn).with(bucket("s3"));
        assert_ne!(
            hasher.hash_declarations(&forward),
            hasher.hash_declarations(&backward)
        );
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
