//! Resource nodes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::value::{AttributeReference, InputValue};

/// Opaque resource kind tag (for example `storage.bucket`).
///
/// The engine never interprets the kind; it is passed through to the
/// provider backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    /// Creates a new kind tag.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

/// What happens to the real resource when its node leaves the declarations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Delete the resource through the provider.
    #[default]
    Destroy,
    /// Forget the resource but leave it in place.
    Retain,
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Destroy => write!(f, "destroy"),
            Self::Retain => write!(f, "retain"),
        }
    }
}

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Unique id within the declaration set.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared inputs by name.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
    /// Output names other nodes may reference.
    #[serde(default)]
    pub outputs: BTreeSet<String>,
    /// Removal policy.
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

impl ResourceNode {
    /// Creates a node with no inputs or outputs.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<ResourceKind>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeSet::new(),
            removal_policy: RemovalPolicy::default(),
        }
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.insert(name.into());
        self
    }

    /// Sets the removal policy.
    #[must_use]
    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    /// Returns every reference held by the inputs, paired with the input name.
    #[must_use]
    pub fn references(&self) -> Vec<(&str, &AttributeReference)> {
        self.inputs
            .iter()
            .flat_map(|(name, value)| {
                value
                    .references()
                    .into_iter()
                    .map(move |r| (name.as_str(), r))
            })
            .collect()
    }

    /// Returns the ids of the nodes this one references, without duplicates.
    #[must_use]
    pub fn producer_ids(&self) -> BTreeSet<&str> {
        self.references()
            .into_iter()
            .map(|(_, r)| r.node_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_are_paired_with_input_names() {
        let node = ResourceNode::new("cdn", "cdn.distribution")
            .with_input("origin", InputValue::reference("bucket", "arn"))
            .with_input(
                "aliases",
                InputValue::List(vec![
                    InputValue::reference("cert", "domain"),
                    InputValue::reference("bucket", "name"),
                ]),
            );

        let refs: Vec<(&str, String)> = node
            .references()
            .into_iter()
            .map(|(input, r)| (input, r.to_string()))
            .collect();
        assert_eq!(
            refs,
            vec![
                ("aliases", "cert.domain".to_string()),
                ("aliases", "bucket.name".to_string()),
                ("origin", "bucket.arn".to_string()),
            ]
        );

        let producers: Vec<&str> = node.producer_ids().into_iter().collect();
        assert_eq!(producers, vec!["bucket", "cert"]);
    }

    #[test]
    fn test_default_removal_policy_is_destroy() {
        let node = ResourceNode::new("bucket", "storage.bucket");
        assert_eq!(node.removal_policy, RemovalPolicy::Destroy);
    }
}
