//! Provider backend trait and request types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ProviderError;
use crate::graph::ResourceKind;

/// Named outputs returned by a provider.
pub type Outputs = BTreeMap<String, Value>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A create-or-update request with every reference already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    /// Node id.
    pub node_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Concrete input values.
    pub inputs: BTreeMap<String, Value>,
    /// Outputs the declarations expect back.
    pub declared_outputs: BTreeSet<String>,
    /// Outputs from the previous apply, empty on create.
    pub prior_outputs: Outputs,
}

/// A delete request for a recorded resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Node id.
    pub node_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Outputs recorded by the last successful apply.
    pub last_outputs: Outputs,
}

impl ApplyRequest {
    /// Returns true if the resource already exists.
    #[must_use]
    pub fn is_update(&self) -> bool {
        !self.prior_outputs.is_empty()
    }
}

/// Side-effecting operations on real resources.
///
/// `apply` creates the resource when `prior_outputs` is empty and updates
/// it otherwise. Both calls must be safe to repeat.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Creates or updates a resource and returns its outputs.
    async fn apply(&self, request: &ApplyRequest) -> ProviderResult<Outputs>;

    /// Deletes a resource.
    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()>;

    /// Gets the backend type name.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl ProviderBackend for Box<dyn ProviderBackend> {
    async fn apply(&self, request: &ApplyRequest) -> ProviderResult<Outputs> {
        (**self).apply(request).await
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        (**self).delete(request).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
