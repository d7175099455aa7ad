//! Deterministic in-process provider.
//!
//! Fabricates plausible outputs from the node id and kind instead of
//! talking to a cloud. Repeated applies of the same node return the same
//! outputs, so re-applying a stack converges. Failures can be injected per
//! node, and every call is recorded for inspection.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::ProviderError;
use super::backend::{ApplyRequest, DeleteRequest, Outputs, ProviderBackend, ProviderResult};

/// A call received by the simulated provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    /// `apply` was called.
    Apply(ApplyRequest),
    /// `delete` was called.
    Delete(DeleteRequest),
}

impl ProviderCall {
    /// Returns the node id the call was made for.
    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            Self::Apply(req) => &req.node_id,
            Self::Delete(req) => &req.node_id,
        }
    }

    /// Returns true for delete calls.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }
}

/// Deterministic provider backend for local runs and tests.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    /// node id -> failure message
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<ProviderCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedProvider {
    /// Creates a provider that succeeds on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call for `node_id` fail with `message`.
    #[must_use]
    pub fn with_failure(self, node_id: &str, message: &str) -> Self {
        self.fail_on(node_id, message);
        self
    }

    /// Makes every call for `node_id` fail with `message`.
    pub fn fail_on(&self, node_id: &str, message: &str) {
        lock(&self.failures).insert(node_id.to_string(), message.to_string());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Returns every call received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    /// Returns the node ids of every call received so far.
    #[must_use]
    pub fn called_nodes(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|call| call.node_id().to_string())
            .collect()
    }

    fn check_failure(&self, node_id: &str, kind: &str) -> ProviderResult<()> {
        match lock(&self.failures).get(node_id) {
            Some(message) => Err(ProviderError::new(kind, message.clone())
                .with_diagnostic(format!("simulated failure for '{node_id}'"))),
            None => Ok(()),
        }
    }

    /// Fabricates the outputs for a node.
    fn outputs_for(request: &ApplyRequest) -> Outputs {
        let digest = Sha256::digest(format!("{}/{}", request.kind, request.node_id));
        let hash = hex::encode(digest);
        let short = &hash[..12];
        let kind_slug = request.kind.as_str().replace(['.', '_'], "-");
        let id = format!("{kind_slug}-{short}");
        let arn = format!("arn:skyform:{}:::{}", request.kind, request.node_id);

        let mut outputs = Outputs::new();
        for name in &request.declared_outputs {
            let value = match name.as_str() {
                "id" => id.clone(),
                "arn" => arn.clone(),
                n if n.ends_with("domain_name") || n == "domain" => {
                    format!("{short}.{}.skyform.test", request.node_id)
                }
                n if n.ends_with("url") => format!("https://{short}.{}.skyform.test", request.node_id),
                n if n.ends_with("name") => format!("{}-{short}", request.node_id),
                n => format!("{id}/{n}"),
            };
            outputs.insert(name.clone(), Value::String(value));
        }
        outputs.insert("id".to_string(), Value::String(id));
        outputs.insert("arn".to_string(), Value::String(arn));
        outputs
    }
}

#[async_trait]
impl ProviderBackend for SimulatedProvider {
    async fn apply(&self, request: &ApplyRequest) -> ProviderResult<Outputs> {
        lock(&self.calls).push(ProviderCall::Apply(request.clone()));
        self.check_failure(&request.node_id, request.kind.as_str())?;

        let outputs = Self::outputs_for(request);
        debug!(
            "Simulated {} of {} ({}) with {} outputs",
            if request.is_update() { "update" } else { "create" },
            request.node_id,
            request.kind,
            outputs.len()
        );
        Ok(outputs)
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        lock(&self.calls).push(ProviderCall::Delete(request.clone()));
        self.check_failure(&request.node_id, request.kind.as_str())?;

        debug!("Simulated delete of {} ({})", request.node_id, request.kind);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
