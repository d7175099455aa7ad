//! State store trait definition.
//!
//! This module defines the common interface for state storage backends,
//! plus the encoding shared by all of them.

use async_trait::async_trait;

use crate::error::{Result, StateError};
use super::lock::LockInfo;
use super::types::{StackState, STATE_VERSION};

/// Trait for state storage backends.
///
/// `save` must be atomic: after a crash, `load` returns either the
/// previous state or the new one, never a mix.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the stack state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<StackState>>;

    /// Saves the stack state.
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Deletes the stack state.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the state.
    ///
    /// An empty `holder` is replaced by an id for the current process.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the state if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Extends the lock `lock_id` by a full expiry period.
    ///
    /// Fails with `LockLost` if the store no longer holds that lock.
    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Removes any lock regardless of owner.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by a live lock.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Human readable location of the state, for logs.
    fn location(&self) -> String;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<StackState>> {
        (**self).load().await
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).renew_lock(lock_id).await
    }

    async fn force_unlock(&self) -> Result<()> {
        (**self).force_unlock().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

/// Serializes a state document.
pub(super) fn encode_state(state: &StackState) -> Result<String> {
    serde_json::to_string_pretty(state)
        .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")).into())
}

/// Parses a state document and checks its format version.
pub(super) fn decode_state(content: &str) -> Result<StackState> {
    let state: StackState = serde_json::from_str(content).map_err(|e| StateError::Corrupted {
        message: format!("Failed to parse state: {e}"),
    })?;

    if state.version != STATE_VERSION {
        return Err(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: state.version,
        }
        .into());
    }

    Ok(state)
}

/// Parses a lock document.
pub(super) fn decode_lock(content: &str) -> Result<LockInfo> {
    serde_json::from_str(content).map_err(|e| {
        StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        }
        .into()
    })
}
