//! State management module for the Skyform engine.
//!
//! This module provides persistent storage for what the engine has applied:
//! one record per resource node, the run history, and a lock that keeps
//! concurrent runs apart.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS, LOCK_RENEW_SECS};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{HistoryEntry, Operation, StackState, StateRecord, MAX_HISTORY, STATE_VERSION};
