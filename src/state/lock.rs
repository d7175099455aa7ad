//! Advisory state locking.
//!
//! `apply`, `destroy` and `state rm` claim the lock before touching state so
//! that two runs never write records for the same stack concurrently. A
//! lock lapses after [`LOCK_EXPIRY_SECS`]; a crashed run blocks others for
//! at most that long.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::StateError;

/// Seconds a claimed lock stays live.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Seconds between renewals while a run holds the lock.
pub const LOCK_RENEW_SECS: u64 = 100;

/// A claimed lock, as persisted next to the state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Token the holder presents to release the lock.
    pub lock_id: String,
    /// Holder label, `<hostname>-<pid>-<suffix>` unless given explicitly.
    pub holder: String,
    /// When the lock was claimed.
    pub acquired_at: DateTime<Utc>,
    /// When the lock lapses.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a fresh lock for `holder`, or for this process if empty.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::issued_at(holder, Utc::now())
    }

    fn issued_at(holder: &str, now: DateTime<Utc>) -> Self {
        let holder = if holder.trim().is_empty() {
            generate_holder_id()
        } else {
            holder.trim().to_string()
        };
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder,
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Claims the lock over whatever the store currently holds.
    ///
    /// An expired lock is taken over; a live one is an error naming its
    /// holder.
    ///
    /// # Errors
    ///
    /// Returns `LockedByOther` if `current` is still live.
    pub fn claim(current: Option<Self>, holder: &str) -> Result<Self, StateError> {
        let now = Utc::now();
        if let Some(current) = current {
            if current.is_live_at(now) {
                return Err(StateError::LockedByOther {
                    holder: current.holder,
                    since: current.acquired_at.to_rfc3339(),
                });
            }
            debug!("Taking over lapsed lock held by {}", current.holder);
        }
        Ok(Self::issued_at(holder, now))
    }

    /// Renews the lock named by `lock_id` over what the store holds.
    ///
    /// A lapsed lock nobody claimed is still ours to renew.
    ///
    /// # Errors
    ///
    /// Returns `LockLost` if the store holds no lock or another one.
    pub fn renew(current: Option<Self>, lock_id: &str) -> Result<Self, StateError> {
        match current {
            Some(mut lock) if lock.is_released_by(lock_id) => {
                lock.refresh();
                Ok(lock)
            }
            _ => Err(StateError::LockLost {
                lock_id: lock_id.to_string(),
            }),
        }
    }

    /// Pushes the expiry a full period past now.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// True if `lock_id` is the token this lock was issued with.
    #[must_use]
    pub fn is_released_by(&self, lock_id: &str) -> bool {
        self.lock_id == lock_id
    }

    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// Checks if the lock has lapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        !self.is_live_at(Utc::now())
    }

    /// Seconds left before the lock lapses, never negative.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Builds a holder label unique to this process and call.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get().map_or_else(
        |_| String::from("unknown-host"),
        |h| h.to_string_lossy().into_owned(),
    );
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{host}-{}-{}", std::process::id(), &suffix[..8])
}
