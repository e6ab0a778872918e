//! Per-user session store
//!
//! Maps each user to their conversation state and scratch fields. Access for
//! one user is serialized through that user's mutex; distinct users never
//! contend beyond the brief map lookup.

use crate::directory::UserIdentity;
use crate::state_machine::{ConvState, ScratchFields, Session};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Exclusive hold on one user's session
pub type SessionGuard = OwnedMutexGuard<Session>;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<UserIdentity, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the user's slot, creating an idle session if unseen
    async fn slot(&self, id: UserIdentity) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(&id) {
                return Arc::clone(slot);
            }
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(Session::default()))),
        )
    }

    /// Lock the user's session for an atomic read-modify-write
    pub async fn lock(&self, id: UserIdentity) -> SessionGuard {
        self.slot(id).await.lock_owned().await
    }

    /// Current state; `Idle` for users never seen
    #[allow(dead_code)] // Used in tests
    pub async fn get_state(&self, id: UserIdentity) -> ConvState {
        let slot = self.sessions.read().await.get(&id).cloned();
        match slot {
            Some(slot) => slot.lock().await.state,
            None => ConvState::Idle,
        }
    }

    #[allow(dead_code)] // API completeness
    pub async fn set_state(&self, id: UserIdentity, state: ConvState) {
        self.lock(id).await.state = state;
    }

    /// Snapshot of the user's scratch fields
    #[allow(dead_code)] // Used in tests
    pub async fn get_scratch(&self, id: UserIdentity) -> ScratchFields {
        self.lock(id).await.scratch.clone()
    }

    #[allow(dead_code)] // API completeness
    pub async fn put_scratch(&self, id: UserIdentity, key: &str, value: &str) {
        self.lock(id)
            .await
            .scratch
            .insert(key.to_string(), value.to_string());
    }

    #[allow(dead_code)] // API completeness
    pub async fn remove_scratch(&self, id: UserIdentity, key: &str) -> Option<String> {
        self.lock(id).await.scratch.remove(key)
    }

    #[allow(dead_code)] // Used by tests and diagnostics
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle for longer than `ttl`.
    ///
    /// Dropping a session is the same as resetting it to `Idle` with empty
    /// scratch, since unseen users read as idle. Sessions that are locked or
    /// about to be locked are skipped.
    pub async fn evict_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> Vec<UserIdentity> {
        let mut sessions = self.sessions.write().await;
        let mut evicted = Vec::new();

        sessions.retain(|id, slot| {
            // Only the map holds this slot, so nobody is waiting on it
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(session) = slot.try_lock() else {
                return true;
            };
            if session.is_stale(now, ttl) {
                tracing::debug!(user = %id, state = %session.state, "Evicting stale session");
                evicted.push(*id);
                false
            } else {
                true
            }
        });

        evicted
    }
}
