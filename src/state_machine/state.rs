//! Conversation state types

use crate::directory::UserIdentity;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Scratch key holding the group name while the description is collected
pub const SCRATCH_GROUP_NAME: &str = "Name";

/// Field name to collected value, spanning one multi-step dialog
pub type ScratchFields = HashMap<String, String>;

// ============================================================================
// Conversation State
// ============================================================================

/// The dialog step a user is parked at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConvState {
    /// No dialog in progress, only commands are meaningful
    #[default]
    Idle,

    /// `/join` issued, waiting for the group code
    AwaitingGroupCode,

    /// `/creategroup` issued, waiting for the group name
    AwaitingGroupName,

    /// Name collected, waiting for the group description
    AwaitingGroupDescription,
}

impl ConvState {
    pub const ALL: [ConvState; 4] = [
        ConvState::Idle,
        ConvState::AwaitingGroupCode,
        ConvState::AwaitingGroupName,
        ConvState::AwaitingGroupDescription,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::AwaitingGroupCode => "awaiting_group_code",
            ConvState::AwaitingGroupName => "awaiting_group_name",
            ConvState::AwaitingGroupDescription => "awaiting_group_description",
        }
    }

    /// Check if a multi-step dialog is in progress
    pub fn is_awaiting(self) -> bool {
        !matches!(self, ConvState::Idle)
    }
}

impl fmt::Display for ConvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Everything the bot remembers about one user between events
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub state: ConvState,
    pub scratch: ScratchFields,
    /// Last time an event for this user was committed
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: ConvState::Idle,
            scratch: ScratchFields::new(),
            last_activity: now,
        }
    }

    #[allow(dead_code)] // Test and proptest helper
    pub fn with_state(mut self, state: ConvState) -> Self {
        self.state = state;
        self
    }

    pub fn scratch_value(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).map(String::as_str)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_activity > ttl
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Who the current event came from (immutable for the event's lifetime)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user: UserIdentity,
    pub display_name: Option<String>,
}

impl UserContext {
    pub fn new(user: UserIdentity, display_name: Option<String>) -> Self {
        Self { user, display_name }
    }
}
