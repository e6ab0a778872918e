//! Effects produced by state transitions

use crate::directory::GroupRole;

/// A button on an inline menu; pressing it sends `callback` back as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub label: String,
    pub callback: String,
}

impl MenuButton {
    pub fn new(label: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback: callback.into(),
        }
    }
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a plain text reply to the user
    SendText { text: String },

    /// Send a reply with an inline button menu
    SendMenu {
        text: String,
        buttons: Vec<MenuButton>,
    },

    /// Record a scratch field for a later dialog step
    PutScratch { key: String, value: String },

    /// Drop a scratch field
    RemoveScratch { key: String },

    /// Look up a group by its join code (yields `GroupLookupCompleted`)
    LookupGroupByCode { code: String },

    /// Create a group (yields `GroupCreated`)
    CreateGroup { name: String, description: String },

    /// Look up the caller's current group (yields `UserGroupResolved`)
    LookupUserGroup,

    /// Make the caller a member of the group
    JoinGroup { group_id: String },

    /// Grant the caller a role in the group
    GrantRole { group_id: String, role: GroupRole },
}

impl Effect {
    pub fn send_text(text: impl Into<String>) -> Self {
        Effect::SendText { text: text.into() }
    }

    pub fn put_scratch(key: impl Into<String>, value: impl Into<String>) -> Self {
        Effect::PutScratch {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove_scratch(key: impl Into<String>) -> Self {
        Effect::RemoveScratch { key: key.into() }
    }

    /// Check if this effect sends something to the user
    pub fn is_reply(&self) -> bool {
        matches!(self, Effect::SendText { .. } | Effect::SendMenu { .. })
    }

    /// Check if this effect changes the directory
    pub fn is_directory_write(&self) -> bool {
        matches!(
            self,
            Effect::CreateGroup { .. } | Effect::JoinGroup { .. } | Effect::GrantRole { .. }
        )
    }
}
