//! Events that can occur in a conversation

use crate::directory::Group;

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // User events
    UserText {
        text: String,
    },
    /// Message without a text payload (sticker, photo, empty callback)
    UserNoText,

    // Directory outcomes, fed back by the runtime after a lookup effect
    GroupLookupCompleted {
        code: String,
        group: Option<Group>,
    },
    GroupCreated {
        group: Group,
    },
    UserGroupResolved {
        group: Option<Group>,
    },
}

impl Event {
    /// Build the user event for an optional text payload
    pub fn from_text(text: Option<&str>) -> Self {
        match text {
            Some(text) => Event::UserText {
                text: text.to_string(),
            },
            None => Event::UserNoText,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::UserText { .. } => "user_text",
            Event::UserNoText => "user_no_text",
            Event::GroupLookupCompleted { .. } => "group_lookup_completed",
            Event::GroupCreated { .. } => "group_created",
            Event::UserGroupResolved { .. } => "user_group_resolved",
        }
    }
}
