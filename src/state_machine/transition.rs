//! Pure state transition function
//!
//! Given the same session and event, `transition` always produces the same
//! result and performs no I/O. Directory work is requested through effects and
//! its outcome comes back as a follow-up event.

use super::state::SCRATCH_GROUP_NAME;
use super::{ConvState, Effect, Event, Session, UserContext};
use crate::directory::{Group, GroupRole};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug, PartialEq)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[allow(dead_code)] // Builder completeness
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Number of effects that send something to the user
    #[allow(dead_code)] // Used by tests
    pub fn reply_count(&self) -> usize {
        self.effects.iter().filter(|e| e.is_reply()).count()
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("No transition from {state} on {event}")]
    InvalidTransition {
        state: ConvState,
        event: &'static str,
    },
}

/// Pure transition function
pub fn transition(
    session: &Session,
    _context: &UserContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (session.state, event) {
        // ============================================================
        // Idle: only commands mean anything
        // ============================================================
        (ConvState::Idle, Event::UserText { .. } | Event::UserNoText) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::send_text("Please enter a valid command")))
        }

        // ============================================================
        // Joining a group
        // ============================================================
        (ConvState::AwaitingGroupCode, Event::UserText { text }) => {
            Ok(TransitionResult::new(ConvState::AwaitingGroupCode)
                .with_effect(Effect::LookupGroupByCode {
                    code: text.trim().to_string(),
                }))
        }

        (ConvState::AwaitingGroupCode, Event::UserNoText) => {
            Ok(TransitionResult::new(ConvState::AwaitingGroupCode)
                .with_effect(Effect::send_text("No text for group code")))
        }

        (ConvState::AwaitingGroupCode, Event::GroupLookupCompleted { group: None, .. }) => {
            Ok(TransitionResult::new(ConvState::AwaitingGroupCode)
                .with_effect(Effect::send_text("Wrong group code")))
        }

        (ConvState::AwaitingGroupCode, Event::GroupLookupCompleted { group: Some(group), .. }) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::JoinGroup {
                    group_id: group.id.clone(),
                })
                .with_effect(Effect::send_text(format!(
                    "You joined group {} - {}",
                    group.name, group.description
                ))))
        }

        // ============================================================
        // Creating a group
        // ============================================================
        (ConvState::AwaitingGroupName, Event::UserText { text }) => {
            Ok(TransitionResult::new(ConvState::AwaitingGroupDescription)
                .with_effect(Effect::put_scratch(SCRATCH_GROUP_NAME, text))
                .with_effect(Effect::send_text("Please enter group description")))
        }

        (ConvState::AwaitingGroupName, Event::UserNoText) => {
            Ok(TransitionResult::new(ConvState::AwaitingGroupName)
                .with_effect(Effect::send_text("No text for group name")))
        }

        (ConvState::AwaitingGroupDescription, Event::UserText { text }) => {
            match session.scratch_value(SCRATCH_GROUP_NAME) {
                Some(name) => Ok(TransitionResult::new(ConvState::AwaitingGroupDescription)
                    .with_effect(Effect::CreateGroup {
                        name: name.to_string(),
                        description: text,
                    })),
                // Name was lost (expired session); restart from the name step
                None => Ok(TransitionResult::new(ConvState::AwaitingGroupName)
                    .with_effect(Effect::send_text(
                        "Group name was lost, please enter a group name",
                    ))),
            }
        }

        (ConvState::AwaitingGroupDescription, Event::UserNoText) => {
            Ok(TransitionResult::new(ConvState::AwaitingGroupDescription)
                .with_effect(Effect::send_text("No text for group description")))
        }

        (ConvState::AwaitingGroupDescription, Event::GroupCreated { group }) => {
            // Name must be gone before the first directory write
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::remove_scratch(SCRATCH_GROUP_NAME))
                .with_effect(Effect::JoinGroup {
                    group_id: group.id.clone(),
                })
                .with_effect(Effect::GrantRole {
                    group_id: group.id.clone(),
                    role: GroupRole::Owner,
                })
                .with_effect(Effect::send_text(group_report(&group))))
        }

        // ============================================================
        // Group info (requested by command from any state)
        // ============================================================
        (state, Event::UserGroupResolved { group }) => {
            let reply = match group {
                Some(group) => group_report(&group),
                None => "No group found, please enter /join to enter a group or\
                         \n /creategroup to create one"
                    .to_string(),
            };
            Ok(TransitionResult::new(state).with_effect(Effect::send_text(reply)))
        }

        // ============================================================
        // Invalid Transitions
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition {
            state,
            event: event.kind(),
        }),
    }
}

/// Reply describing a group and its join code
pub fn group_report(group: &Group) -> String {
    format!(
        "Your group: {} - {}\nWas created, its ID is\n{}\nPlease write it down",
        group.name, group.description, group.id
    )
}
