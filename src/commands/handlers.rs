//! Built-in command handlers

use crate::state_machine::{
    ConvState, Effect, MenuButton, Session, TransitionResult, SCRATCH_GROUP_NAME,
};

/// `/start`: entry menu offering join or create; the dialog step is untouched
pub fn start(session: &Session) -> TransitionResult {
    TransitionResult::new(session.state).with_effect(Effect::SendMenu {
        text: "Welcome to bot, enter command /join to join group \n /creategroup to create one"
            .to_string(),
        buttons: vec![
            MenuButton::new("Join", "/join"),
            MenuButton::new("Create", "/creategroup"),
        ],
    })
}

/// `/creategroup`: start collecting a group name
pub fn create_group(_session: &Session) -> TransitionResult {
    // A leftover name from an abandoned dialog must not leak into this one
    TransitionResult::new(ConvState::AwaitingGroupName)
        .with_effect(Effect::remove_scratch(SCRATCH_GROUP_NAME))
        .with_effect(Effect::send_text("Please enter a group name"))
}

/// `/join`: wait for a group code
pub fn join(_session: &Session) -> TransitionResult {
    TransitionResult::new(ConvState::AwaitingGroupCode)
        .with_effect(Effect::send_text("Please enter a group code"))
}

/// `/groupinfo`: report the caller's group once the directory answers
pub fn group_info(session: &Session) -> TransitionResult {
    TransitionResult::new(session.state).with_effect(Effect::LookupUserGroup)
}
