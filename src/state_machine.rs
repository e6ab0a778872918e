//! Core conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, MenuButton};
pub use event::Event;
pub use state::{ConvState, ScratchFields, Session, UserContext, SCRATCH_GROUP_NAME};
pub use transition::{transition, TransitionError, TransitionResult};

#[cfg(test)]
pub use transition::group_report;
