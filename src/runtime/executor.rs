//! Event processor: runs one inbound event through commands or the
//! transition table, executes the resulting effects, and commits the session.

use super::traits::{Directory, Transport};
use crate::commands::CommandRegistry;
use crate::directory::DbError;
use crate::session::SessionStore;
use crate::state_machine::{
    transition, Effect, Event, Session, TransitionError, TransitionResult, UserContext,
};
use crate::transport::{InboundEvent, TransportError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// Reply sent when a collaborator failure abandons an event
const FAILURE_REPLY: &str = "Something went wrong, please try again later";

/// Errors that abandon the current event
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Directory call failed: {0}")]
    Directory(#[from] DbError),
    #[error("Transport call failed: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Processes events against shared collaborators; one instance serves all users
pub struct EventProcessor<D, T>
where
    D: Directory + 'static,
    T: Transport + 'static,
{
    directory: Arc<D>,
    transport: Arc<T>,
    commands: Arc<CommandRegistry>,
    sessions: Arc<SessionStore>,
}

impl<D, T> EventProcessor<D, T>
where
    D: Directory + 'static,
    T: Transport + 'static,
{
    pub fn new(
        directory: Arc<D>,
        transport: Arc<T>,
        commands: Arc<CommandRegistry>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            directory,
            transport,
            commands,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Process one event, logging and surfacing any failure.
    ///
    /// Failures never escape: the event is abandoned and its session changes
    /// are discarded.
    pub async fn handle(&self, event: InboundEvent) {
        let user = event.user;
        match self.process(event).await {
            Ok(()) => {}
            Err(DispatchError::Transition(e)) => {
                tracing::error!(user = %user, error = %e, "No handler for event, abandoning it");
            }
            Err(e @ DispatchError::Directory(_)) => {
                tracing::error!(user = %user, error = %e, "Directory failure, abandoning event");
                if let Err(send_err) = self.transport.send_text(user, FAILURE_REPLY).await {
                    tracing::warn!(user = %user, error = %send_err, "Failed to report failure to user");
                }
            }
            Err(e @ DispatchError::Transport(_)) => {
                tracing::error!(user = %user, error = %e, "Transport failure, abandoning event");
            }
        }
    }

    /// Run one event to completion.
    ///
    /// The session is committed only on success, unless a directory write has
    /// already landed. Writes cannot be undone, so the session advances with
    /// them and a retry does not repeat them.
    pub async fn process(&self, event: InboundEvent) -> Result<(), DispatchError> {
        let event = event.normalize();
        let context = UserContext::new(event.user, event.display_name.clone());

        self.directory
            .upsert_user(context.user, context.display_name.as_deref())
            .await?;

        let mut guard = self.sessions.lock(context.user).await;
        let mut working: Session = guard.clone();

        let first = match event.text_payload().and_then(|t| self.commands.lookup(t)) {
            Some(command) => {
                tracing::debug!(
                    user = %context.user,
                    state = %working.state,
                    command = command.token,
                    "Running command"
                );
                (command.handler)(&working)
            }
            None => transition(&working, &context, Event::from_text(event.text_payload()))?,
        };

        let mut wrote = false;
        let outcome = self
            .run_effects(&context, &mut working, first, &mut wrote)
            .await;

        if outcome.is_ok() || wrote {
            if let Err(e) = &outcome {
                tracing::warn!(
                    user = %context.user,
                    state = %working.state,
                    error = %e,
                    "Event failed after directory writes, keeping session progress"
                );
            }
            working.last_activity = Utc::now();
            *guard = working;
        }
        outcome
    }

    /// Apply a transition result and every follow-up it generates.
    ///
    /// `wrote` is set once any directory write succeeds.
    async fn run_effects(
        &self,
        context: &UserContext,
        working: &mut Session,
        first: TransitionResult,
        wrote: &mut bool,
    ) -> Result<(), DispatchError> {
        let mut pending = vec![first];
        while let Some(result) = pending.pop() {
            let old_state = std::mem::replace(&mut working.state, result.new_state);
            if old_state != working.state {
                tracing::info!(
                    user = %context.user,
                    from = %old_state,
                    to = %working.state,
                    "State transition"
                );
            }

            for effect in result.effects {
                let is_write = effect.is_directory_write();
                let follow_up = self.execute_effect(context, working, effect).await?;
                *wrote |= is_write;
                if let Some(follow_up) = follow_up {
                    pending.push(transition(working, context, follow_up)?);
                }
            }
        }
        Ok(())
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(
        &self,
        context: &UserContext,
        working: &mut Session,
        effect: Effect,
    ) -> Result<Option<Event>, DispatchError> {
        let user = context.user;
        match effect {
            Effect::SendText { text } => {
                self.transport.send_text(user, &text).await?;
                Ok(None)
            }

            Effect::SendMenu { text, buttons } => {
                self.transport.send_menu(user, &text, &buttons).await?;
                Ok(None)
            }

            Effect::PutScratch { key, value } => {
                working.scratch.insert(key, value);
                Ok(None)
            }

            Effect::RemoveScratch { key } => {
                working.scratch.remove(&key);
                Ok(None)
            }

            Effect::LookupGroupByCode { code } => {
                let group = self.directory.find_group_by_code(&code).await?;
                tracing::debug!(user = %user, code = %code, found = group.is_some(), "Group lookup");
                Ok(Some(Event::GroupLookupCompleted { code, group }))
            }

            Effect::CreateGroup { name, description } => {
                let group = self.directory.create_group(&name, &description).await?;
                tracing::info!(user = %user, group_id = %group.id, name = %group.name, "Group created");
                Ok(Some(Event::GroupCreated { group }))
            }

            Effect::LookupUserGroup => {
                let group = self.directory.find_group_for_user(user).await?;
                Ok(Some(Event::UserGroupResolved { group }))
            }

            Effect::JoinGroup { group_id } => {
                self.directory
                    .associate_user_with_group(user, &group_id)
                    .await?;
                tracing::info!(user = %user, group_id = %group_id, "User joined group");
                Ok(None)
            }

            Effect::GrantRole { group_id, role } => {
                self.directory.grant_role(&group_id, user, role).await?;
                tracing::info!(user = %user, group_id = %group_id, role = %role, "Role granted");
                Ok(None)
            }
        }
    }
}
