//! Command registry
//!
//! Slash commands are registered once at startup through an explicit list.
//! A command matches only when it is the entire text of an event, and it runs
//! regardless of the user's current dialog step.

mod handlers;

use crate::state_machine::{Session, TransitionResult};
use std::collections::BTreeMap;
use thiserror::Error;

/// A command handler: pure, like the transition function
pub type CommandHandler = fn(&Session) -> TransitionResult;

/// A registered command
#[derive(Clone, Copy)]
pub struct Command {
    pub token: &'static str,
    pub description: &'static str,
    pub handler: CommandHandler,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("token", &self.token)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Command registered twice: {0}")]
    Duplicate(&'static str),
    #[error("Command token must be a single word starting with '/': {0:?}")]
    InvalidToken(&'static str),
}

/// Immutable table of commands, keyed by literal token
#[derive(Debug)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Command>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    /// The bot's standard command set
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::builder()
            .register("/start", "Show the main menu", handlers::start)
            .register("/creategroup", "Create a new group", handlers::create_group)
            .register("/join", "Join a group by its code", handlers::join)
            .register("/groupinfo", "Show your current group", handlers::group_info)
            .build()
    }

    /// Find the command whose token is exactly `text`
    pub fn lookup(&self, text: &str) -> Option<&Command> {
        self.commands.get(text)
    }

    /// All registered commands, ordered by token
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    #[allow(dead_code)] // API completeness
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[allow(dead_code)] // API completeness
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Collects registrations; validation happens once in `build`
#[derive(Default)]
pub struct CommandRegistryBuilder {
    entries: Vec<Command>,
}

impl CommandRegistryBuilder {
    #[must_use]
    pub fn register(
        mut self,
        token: &'static str,
        description: &'static str,
        handler: CommandHandler,
    ) -> Self {
        self.entries.push(Command {
            token,
            description,
            handler,
        });
        self
    }

    pub fn build(self) -> Result<CommandRegistry, RegistryError> {
        let mut commands = BTreeMap::new();
        for command in self.entries {
            if !is_valid_token(command.token) {
                return Err(RegistryError::InvalidToken(command.token));
            }
            if commands.insert(command.token, command).is_some() {
                return Err(RegistryError::Duplicate(command.token));
            }
        }
        Ok(CommandRegistry { commands })
    }
}

fn is_valid_token(token: &str) -> bool {
    token.len() > 1 && token.starts_with('/') && !token.chars().any(char::is_whitespace)
}
