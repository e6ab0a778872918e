//! Chat transport
//!
//! Inbound events are normalized into [`InboundEvent`] before they reach the
//! dispatcher. Outbound sends go through the [`Transport`] trait.
//!
//! [`Transport`]: crate::runtime::Transport

mod telegram;

pub use telegram::TelegramTransport;

use crate::directory::UserIdentity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[allow(dead_code)] // Constructed by test transports
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// What the user sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Typed text
    Text(String),
    /// Data attached to a pressed inline button
    Callback(String),
    /// Anything without text (sticker, photo, empty callback)
    Empty,
}

/// A normalized inbound event from one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user: UserIdentity,
    pub display_name: Option<String>,
    pub payload: Payload,
}

impl InboundEvent {
    pub fn new(user: UserIdentity, payload: Payload) -> Self {
        Self {
            user,
            display_name: None,
            payload,
        }
    }

    #[allow(dead_code)] // Constructor for tests and alternative transports
    pub fn text(user: UserIdentity, text: impl Into<String>) -> Self {
        Self::new(user, Payload::Text(text.into()))
    }

    #[allow(dead_code)] // Constructor for tests and alternative transports
    pub fn callback(user: UserIdentity, data: impl Into<String>) -> Self {
        Self::new(user, Payload::Callback(data.into()))
    }

    #[allow(dead_code)] // Constructor for tests and alternative transports
    pub fn empty(user: UserIdentity) -> Self {
        Self::new(user, Payload::Empty)
    }

    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    /// Turn a button press into the equivalent typed text
    #[must_use]
    pub fn normalize(self) -> Self {
        match self.payload {
            Payload::Callback(data) => Self {
                payload: Payload::Text(data),
                ..self
            },
            _ => self,
        }
    }

    /// Text carried by the event, if any
    pub fn text_payload(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) | Payload::Callback(text) => Some(text),
            Payload::Empty => None,
        }
    }
}
