//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::directory::{Database, DbError, Group, GroupRole, UserIdentity};
use crate::state_machine::MenuButton;
use crate::transport::TransportError;
use async_trait::async_trait;
use std::sync::Arc;

/// User, group and role persistence
#[async_trait]
pub trait Directory: Send + Sync {
    /// Record the user as known (idempotent)
    async fn upsert_user(&self, id: UserIdentity, display_name: Option<&str>)
        -> Result<(), DbError>;

    /// Find a group by its join code
    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>, DbError>;

    /// Create a new group
    async fn create_group(&self, name: &str, description: &str) -> Result<Group, DbError>;

    /// Make the user a member of the group
    async fn associate_user_with_group(
        &self,
        id: UserIdentity,
        group_id: &str,
    ) -> Result<(), DbError>;

    /// Grant the user a role in the group
    async fn grant_role(
        &self,
        group_id: &str,
        user: UserIdentity,
        role: GroupRole,
    ) -> Result<(), DbError>;

    /// Find the group the user belongs to
    async fn find_group_for_user(&self, user: UserIdentity) -> Result<Option<Group>, DbError>;
}

/// Outbound side of the chat transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a plain text message
    async fn send_text(&self, to: UserIdentity, text: &str) -> Result<(), TransportError>;

    /// Send a message with a row of inline buttons
    async fn send_menu(
        &self,
        to: UserIdentity,
        text: &str,
        buttons: &[MenuButton],
    ) -> Result<(), TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: Directory + ?Sized> Directory for Arc<T> {
    async fn upsert_user(
        &self,
        id: UserIdentity,
        display_name: Option<&str>,
    ) -> Result<(), DbError> {
        (**self).upsert_user(id, display_name).await
    }

    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>, DbError> {
        (**self).find_group_by_code(code).await
    }

    async fn create_group(&self, name: &str, description: &str) -> Result<Group, DbError> {
        (**self).create_group(name, description).await
    }

    async fn associate_user_with_group(
        &self,
        id: UserIdentity,
        group_id: &str,
    ) -> Result<(), DbError> {
        (**self).associate_user_with_group(id, group_id).await
    }

    async fn grant_role(
        &self,
        group_id: &str,
        user: UserIdentity,
        role: GroupRole,
    ) -> Result<(), DbError> {
        (**self).grant_role(group_id, user, role).await
    }

    async fn find_group_for_user(&self, user: UserIdentity) -> Result<Option<Group>, DbError> {
        (**self).find_group_for_user(user).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_text(&self, to: UserIdentity, text: &str) -> Result<(), TransportError> {
        (**self).send_text(to, text).await
    }

    async fn send_menu(
        &self,
        to: UserIdentity,
        text: &str,
        buttons: &[MenuButton],
    ) -> Result<(), TransportError> {
        (**self).send_menu(to, text, buttons).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Directory.
///
/// rusqlite is synchronous, so every call runs on the blocking pool and a slow
/// query never stalls a runtime worker thread.
#[derive(Clone)]
pub struct DatabaseDirectory {
    db: Database,
}

impl DatabaseDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[allow(dead_code)] // Useful for tests
    pub fn inner(&self) -> &Database {
        &self.db
    }

    async fn blocking<R, F>(&self, call: F) -> Result<R, DbError>
    where
        F: FnOnce(&Database) -> Result<R, DbError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || call(&db)).await?
    }
}

#[async_trait]
impl Directory for DatabaseDirectory {
    async fn upsert_user(
        &self,
        id: UserIdentity,
        display_name: Option<&str>,
    ) -> Result<(), DbError> {
        let display_name = display_name.map(str::to_string);
        self.blocking(move |db| db.upsert_user(id, display_name.as_deref()))
            .await
    }

    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>, DbError> {
        let code = code.to_string();
        self.blocking(move |db| db.find_group(&code)).await
    }

    async fn create_group(&self, name: &str, description: &str) -> Result<Group, DbError> {
        let (name, description) = (name.to_string(), description.to_string());
        self.blocking(move |db| db.create_group(&name, &description))
            .await
    }

    async fn associate_user_with_group(
        &self,
        id: UserIdentity,
        group_id: &str,
    ) -> Result<(), DbError> {
        let group_id = group_id.to_string();
        self.blocking(move |db| db.set_user_group(id, &group_id))
            .await
    }

    async fn grant_role(
        &self,
        group_id: &str,
        user: UserIdentity,
        role: GroupRole,
    ) -> Result<(), DbError> {
        let group_id = group_id.to_string();
        self.blocking(move |db| db.grant_role(&group_id, user, role))
            .await
    }

    async fn find_group_for_user(&self, user: UserIdentity) -> Result<Option<Group>, DbError> {
        self.blocking(move |db| db.find_group_for_user(user)).await
    }
}
