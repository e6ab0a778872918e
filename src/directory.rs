//! Directory database
//!
//! Persists users, groups and group roles.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("User not found: {0}")]
    UserNotFound(UserIdentity),
    #[error("Group not found: {0}")]
    GroupNotFound(String),
    #[allow(dead_code)] // Used in tests
    #[error("Unknown role stored for user {user} in group {group_id}: {role}")]
    UnknownRole {
        group_id: String,
        user: UserIdentity,
        role: String,
    },
    #[error("Database connection lock poisoned")]
    LockPoisoned,
    #[error("Database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Insert the user, or refresh the username of a known one.
    ///
    /// Never touches the user's group membership.
    pub fn upsert_user(&self, id: UserIdentity, username: Option<&str>) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, username, group_id, created_at) VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
            params![id.0, username, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Get user by ID
    #[allow(dead_code)] // Used in tests
    pub fn get_user(&self, id: UserIdentity) -> DbResult<User> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, username, group_id, created_at FROM users WHERE id = ?1",
            params![id.0],
            |row| {
                Ok(User {
                    id: UserIdentity(row.get(0)?),
                    username: row.get(1)?,
                    group_id: row.get(2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::UserNotFound(id),
            other => DbError::Sqlite(other),
        })
    }

    /// Point the user at a group (replaces any previous membership)
    pub fn set_user_group(&self, id: UserIdentity, group_id: &str) -> DbResult<()> {
        let conn = self.conn()?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?1)",
            params![group_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::GroupNotFound(group_id.to_string()));
        }

        let updated = conn.execute(
            "UPDATE users SET group_id = ?1 WHERE id = ?2",
            params![group_id, id.0],
        )?;

        if updated == 0 {
            return Err(DbError::UserNotFound(id));
        }
        Ok(())
    }

    // ==================== Group Operations ====================

    /// Create a new group with a freshly generated id
    pub fn create_group(&self, name: &str, description: &str) -> DbResult<Group> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO groups (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, description, now.to_rfc3339()],
        )?;

        Ok(Group {
            id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
        })
    }

    /// Get group by id (the join code); `None` if no such group
    pub fn find_group(&self, id: &str) -> DbResult<Option<Group>> {
        let conn = self.conn()?;
        let group = conn
            .query_row(
                "SELECT id, name, description, created_at FROM groups WHERE id = ?1",
                params![id],
                group_from_row,
            )
            .optional()?;
        Ok(group)
    }

    /// Get the group a user currently belongs to
    pub fn find_group_for_user(&self, user: UserIdentity) -> DbResult<Option<Group>> {
        let conn = self.conn()?;
        let group = conn
            .query_row(
                "SELECT g.id, g.name, g.description, g.created_at
                 FROM groups g JOIN users u ON u.group_id = g.id
                 WHERE u.id = ?1",
                params![user.0],
                group_from_row,
            )
            .optional()?;
        Ok(group)
    }

    // ==================== Role Operations ====================

    /// Grant a role, replacing any role the user already holds in the group
    pub fn grant_role(&self, group_id: &str, user: UserIdentity, role: GroupRole) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO group_users (group_id, user_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id, user_id) DO UPDATE SET role = excluded.role",
            params![group_id, user.0, role.as_str()],
        )?;
        Ok(())
    }

    /// Get the role a user holds in a group
    #[allow(dead_code)] // Used in tests
    pub fn get_role(&self, group_id: &str, user: UserIdentity) -> DbResult<Option<GroupRole>> {
        let conn = self.conn()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT role FROM group_users WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user.0],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            None => Ok(None),
            Some(role) => GroupRole::parse(&role).map(Some).ok_or(DbError::UnknownRole {
                group_id: group_id.to_string(),
                user,
                role,
            }),
        }
    }
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
