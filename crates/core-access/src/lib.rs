//! # Core Access Crate
//!
//! This crate is the central authority for caller identity and for the per-caller
//! relationship to generated guides (the ownership ledger) in `devotio`.
//!
//! Canonical guide content lives in the `devotio` crate; everything that is private
//! to a single user or session (who owns which guide, whether it is saved) lives here.

pub mod caller;
pub mod ownership;
pub mod sql;

pub use caller::{Caller, CallerKind};
pub use ownership::{
    ensure_ownership, find_ownership, list_ownerships, remove_ownership, set_saved,
    ListOptions, OwnershipRecord,
};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use turso::{params, Database, Error as TursoError, Row};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreAccessError {
    #[error("Database error: {0}")]
    Database(#[from] TursoError),
    #[error("Failed to create or find user for identifier: {0}")]
    UserPersistenceFailed(String),
    #[error("Failed to create or find ownership of '{content_id}' for {caller}")]
    OwnershipPersistenceFailed { content_id: String, caller: String },
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
}

/// Returns true when a turso error was raised by a UNIQUE constraint.
///
/// Concurrent writers are expected everywhere in this system, and the uniqueness
/// constraint is the source of truth for "who got there first".
pub fn is_unique_violation(err: &TursoError) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

/// Parses a timestamp column.
///
/// Rows written by the application carry RFC 3339 text; rows relying on
/// `DEFAULT CURRENT_TIMESTAMP` carry `%Y-%m-%d %H:%M:%S`.
pub fn parse_db_timestamp(raw: &str) -> Result<DateTime<Utc>, CoreAccessError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        .map_err(|e| CoreAccessError::DataIntegrity(format!("Failed to parse date '{raw}': {e}")))
}

/// Represents an authenticated user in the system.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// The unique, deterministic ID of the user (UUIDv5 from an external identifier).
    pub id: String,
    /// The timestamp when the user was first created.
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn caller(&self) -> Caller {
        Caller::Authenticated {
            user_id: self.id.clone(),
        }
    }
}

impl TryFrom<&Row> for User {
    type Error = CoreAccessError;

    fn try_from(row: &Row) -> std::result::Result<Self, Self::Error> {
        let created_at_str: String = row.get(1)?;
        Ok(User {
            id: row.get(0)?,
            created_at: parse_db_timestamp(&created_at_str)?,
        })
    }
}

/// Derives the deterministic user id for an external identifier (e.g. a token `sub`).
pub fn user_id_for(user_identifier: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, user_identifier.as_bytes()).to_string()
}

/// Finds a user by their unique identifier, creating them if they don't exist.
///
/// Two first-time requests for the same identifier can race here; the loser of the
/// insert hits the primary key constraint and simply reads the winner's row.
pub async fn get_or_create_user(
    db: &Database,
    user_identifier: &str,
) -> Result<User, CoreAccessError> {
    let conn = db.connect()?;
    let user_id = user_id_for(user_identifier);

    let mut rows = conn
        .query(
            "SELECT id, created_at FROM users WHERE id = ?",
            params![user_id.clone()],
        )
        .await?;
    if let Some(row) = rows.next().await? {
        return User::try_from(&row);
    }
    drop(rows);

    match conn
        .execute(
            "INSERT INTO users (id, created_at) VALUES (?, ?)",
            params![user_id.clone(), Utc::now().to_rfc3339()],
        )
        .await
    {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(%user_id, "User was created concurrently, re-reading.");
        }
        Err(e) => return Err(e.into()),
    }

    let mut rows = conn
        .query(
            "SELECT id, created_at FROM users WHERE id = ?",
            params![user_id],
        )
        .await?;

    let row = rows
        .next()
        .await?
        .ok_or_else(|| CoreAccessError::UserPersistenceFailed(user_identifier.to_string()))?;

    User::try_from(&row)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;

    #[tokio::test]
    async fn test_get_or_create_user_flow() {
        let db = memory_db().await;
        let user_identifier = "test@example.com";

        let user1 = get_or_create_user(&db, user_identifier).await.unwrap();
        assert_eq!(user1.id, user_id_for(user_identifier));

        // A second call returns the same row instead of inserting again.
        let user2 = get_or_create_user(&db, user_identifier).await.unwrap();
        assert_eq!(user1.id, user2.id);
        assert_eq!(user1.created_at.timestamp(), user2.created_at.timestamp());

        let user3 = get_or_create_user(&db, "another@example.com").await.unwrap();
        assert_ne!(user1.id, user3.id);
    }

    #[test]
    fn test_parse_db_timestamp_accepts_both_formats() {
        let a = parse_db_timestamp("2024-05-01T10:00:00+00:00").unwrap();
        let b = parse_db_timestamp("2024-05-01 10:00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_db_timestamp("yesterday").is_err());
    }
}
