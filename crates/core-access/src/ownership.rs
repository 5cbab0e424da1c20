//! # Ownership Ledger
//!
//! Maps a caller (user or session) to a canonical guide. The ledger row carries the
//! caller's private save-state; the guide itself is shared by every owner.
//!
//! Inserts race freely. The `UNIQUE (content_id, caller_type, caller_id)` constraint
//! decides the winner and the loser re-reads, so a duplicate insert is never surfaced.

use crate::{is_unique_violation, parse_db_timestamp, Caller, CoreAccessError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use turso::{params, Connection, Database, Row, Value};
use uuid::Uuid;

const OWNERSHIP_COLUMNS: &str =
    "id, content_id, caller_type, caller_id, is_saved, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub id: String,
    pub content_id: String,
    pub caller: Caller,
    pub is_saved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Row> for OwnershipRecord {
    type Error = CoreAccessError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let caller_type: String = row.get(2)?;
        let caller_id: String = row.get(3)?;
        let is_saved = match row.get_value(4)? {
            Value::Integer(i) => i != 0,
            other => {
                return Err(CoreAccessError::DataIntegrity(format!(
                    "is_saved must be an integer, got {other:?}"
                )));
            }
        };
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        Ok(OwnershipRecord {
            id: row.get(0)?,
            content_id: row.get(1)?,
            caller: Caller::from_parts(&caller_type, caller_id)?,
            is_saved,
            created_at: parse_db_timestamp(&created_at)?,
            updated_at: parse_db_timestamp(&updated_at)?,
        })
    }
}

/// Pagination and filtering for a caller's library listing.
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub limit: u32,
    pub offset: u32,
    pub saved_only: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            saved_only: false,
        }
    }
}

async fn select_ownership(
    conn: &Connection,
    content_id: &str,
    caller: &Caller,
) -> Result<Option<OwnershipRecord>, CoreAccessError> {
    let sql = format!(
        "SELECT {OWNERSHIP_COLUMNS} FROM guide_ownership
         WHERE content_id = ? AND caller_type = ? AND caller_id = ?"
    );
    let mut rows = conn
        .query(
            &sql,
            params![
                content_id.to_string(),
                caller.kind().as_str(),
                caller.id().to_string()
            ],
        )
        .await?;

    match rows.next().await? {
        Some(row) => Ok(Some(OwnershipRecord::try_from(&row)?)),
        None => Ok(None),
    }
}

/// Returns the caller's ownership of a guide, if any.
pub async fn find_ownership(
    db: &Database,
    content_id: &str,
    caller: &Caller,
) -> Result<Option<OwnershipRecord>, CoreAccessError> {
    let conn = db.connect()?;
    select_ownership(&conn, content_id, caller).await
}

/// Attaches a guide to a caller, returning the existing row when there is one.
///
/// This is idempotent: calling it again, or racing another request doing the same,
/// always ends with exactly one row.
pub async fn ensure_ownership(
    db: &Database,
    content_id: &str,
    caller: &Caller,
) -> Result<OwnershipRecord, CoreAccessError> {
    let conn = db.connect()?;

    if let Some(existing) = select_ownership(&conn, content_id, caller).await? {
        return Ok(existing);
    }

    let now = Utc::now().to_rfc3339();
    let insert = conn
        .execute(
            "INSERT INTO guide_ownership
                (id, content_id, caller_type, caller_id, is_saved, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                content_id.to_string(),
                caller.kind().as_str(),
                caller.id().to_string(),
                now.clone(),
                now
            ],
        )
        .await;

    match insert {
        Ok(_) => info!(%content_id, %caller, "Attached guide to caller."),
        Err(e) if is_unique_violation(&e) => {
            debug!(%content_id, %caller, "Ownership already attached by a concurrent request.");
        }
        Err(e) => return Err(e.into()),
    }

    select_ownership(&conn, content_id, caller)
        .await?
        .ok_or_else(|| CoreAccessError::OwnershipPersistenceFailed {
            content_id: content_id.to_string(),
            caller: caller.to_string(),
        })
}

/// Updates the caller's save-state. Returns `None` when the caller does not own the guide.
pub async fn set_saved(
    db: &Database,
    content_id: &str,
    caller: &Caller,
    is_saved: bool,
) -> Result<Option<OwnershipRecord>, CoreAccessError> {
    let conn = db.connect()?;
    let changed = conn
        .execute(
            "UPDATE guide_ownership SET is_saved = ?, updated_at = ?
             WHERE content_id = ? AND caller_type = ? AND caller_id = ?",
            params![
                i64::from(is_saved),
                Utc::now().to_rfc3339(),
                content_id.to_string(),
                caller.kind().as_str(),
                caller.id().to_string()
            ],
        )
        .await?;

    if changed == 0 {
        return Ok(None);
    }
    select_ownership(&conn, content_id, caller).await
}

/// Removes a guide from the caller's list. The canonical guide is left untouched.
pub async fn remove_ownership(
    db: &Database,
    content_id: &str,
    caller: &Caller,
) -> Result<bool, CoreAccessError> {
    let conn = db.connect()?;
    let removed = conn
        .execute(
            "DELETE FROM guide_ownership
             WHERE content_id = ? AND caller_type = ? AND caller_id = ?",
            params![
                content_id.to_string(),
                caller.kind().as_str(),
                caller.id().to_string()
            ],
        )
        .await?;
    Ok(removed > 0)
}

/// Lists a caller's guides, newest first.
pub async fn list_ownerships(
    db: &Database,
    caller: &Caller,
    options: ListOptions,
) -> Result<Vec<OwnershipRecord>, CoreAccessError> {
    let conn = db.connect()?;
    let saved_filter = if options.saved_only {
        " AND is_saved = 1"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {OWNERSHIP_COLUMNS} FROM guide_ownership
         WHERE caller_type = ? AND caller_id = ?{saved_filter}
         ORDER BY created_at DESC, id ASC
         LIMIT {} OFFSET {}",
        options.limit, options.offset
    );

    let mut rows = conn
        .query(&sql, params![caller.kind().as_str(), caller.id().to_string()])
        .await?;
    let mut records = Vec::new();
    while let Some(row) = rows.next().await? {
        records.push(OwnershipRecord::try_from(&row)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;

    #[tokio::test]
    async fn test_ensure_ownership_is_idempotent() {
        let db = memory_db().await;
        let caller = Caller::user("u-1");

        let first = ensure_ownership(&db, "guide-1", &caller).await.unwrap();
        let second = ensure_ownership(&db, "guide-1", &caller).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(!first.is_saved);
        assert_eq!(first.caller, caller);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_by_constraint() {
        let db = memory_db().await;
        let caller = Caller::session("s-1");
        ensure_ownership(&db, "guide-1", &caller).await.unwrap();

        // A raw second insert for the same pair is what a losing racer would attempt.
        let conn = db.connect().unwrap();
        let err = conn
            .execute(
                "INSERT INTO guide_ownership
                    (id, content_id, caller_type, caller_id, is_saved, created_at, updated_at)
                 VALUES ('other', 'guide-1', 'session', 's-1', 0, 'x', 'x')",
                (),
            )
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_user_and_session_ownerships_are_separate() {
        let db = memory_db().await;
        let user = Caller::user("same-id");
        let session = Caller::session("same-id");

        let a = ensure_ownership(&db, "guide-1", &user).await.unwrap();
        let b = ensure_ownership(&db, "guide-1", &session).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_save_toggle_and_remove() {
        let db = memory_db().await;
        let caller = Caller::user("u-1");
        let stranger = Caller::user("u-2");
        ensure_ownership(&db, "guide-1", &caller).await.unwrap();

        let saved = set_saved(&db, "guide-1", &caller, true).await.unwrap().unwrap();
        assert!(saved.is_saved);

        assert!(set_saved(&db, "guide-1", &stranger, true).await.unwrap().is_none());

        assert!(remove_ownership(&db, "guide-1", &caller).await.unwrap());
        assert!(!remove_ownership(&db, "guide-1", &caller).await.unwrap());
        assert!(find_ownership(&db, "guide-1", &caller).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_ownerships_filters_saved_and_paginates() {
        let db = memory_db().await;
        let caller = Caller::user("u-1");
        for id in ["g-1", "g-2", "g-3"] {
            ensure_ownership(&db, id, &caller).await.unwrap();
        }
        ensure_ownership(&db, "g-other", &Caller::user("u-2")).await.unwrap();
        set_saved(&db, "g-2", &caller, true).await.unwrap();

        let all = list_ownerships(&db, &caller, ListOptions::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let saved = list_ownerships(
            &db,
            &caller,
            ListOptions {
                saved_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].content_id, "g-2");

        let page = list_ownerships(
            &db,
            &caller,
            ListOptions {
                limit: 2,
                offset: 2,
                saved_only: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(page.len(), 1);
    }
}
