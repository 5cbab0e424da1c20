//! # In-Flight Registry
//!
//! Tracks generation attempts in durable rows. The table holds at most one row per
//! `GuideKey`, so at most one attempt can be `running`. The UNIQUE constraint, not an
//! in-process lock, decides which request generates.
//!
//! Heartbeats are unix milliseconds. Eviction compares-and-swaps on the heartbeat the
//! evictor observed, so an owner that checkpoints in the meantime keeps its claim.

use super::{integer, optional_text};
use crate::{
    errors::{ErrorCode, GuideError},
    fingerprint::GuideKey,
    types::GuideSections,
};
use chrono::{DateTime, Utc};
use core_access::{is_unique_violation, parse_db_timestamp, Caller};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use turso::{params, Connection, Database, Row};
use uuid::Uuid;

const INFLIGHT_COLUMNS: &str = "id, input_type, fingerprint, language, mode, owner_type, owner_id, \
     status, sections_json, last_heartbeat, error_code, error_message, content_id, \
     created_at, updated_at";

const CLAIM_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Completed,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Running => "running",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self, GuideError> {
        match raw {
            "running" => Ok(AttemptStatus::Running),
            "completed" => Ok(AttemptStatus::Completed),
            "failed" => Ok(AttemptStatus::Failed),
            other => Err(GuideError::Storage(format!("Unknown attempt status '{other}'"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InFlightRecord {
    pub id: String,
    pub key: GuideKey,
    pub owner: Caller,
    pub status: AttemptStatus,
    /// Partial results. Only ever grows while the attempt runs.
    pub sections: GuideSections,
    pub last_heartbeat_ms: i64,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub content_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InFlightRecord {
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_heartbeat_ms)
    }

    /// A running attempt is stale once its heartbeat is older than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != AttemptStatus::Running {
            return false;
        }
        let silent_for = now.timestamp_millis() - self.last_heartbeat_ms;
        silent_for > i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX)
    }
}

impl TryFrom<&Row> for InFlightRecord {
    type Error = GuideError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let input_type: String = row.get(1)?;
        let mode: String = row.get(4)?;
        let owner_type: String = row.get(5)?;
        let owner_id: String = row.get(6)?;
        let status: String = row.get(7)?;
        let sections_json: String = row.get(8)?;
        let error_code = match optional_text(row, 10)? {
            Some(raw) => Some(ErrorCode::parse(&raw).ok_or_else(|| {
                GuideError::Storage(format!("Unknown error code '{raw}' in registry"))
            })?),
            None => None,
        };
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;

        Ok(InFlightRecord {
            id: row.get(0)?,
            key: GuideKey {
                input_type: input_type.parse()?,
                fingerprint: row.get(2)?,
                language: row.get(3)?,
                mode: mode.parse()?,
            },
            owner: Caller::from_parts(&owner_type, owner_id)?,
            status: AttemptStatus::parse(&status)?,
            sections: serde_json::from_str(&sections_json)?,
            last_heartbeat_ms: integer(row, 9)?,
            error_code,
            error_message: optional_text(row, 11)?,
            content_id: optional_text(row, 12)?,
            created_at: parse_db_timestamp(&created_at)?,
            updated_at: parse_db_timestamp(&updated_at)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller owns a fresh `running` attempt.
    Claimed(InFlightRecord),
    /// Another attempt is running for the key.
    Contended(InFlightRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    Completed { content_id: String },
    Failed { code: ErrorCode, message: String },
}

#[derive(Clone)]
pub struct InFlightRegistry {
    db: Database,
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry").finish_non_exhaustive()
    }
}

impl InFlightRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn select_by_key(
        conn: &Connection,
        key: &GuideKey,
    ) -> Result<Option<InFlightRecord>, GuideError> {
        let sql = format!(
            "SELECT {INFLIGHT_COLUMNS} FROM guide_inflight
             WHERE input_type = ? AND fingerprint = ? AND language = ? AND mode = ?"
        );
        let mut rows = conn
            .query(
                &sql,
                params![
                    key.input_type.as_str(),
                    key.fingerprint.clone(),
                    key.language.clone(),
                    key.mode.as_str()
                ],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(InFlightRecord::try_from(&row)?)),
            None => Ok(None),
        }
    }

    async fn select_by_id(conn: &Connection, id: &str) -> Result<Option<InFlightRecord>, GuideError> {
        let sql = format!("SELECT {INFLIGHT_COLUMNS} FROM guide_inflight WHERE id = ?");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(InFlightRecord::try_from(&row)?)),
            None => Ok(None),
        }
    }

    /// The attempt row for a key, whatever its status.
    pub async fn find(&self, key: &GuideKey) -> Result<Option<InFlightRecord>, GuideError> {
        let conn = self.db.connect()?;
        Self::select_by_key(&conn, key).await
    }

    pub async fn find_running(&self, key: &GuideKey) -> Result<Option<InFlightRecord>, GuideError> {
        Ok(self
            .find(key)
            .await?
            .filter(|r| r.status == AttemptStatus::Running))
    }

    pub async fn get(&self, attempt_id: &str) -> Result<Option<InFlightRecord>, GuideError> {
        let conn = self.db.connect()?;
        Self::select_by_id(&conn, attempt_id).await
    }

    /// Deletes a finished attempt for the key so a new one can be created.
    pub async fn cleanup_terminal(&self, key: &GuideKey) -> Result<u64, GuideError> {
        let conn = self.db.connect()?;
        let removed = conn
            .execute(
                "DELETE FROM guide_inflight
                 WHERE input_type = ? AND fingerprint = ? AND language = ? AND mode = ?
                   AND status != 'running'",
                params![
                    key.input_type.as_str(),
                    key.fingerprint.clone(),
                    key.language.clone(),
                    key.mode.as_str()
                ],
            )
            .await?;
        if removed > 0 {
            debug!(key = %key.short(), "Removed terminal attempt.");
        }
        Ok(removed)
    }

    /// Tries to claim the key for `owner`.
    ///
    /// Losing the insert race is not an error: the winner's running attempt comes back
    /// as `Contended`. A terminal row left behind is cleaned up and the insert retried.
    pub async fn create(&self, key: &GuideKey, owner: &Caller) -> Result<ClaimOutcome, GuideError> {
        let conn = self.db.connect()?;

        for _ in 0..CLAIM_ATTEMPTS {
            let now = Utc::now();
            let stamp = now.to_rfc3339();
            let id = Uuid::new_v4().to_string();
            let insert = conn
                .execute(
                    "INSERT INTO guide_inflight
                        (id, input_type, fingerprint, language, mode, owner_type, owner_id,
                         status, sections_json, last_heartbeat, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, 'running', '{}', ?, ?, ?)",
                    params![
                        id.clone(),
                        key.input_type.as_str(),
                        key.fingerprint.clone(),
                        key.language.clone(),
                        key.mode.as_str(),
                        owner.kind().as_str(),
                        owner.id().to_string(),
                        now.timestamp_millis(),
                        stamp.clone(),
                        stamp
                    ],
                )
                .await;

            match insert {
                Ok(_) => {
                    let record = Self::select_by_id(&conn, &id).await?.ok_or_else(|| {
                        GuideError::Storage(format!("Attempt {id} missing after insert"))
                    })?;
                    info!(attempt_id = %id, key = %key.short(), %owner, "Claimed generation.");
                    return Ok(ClaimOutcome::Claimed(record));
                }
                Err(e) if is_unique_violation(&e) => {
                    match Self::select_by_key(&conn, key).await? {
                        Some(existing) if existing.status == AttemptStatus::Running => {
                            debug!(attempt_id = %existing.id, key = %key.short(), "Key already claimed.");
                            return Ok(ClaimOutcome::Contended(existing));
                        }
                        Some(_) => {
                            self.cleanup_terminal(key).await?;
                        }
                        // Deleted between our insert and read; try again.
                        None => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GuideError::Storage(format!(
            "Could not claim key {} after {CLAIM_ATTEMPTS} attempts",
            key.short()
        )))
    }

    /// Stores partial sections and refreshes the heartbeat.
    ///
    /// Returns false when the attempt is no longer running (finalized or evicted).
    pub async fn checkpoint(
        &self,
        attempt_id: &str,
        sections: &GuideSections,
    ) -> Result<bool, GuideError> {
        let conn = self.db.connect()?;
        let now = Utc::now();
        let updated = conn
            .execute(
                "UPDATE guide_inflight SET sections_json = ?, last_heartbeat = ?, updated_at = ?
                 WHERE id = ? AND status = 'running'",
                params![
                    serde_json::to_string(sections)?,
                    now.timestamp_millis(),
                    now.to_rfc3339(),
                    attempt_id.to_string()
                ],
            )
            .await?;
        if updated == 0 {
            warn!(%attempt_id, "Checkpoint skipped: attempt is no longer running.");
        }
        Ok(updated > 0)
    }

    /// Moves a running attempt to a terminal status. Returns false if it was already
    /// terminal.
    pub async fn finalize(
        &self,
        attempt_id: &str,
        outcome: Finalization,
    ) -> Result<bool, GuideError> {
        let conn = self.db.connect()?;
        let now = Utc::now().to_rfc3339();
        let updated = match &outcome {
            Finalization::Completed { content_id } => {
                conn.execute(
                    "UPDATE guide_inflight SET status = 'completed', content_id = ?, updated_at = ?
                     WHERE id = ? AND status = 'running'",
                    params![content_id.clone(), now, attempt_id.to_string()],
                )
                .await?
            }
            Finalization::Failed { code, message } => {
                conn.execute(
                    "UPDATE guide_inflight
                     SET status = 'failed', error_code = ?, error_message = ?, updated_at = ?
                     WHERE id = ? AND status = 'running'",
                    params![code.as_str(), message.clone(), now, attempt_id.to_string()],
                )
                .await?
            }
        };
        if updated > 0 {
            info!(%attempt_id, ?outcome, "Finalized attempt.");
        } else {
            debug!(%attempt_id, "Attempt was already terminal, finalize ignored.");
        }
        Ok(updated > 0)
    }

    /// Marks a stale attempt as failed with `TIMEOUT`.
    ///
    /// Only succeeds if the heartbeat is still the one observed in `record`; a live
    /// owner that checkpointed since then is left alone.
    pub async fn evict_stale(&self, record: &InFlightRecord) -> Result<bool, GuideError> {
        let conn = self.db.connect()?;
        let evicted = conn
            .execute(
                "UPDATE guide_inflight
                 SET status = 'failed', error_code = ?, error_message = ?, updated_at = ?
                 WHERE id = ? AND status = 'running' AND last_heartbeat = ?",
                params![
                    ErrorCode::Timeout.as_str(),
                    "Generation attempt abandoned: no heartbeat",
                    Utc::now().to_rfc3339(),
                    record.id.clone(),
                    record.last_heartbeat_ms
                ],
            )
            .await?;
        if evicted > 0 {
            warn!(attempt_id = %record.id, owner = %record.owner, "Evicted stale attempt.");
        }
        Ok(evicted > 0)
    }
}
