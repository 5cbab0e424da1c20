//! # Content Store
//!
//! Canonical generated guides, one row per `GuideKey`. Rows are written once and only
//! ever grow through enrichment. Creation is race-safe: the UNIQUE key constraint picks
//! the first writer and everybody else reads that row back.

use super::optional_text;
use crate::{
    errors::GuideError,
    fingerprint::{normalize_input, GuideKey},
    types::{GuideSections, InputType, SectionKind},
};
use chrono::{DateTime, Utc};
use core_access::{is_unique_violation, parse_db_timestamp, Caller};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use turso::{params, Connection, Database, Row, Value as TursoValue};
use uuid::Uuid;

const CONTENT_COLUMNS: &str = "id, input_type, fingerprint, language, mode, input_value, \
     sections_json, enrichment_json, creator_type, creator_id, created_at, updated_at";

const ENRICHMENT_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentRecord {
    pub id: String,
    #[serde(flatten)]
    pub key: GuideKey,
    /// NULL for redacted inputs.
    pub input_value: Option<String>,
    pub sections: GuideSections,
    pub enrichment: Map<String, Value>,
    /// `None` for legacy rows.
    pub creator: Option<Caller>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn is_created_by(&self, caller: &Caller) -> bool {
        self.creator.as_ref() == Some(caller)
    }
}

impl TryFrom<&Row> for ContentRecord {
    type Error = GuideError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let input_type: String = row.get(1)?;
        let mode: String = row.get(4)?;
        let sections_json: String = row.get(6)?;
        let enrichment_json: String = row.get(7)?;
        let creator = match (optional_text(row, 8)?, optional_text(row, 9)?) {
            (Some(kind), Some(id)) => Some(Caller::from_parts(&kind, id)?),
            _ => None,
        };
        let created_at: String = row.get(10)?;
        let updated_at: String = row.get(11)?;

        Ok(ContentRecord {
            id: row.get(0)?,
            key: GuideKey {
                input_type: input_type.parse()?,
                fingerprint: row.get(2)?,
                language: row.get(3)?,
                mode: mode.parse()?,
            },
            input_value: optional_text(row, 5)?,
            sections: serde_json::from_str(&sections_json)?,
            enrichment: serde_json::from_str(&enrichment_json)?,
            creator,
            created_at: parse_db_timestamp(&created_at)?,
            updated_at: parse_db_timestamp(&updated_at)?,
        })
    }
}

/// A candidate row for `insert` / `find_or_create`.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub key: GuideKey,
    pub input_value: Option<String>,
    pub sections: GuideSections,
    pub creator: Option<Caller>,
}

impl NewContent {
    /// Builds a candidate, redacting question inputs.
    pub fn new(
        key: GuideKey,
        raw_input: &str,
        sections: GuideSections,
        creator: Option<Caller>,
    ) -> Self {
        let input_value = match key.input_type {
            InputType::Question => None,
            InputType::Scripture | InputType::Topic => Some(normalize_input(raw_input)),
        };
        Self {
            key,
            input_value,
            sections,
            creator,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(ContentRecord),
    /// Somebody else wrote the key first; this is their row.
    AlreadyExists(ContentRecord),
}

impl InsertOutcome {
    pub fn was_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }

    pub fn record(&self) -> &ContentRecord {
        match self {
            InsertOutcome::Inserted(r) | InsertOutcome::AlreadyExists(r) => r,
        }
    }

    pub fn into_record(self) -> ContentRecord {
        match self {
            InsertOutcome::Inserted(r) | InsertOutcome::AlreadyExists(r) => r,
        }
    }
}

#[derive(Clone)]
pub struct ContentStore {
    db: Database,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore").finish_non_exhaustive()
    }
}

impl ContentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn select_by_key(
        conn: &Connection,
        key: &GuideKey,
    ) -> Result<Option<ContentRecord>, GuideError> {
        let sql = format!(
            "SELECT {CONTENT_COLUMNS} FROM guide_content
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
            Some(row) => Ok(Some(ContentRecord::try_from(&row)?)),
            None => Ok(None),
        }
    }

    async fn select_by_id(conn: &Connection, id: &str) -> Result<Option<ContentRecord>, GuideError> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM guide_content WHERE id = ?");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(ContentRecord::try_from(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn find(&self, key: &GuideKey) -> Result<Option<ContentRecord>, GuideError> {
        let conn = self.db.connect()?;
        Self::select_by_key(&conn, key).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ContentRecord>, GuideError> {
        let conn = self.db.connect()?;
        Self::select_by_id(&conn, id).await
    }

    /// Inserts the candidate. A UNIQUE violation is not an error: the existing row wins.
    pub async fn insert(&self, candidate: NewContent) -> Result<InsertOutcome, GuideError> {
        let conn = self.db.connect()?;
        self.insert_with(&conn, candidate).await
    }

    async fn insert_with(
        &self,
        conn: &Connection,
        candidate: NewContent,
    ) -> Result<InsertOutcome, GuideError> {
        let now = Utc::now().to_rfc3339();
        let (creator_type, creator_id) = match &candidate.creator {
            Some(c) => (
                TursoValue::Text(c.kind().as_str().to_string()),
                TursoValue::Text(c.id().to_string()),
            ),
            None => (TursoValue::Null, TursoValue::Null),
        };
        let input_value = candidate
            .input_value
            .clone()
            .map(TursoValue::Text)
            .unwrap_or(TursoValue::Null);
        let params: Vec<TursoValue> = vec![
            TursoValue::Text(Uuid::new_v4().to_string()),
            TursoValue::Text(candidate.key.input_type.as_str().to_string()),
            TursoValue::Text(candidate.key.fingerprint.clone()),
            TursoValue::Text(candidate.key.language.clone()),
            TursoValue::Text(candidate.key.mode.as_str().to_string()),
            input_value,
            TursoValue::Text(serde_json::to_string(&candidate.sections)?),
            creator_type,
            creator_id,
            TursoValue::Text(now.clone()),
            TursoValue::Text(now),
        ];

        let inserted = match conn
            .execute(
                "INSERT INTO guide_content
                    (id, input_type, fingerprint, language, mode, input_value, sections_json,
                     enrichment_json, creator_type, creator_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, '{}', ?, ?, ?, ?)",
                params,
            )
            .await
        {
            Ok(_) => true,
            Err(e) if is_unique_violation(&e) => {
                debug!(key = %candidate.key.short(), "Content written concurrently, reading winner.");
                false
            }
            Err(e) => return Err(e.into()),
        };

        let record = Self::select_by_key(conn, &candidate.key)
            .await?
            .ok_or_else(|| {
                GuideError::Storage(format!(
                    "Content for key {} missing after insert",
                    candidate.key.short()
                ))
            })?;

        if inserted {
            info!(content_id = %record.id, key = %candidate.key.short(), "Committed guide content.");
            Ok(InsertOutcome::Inserted(record))
        } else {
            Ok(InsertOutcome::AlreadyExists(record))
        }
    }

    /// Returns the row for the candidate's key, creating it if absent. First writer wins.
    pub async fn find_or_create(&self, candidate: NewContent) -> Result<InsertOutcome, GuideError> {
        let conn = self.db.connect()?;
        if let Some(existing) = Self::select_by_key(&conn, &candidate.key).await? {
            return Ok(InsertOutcome::AlreadyExists(existing));
        }
        self.insert_with(&conn, candidate).await
    }

    /// Adds an optional section. Names already present, canonical or enriched, are left
    /// alone. Returns `None` when the guide does not exist.
    pub async fn append_enrichment(
        &self,
        content_id: &str,
        name: &str,
        value: Value,
    ) -> Result<Option<ContentRecord>, GuideError> {
        let conn = self.db.connect()?;

        for _ in 0..ENRICHMENT_CAS_ATTEMPTS {
            let Some(record) = Self::select_by_id(&conn, content_id).await? else {
                return Ok(None);
            };
            let canonical = SectionKind::parse(name).is_some_and(|k| record.sections.contains(k));
            if canonical || record.enrichment.contains_key(name) {
                debug!(%content_id, %name, "Enrichment already present, skipping.");
                return Ok(Some(record));
            }

            let previous = serde_json::to_string(&record.enrichment)?;
            let mut enrichment = record.enrichment.clone();
            enrichment.insert(name.to_string(), value.clone());

            let swapped = conn
                .execute(
                    "UPDATE guide_content SET enrichment_json = ?, updated_at = ?
                     WHERE id = ? AND enrichment_json = ?",
                    params![
                        serde_json::to_string(&enrichment)?,
                        Utc::now().to_rfc3339(),
                        content_id.to_string(),
                        previous
                    ],
                )
                .await?;
            if swapped > 0 {
                info!(%content_id, %name, "Appended enrichment section.");
                return Self::select_by_id(&conn, content_id).await;
            }
            warn!(%content_id, %name, "Enrichment changed concurrently, retrying.");
        }

        Err(GuideError::Storage(format!(
            "Could not append enrichment '{name}' to {content_id}: too much contention"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::db::sqlite::SqliteProvider;
    use crate::types::{GenerationMode, GuideRequest};
    use serde_json::json;

    async fn store() -> ContentStore {
        let provider = SqliteProvider::new(":memory:").await.unwrap();
        provider.initialize_schema().await.unwrap();
        ContentStore::new(provider.db)
    }

    fn sections() -> GuideSections {
        [(SectionKind::Summary, json!("God so loved the world."))]
            .into_iter()
            .collect()
    }

    fn candidate(input: &str, input_type: InputType, creator: Option<Caller>) -> NewContent {
        let request = GuideRequest::new(input, input_type);
        NewContent::new(GuideKey::for_request(&request), input, sections(), creator)
    }

    #[tokio::test]
    async fn test_find_or_create_twice_returns_same_row() {
        let store = store().await;
        let first = store
            .find_or_create(candidate("John 3:16", InputType::Scripture, Some(Caller::user("a"))))
            .await
            .unwrap();
        let second = store
            .find_or_create(candidate("john  3:16", InputType::Scripture, Some(Caller::user("b"))))
            .await
            .unwrap();

        assert!(first.was_inserted());
        assert!(!second.was_inserted());
        assert_eq!(first.record().id, second.record().id);
        // First writer keeps creatorship.
        assert_eq!(second.record().creator, Some(Caller::user("a")));
    }

    #[tokio::test]
    async fn test_raw_insert_losing_race_reads_winner() {
        let store = store().await;
        let a = store
            .insert(candidate("Grace", InputType::Topic, Some(Caller::session("s1"))))
            .await
            .unwrap();
        let b = store
            .insert(candidate("grace", InputType::Topic, Some(Caller::session("s2"))))
            .await
            .unwrap();
        assert!(a.was_inserted());
        assert_eq!(b, InsertOutcome::AlreadyExists(a.into_record()));
    }

    #[tokio::test]
    async fn test_question_input_is_redacted() {
        let store = store().await;
        let record = store
            .find_or_create(candidate(
                "How do I forgive my brother Tom?",
                InputType::Question,
                None,
            ))
            .await
            .unwrap()
            .into_record();
        assert_eq!(record.input_value, None);
        assert_eq!(record.creator, None);

        let fetched = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_mode_separates_rows() {
        let store = store().await;
        let standard = candidate("Hope", InputType::Topic, None);
        let mut deep = standard.clone();
        deep.key = GuideKey::for_request(
            &GuideRequest::new("Hope", InputType::Topic).mode(GenerationMode::Deep),
        );
        let a = store.find_or_create(standard).await.unwrap();
        let b = store.find_or_create(deep).await.unwrap();
        assert!(b.was_inserted());
        assert_ne!(a.record().id, b.record().id);
    }

    #[tokio::test]
    async fn test_append_enrichment_only_adds_new_names() {
        let store = store().await;
        let record = store
            .find_or_create(candidate("Psalm 23", InputType::Scripture, None))
            .await
            .unwrap()
            .into_record();

        let enriched = store
            .append_enrichment(&record.id, "word_study", json!(["shepherd"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enriched.enrichment.get("word_study"), Some(&json!(["shepherd"])));

        let unchanged = store
            .append_enrichment(&record.id, "word_study", json!(["other"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.enrichment.get("word_study"), Some(&json!(["shepherd"])));

        let canonical = store
            .append_enrichment(&record.id, "summary", json!("overwrite"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(canonical.sections, record.sections);
        assert!(!canonical.enrichment.contains_key("summary"));

        assert!(store
            .append_enrichment("missing", "x", json!(1))
            .await
            .unwrap()
            .is_none());
    }
}
