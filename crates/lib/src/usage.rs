//! Usage recording for finished generations.
//!
//! Recording is best-effort: the coordinator logs a failed write and moves on.

use crate::{errors::GuideError, fingerprint::GuideKey, providers::ai::Usage};
use async_trait::async_trait;
use chrono::Utc;
use core_access::Caller;
use dyn_clone::DynClone;
use std::fmt::Debug;
use tracing::info;
use turso::{params, Database, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub content_id: Option<String>,
    pub key: GuideKey,
    pub caller: Caller,
    pub usage: Usage,
    pub tokens_charged: u64,
    pub duration_ms: u64,
}

#[async_trait]
pub trait UsageSink: Send + Sync + Debug + DynClone {
    async fn record(&self, record: &UsageRecord) -> Result<(), GuideError>;
}

dyn_clone::clone_trait_object!(UsageSink);

/// Writes one `generation_usage` row per generation.
#[derive(Clone)]
pub struct SqliteUsageSink {
    db: Database,
}

impl Debug for SqliteUsageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUsageSink").finish_non_exhaustive()
    }
}

impl SqliteUsageSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageSink for SqliteUsageSink {
    async fn record(&self, record: &UsageRecord) -> Result<(), GuideError> {
        let conn = self.db.connect()?;
        let params: Vec<Value> = vec![
            Value::Text(Uuid::new_v4().to_string()),
            record
                .content_id
                .clone()
                .map(Value::Text)
                .unwrap_or(Value::Null),
            Value::Text(record.key.fingerprint.clone()),
            Value::Text(record.key.mode.as_str().to_string()),
            Value::Text(record.key.language.clone()),
            Value::Text(record.caller.kind().as_str().to_string()),
            Value::Text(record.caller.id().to_string()),
            Value::Text(record.usage.provider.clone()),
            record.usage.model.clone().map(Value::Text).unwrap_or(Value::Null),
            Value::Integer(record.usage.prompt_tokens as i64),
            Value::Integer(record.usage.completion_tokens as i64),
            Value::Real(record.usage.cost_usd),
            Value::Integer(record.duration_ms as i64),
            Value::Integer(record.tokens_charged as i64),
            Value::Text(Utc::now().to_rfc3339()),
        ];
        conn.execute(
            "INSERT INTO generation_usage
                (id, content_id, fingerprint, mode, language, caller_type, caller_id, provider,
                 model, prompt_tokens, completion_tokens, cost_usd, duration_ms, tokens_charged,
                 created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params,
        )
        .await?;
        Ok(())
    }
}

/// Emits usage as a structured log line only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: &UsageRecord) -> Result<(), GuideError> {
        info!(
            content_id = ?record.content_id,
            key = %record.key.short(),
            caller = %record.caller,
            provider = %record.usage.provider,
            prompt_tokens = record.usage.prompt_tokens,
            completion_tokens = record.usage.completion_tokens,
            cost_usd = record.usage.cost_usd,
            duration_ms = record.duration_ms,
            tokens_charged = record.tokens_charged,
            "Generation usage."
        );
        Ok(())
    }
}

/// Total usage rows for a fingerprint.
pub async fn usage_count(db: &Database, fingerprint: &str) -> Result<u64, GuideError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM generation_usage WHERE fingerprint = ?",
            params![fingerprint.to_string()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(crate::store::integer(&row, 0)? as u64),
        None => Ok(0),
    }
}
