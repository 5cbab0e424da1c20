use anyhow::Result;
use async_trait::async_trait;
use devotio::errors::PromptError;
use devotio::generation::{plan_for, FieldShape, PassPlan};
use devotio::providers::ai::{AiProvider, ChunkStream, StreamChunk, Usage};
use devotio::types::GenerationMode;
use futures::stream;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use turso::Database;

// --- Test Setup ---

/// A helper struct to manage database creation for each test.
pub struct TestSetup {
    pub db: Database,
}

impl TestSetup {
    /// Creates a new, isolated in-memory database and initializes the schema.
    pub async fn new() -> Result<Self> {
        let db = turso::Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        for statement in devotio::providers::db::sqlite::sql::ALL_TABLE_CREATION_SQL {
            conn.execute(statement, ()).await?;
        }

        Ok(Self { db })
    }

    /// Moves an attempt's heartbeat into the past so it reads as stale.
    pub async fn backdate_heartbeat(&self, attempt_id: &str, by_ms: i64) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE guide_inflight SET last_heartbeat = last_heartbeat - ? WHERE id = ?",
            turso::params![by_ms, attempt_id.to_string()],
        )
        .await?;
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| anyhow::anyhow!("COUNT returned no row"))?;
        Ok(row.get::<i64>(0)?)
    }
}

// --- Mock AI Provider ---

/// What the mock does for one `stream_generate` call.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Streams the chunks, then a usage report.
    Chunks(Vec<String>),
    /// Rejects the request under the safety filter before streaming.
    ContentFiltered,
    /// Streams the chunks, then fails with a safety-filter error.
    FilteredAfter(Vec<String>),
    /// Fails the call with a plain API error.
    Fail(String),
}

/// A scripted streaming provider.
///
/// Replies are consumed in call order. A gated mock stops after `hold_after` chunks of
/// every stream until [`MockAiProvider::release`] is called, which lets a test observe
/// a generation while it is in flight.
#[derive(Clone, Debug)]
pub struct MockAiProvider {
    name: String,
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    gate: Option<(usize, Arc<Notify>)>,
    started: Arc<Notify>,
}

impl MockAiProvider {
    pub fn new(name: &str, replies: Vec<MockReply>) -> Self {
        Self {
            name: name.to_string(),
            replies: Arc::new(Mutex::new(replies.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
            gate: None,
            started: Arc::new(Notify::new()),
        }
    }

    /// A mock that answers every pass of `mode` with a complete guide.
    pub fn for_mode(name: &str, mode: GenerationMode) -> Self {
        Self::new(name, guide_replies(mode, 24))
    }

    pub fn gated(mut self, hold_after: usize) -> Self {
        self.gate = Some((hold_after, Arc::new(Notify::new())));
        self
    }

    /// Lets one held stream continue.
    pub fn release(&self) {
        if let Some((_, gate)) = &self.gate {
            gate.notify_one();
        }
    }

    /// Resolves once a stream has been requested.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Retrieves the recorded calls for assertion.
    pub fn get_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChunkStream, PromptError> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        self.started.notify_one();

        let reply = self.replies.lock().unwrap().pop_front();
        let mut items: VecDeque<Result<StreamChunk, PromptError>> = VecDeque::new();
        match reply {
            None => {
                return Err(PromptError::AiApi(format!(
                    "MockAiProvider '{}': no reply scripted",
                    self.name
                )))
            }
            Some(MockReply::Fail(message)) => return Err(PromptError::AiApi(message)),
            Some(MockReply::ContentFiltered) => {
                return Err(PromptError::ContentFiltered("blocked by mock".into()))
            }
            Some(MockReply::Chunks(chunks)) => {
                let completion = chunks.iter().map(String::len).sum::<usize>() as u64;
                items.extend(chunks.into_iter().map(|c| Ok(StreamChunk::Text(c))));
                items.push_back(Ok(StreamChunk::Usage(Usage {
                    provider: self.name.clone(),
                    model: Some("mock".into()),
                    prompt_tokens: (system_prompt.len() + user_prompt.len()) as u64,
                    completion_tokens: completion,
                    cost_usd: 0.0,
                })));
            }
            Some(MockReply::FilteredAfter(chunks)) => {
                items.extend(chunks.into_iter().map(|c| Ok(StreamChunk::Text(c))));
                items.push_back(Err(PromptError::ContentFiltered(
                    "blocked mid-stream by mock".into(),
                )));
            }
        }

        let gate = self.gate.clone();
        let stream = stream::unfold((items, gate, 0usize), |(mut items, gate, sent)| async move {
            if let Some((hold_after, notify)) = &gate {
                if sent == *hold_after {
                    notify.notified().await;
                }
            }
            let item = items.pop_front()?;
            Some((item, (items, gate, sent + 1)))
        });
        Ok(Box::pin(stream))
    }
}

// --- Canned responses ---

/// A complete JSON object for the fields of one pass.
pub fn guide_json(plan: &PassPlan) -> String {
    let mut object = Map::new();
    for spec in &plan.fields {
        let value = match spec.shape {
            FieldShape::Text => json!(format!("{} text.", spec.name)),
            FieldShape::List => json!([format!("{} one", spec.name), format!("{} two", spec.name)]),
            FieldShape::Object => json!({ "note": spec.name }),
        };
        object.insert(spec.name.to_string(), value);
    }
    Value::Object(object).to_string()
}

/// Splits text into chunks of at most `size` characters.
pub fn chunked(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// One streamed reply per pass of `mode`.
pub fn guide_replies(mode: GenerationMode, chunk_size: usize) -> Vec<MockReply> {
    plan_for(mode)
        .iter()
        .map(|plan| MockReply::Chunks(chunked(&guide_json(plan), chunk_size)))
        .collect()
}
