//! # Progress Events
//!
//! The four events a guide request produces. Generators and pollers emit the same
//! shapes, so a client cannot tell a live generation from a replay.

use crate::errors::{ErrorCode, GuideError};
use crate::types::SectionKind;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    Started,
    CacheHit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitEvent {
    pub status: InitStatus,
    pub estimated_sections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionEvent {
    #[serde(rename = "type")]
    pub kind: SectionKind,
    pub content: Value,
    /// Zero-based position in the mode's logical order.
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteEvent {
    pub content_id: String,
    pub tokens_consumed: u64,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl From<&GuideError> for ErrorEvent {
    fn from(err: &GuideError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuideEvent {
    Init(InitEvent),
    Section(SectionEvent),
    Complete(CompleteEvent),
    Error(ErrorEvent),
}

impl GuideEvent {
    /// The SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            GuideEvent::Init(_) => "init",
            GuideEvent::Section(_) => "section",
            GuideEvent::Complete(_) => "complete",
            GuideEvent::Error(_) => "error",
        }
    }

    /// The SSE data payload.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            GuideEvent::Init(e) => serde_json::to_string(e),
            GuideEvent::Section(e) => serde_json::to_string(e),
            GuideEvent::Complete(e) => serde_json::to_string(e),
            GuideEvent::Error(e) => serde_json::to_string(e),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GuideEvent::Complete(_) | GuideEvent::Error(_))
    }
}

/// Sends events to whoever is listening. A listener that went away is not an error:
/// the work continues and only the delivery stops.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<GuideEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<GuideEvent>) -> Self {
        Self { tx }
    }

    /// A sink with a fresh channel of the given capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GuideEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: GuideEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Event listener disconnected, continuing without it.");
        }
    }

    pub async fn section(&self, kind: SectionKind, content: Value, index: usize, total: usize) {
        self.emit(GuideEvent::Section(SectionEvent {
            kind,
            content,
            index,
            total,
        }))
        .await;
    }

    pub async fn error(&self, err: &GuideError) {
        self.emit(GuideEvent::Error(err.into())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        let section = GuideEvent::Section(SectionEvent {
            kind: SectionKind::RelatedVerses,
            content: json!(["John 1:1"]),
            index: 3,
            total: 6,
        });
        assert_eq!(section.name(), "section");
        let data: Value = serde_json::from_str(&section.data().unwrap()).unwrap();
        assert_eq!(
            data,
            json!({"type": "related_verses", "content": ["John 1:1"], "index": 3, "total": 6})
        );

        let init = GuideEvent::Init(InitEvent {
            status: InitStatus::CacheHit,
            estimated_sections: 6,
        });
        assert_eq!(init.data().unwrap(), r#"{"status":"cache_hit","estimated_sections":6}"#);
    }

    #[test]
    fn test_error_event_from_guide_error() {
        let event = ErrorEvent::from(&GuideError::Timeout("poll ceiling".into()));
        assert_eq!(event.code, ErrorCode::Timeout);
        assert!(event.retryable);
        let data: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(data["code"], json!("TIMEOUT"));
    }

    #[tokio::test]
    async fn test_sink_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        sink.error(&GuideError::Generation("x".into())).await;
    }
}
