//! # Poller
//!
//! Watches another request's attempt and replays its partial sections. The poller only
//! reads: it never writes the registry or the content store.

use crate::{
    errors::{ErrorCode, GuideError},
    events::EventSink,
    store::{AttemptStatus, ContentRecord, ContentStore, InFlightRegistry},
    types::{GuideSections, SectionKind},
};
use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(ContentRecord),
    /// The attempt went stale or was evicted; the caller should try to claim again.
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct Poller {
    registry: InFlightRegistry,
    contents: ContentStore,
    interval: Duration,
    ceiling: Duration,
    stale_after: Duration,
}

impl Poller {
    pub fn new(
        registry: InFlightRegistry,
        contents: ContentStore,
        interval: Duration,
        ceiling: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            registry,
            contents,
            interval,
            ceiling,
            stale_after,
        }
    }

    /// Polls until the attempt finishes, emitting every new or changed section.
    pub async fn poll_until_done(
        &self,
        attempt_id: &str,
        sink: &EventSink,
    ) -> Result<PollOutcome, GuideError> {
        let deadline = Instant::now() + self.ceiling;
        let mut seen = GuideSections::new();
        let mut polls = 0usize;

        loop {
            polls += 1;
            let Some(attempt) = self.registry.get(attempt_id).await? else {
                return Err(GuideError::Generation(format!(
                    "Generation attempt {attempt_id} disappeared"
                )));
            };
            let order = attempt.key.mode.sections();
            emit_changes(&attempt.sections, &mut seen, &order, sink).await;

            match attempt.status {
                AttemptStatus::Completed => {
                    let content_id = attempt.content_id.ok_or_else(|| {
                        GuideError::Storage(format!("Attempt {attempt_id} completed without content"))
                    })?;
                    let record = self.contents.get(&content_id).await?.ok_or_else(|| {
                        GuideError::Storage(format!("Committed guide {content_id} not found"))
                    })?;
                    emit_changes(&record.sections, &mut seen, &order, sink).await;
                    info!(%attempt_id, %content_id, polls, "Watched attempt completed.");
                    return Ok(PollOutcome::Completed(record));
                }
                AttemptStatus::Failed => {
                    debug!(%attempt_id, code = ?attempt.error_code, "Watched attempt failed.");
                    return match attempt.error_code {
                        // Evicted for silence: someone is probably generating afresh.
                        Some(ErrorCode::Timeout) => Ok(PollOutcome::Abandoned),
                        // The owner was turned away before any model call.
                        Some(
                            ErrorCode::BillingInsufficient
                            | ErrorCode::Validation
                            | ErrorCode::SecurityViolation,
                        ) => Ok(PollOutcome::Abandoned),
                        // The owner's message stays with the owner.
                        Some(ErrorCode::StorageError) => Err(GuideError::Storage(
                            "Shared generation attempt could not be stored".into(),
                        )),
                        _ => Err(GuideError::Generation(
                            "Shared generation attempt failed".into(),
                        )),
                    };
                }
                AttemptStatus::Running => {
                    if attempt.is_stale(Utc::now(), self.stale_after) {
                        debug!(%attempt_id, "Watched attempt went stale.");
                        return Ok(PollOutcome::Abandoned);
                    }
                }
            }

            if Instant::now() + self.interval > deadline {
                return Err(GuideError::Timeout(format!(
                    "Gave up waiting for attempt {attempt_id} after {}s",
                    self.ceiling.as_secs()
                )));
            }
            sleep(self.interval).await;
        }
    }
}

async fn emit_changes(
    current: &GuideSections,
    seen: &mut GuideSections,
    order: &[SectionKind],
    sink: &EventSink,
) {
    for (kind, value) in current.iter() {
        if seen.get(kind) == Some(value) {
            continue;
        }
        let index = order.iter().position(|k| *k == kind).unwrap_or(order.len());
        sink.section(kind, value.clone(), index, order.len()).await;
        seen.insert(kind, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::GuideEvent,
        fingerprint::GuideKey,
        providers::db::sqlite::SqliteProvider,
        store::{ClaimOutcome, Finalization, InFlightRecord, NewContent},
        types::{GuideRequest, InputType},
    };
    use core_access::Caller;
    use serde_json::json;

    struct Fixture {
        registry: InFlightRegistry,
        contents: ContentStore,
    }

    async fn fixture() -> Fixture {
        let provider = SqliteProvider::new(":memory:").await.unwrap();
        provider.initialize_schema().await.unwrap();
        Fixture {
            registry: InFlightRegistry::new(provider.db.clone()),
            contents: ContentStore::new(provider.db),
        }
    }

    impl Fixture {
        fn poller(&self, ceiling: Duration) -> Poller {
            Poller::new(
                self.registry.clone(),
                self.contents.clone(),
                Duration::from_millis(10),
                ceiling,
                Duration::from_secs(300),
            )
        }

        async fn attempt(&self) -> InFlightRecord {
            let key = GuideKey::for_request(&GuideRequest::new("Joy", InputType::Topic));
            match self.registry.create(&key, &Caller::user("owner")).await.unwrap() {
                ClaimOutcome::Claimed(r) => r,
                ClaimOutcome::Contended(_) => panic!("fresh registry"),
            }
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<GuideEvent>) -> Vec<GuideEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_completed_attempt_replays_sections_once() {
        let f = fixture().await;
        let attempt = f.attempt().await;
        let sections: GuideSections = [(SectionKind::Summary, json!("s"))].into_iter().collect();
        f.registry.checkpoint(&attempt.id, &sections).await.unwrap();

        let content = f
            .contents
            .find_or_create(NewContent::new(attempt.key.clone(), "Joy", sections, None))
            .await
            .unwrap()
            .into_record();
        f.registry
            .finalize(&attempt.id, Finalization::Completed { content_id: content.id.clone() })
            .await
            .unwrap();

        let (sink, mut rx) = EventSink::channel(16);
        let outcome = f
            .poller(Duration::from_secs(1))
            .poll_until_done(&attempt.id, &sink)
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Completed(content));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1, "summary is emitted once: {events:?}");
    }

    #[tokio::test]
    async fn test_failed_attempt_surfaces_generic_error() {
        let f = fixture().await;
        let attempt = f.attempt().await;
        f.registry
            .finalize(
                &attempt.id,
                Finalization::Failed {
                    code: ErrorCode::GenerationError,
                    message: "model refused".into(),
                },
            )
            .await
            .unwrap();

        let (sink, _rx) = EventSink::channel(16);
        let err = f
            .poller(Duration::from_secs(1))
            .poll_until_done(&attempt.id, &sink)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GenerationError);
        assert!(!err.to_string().contains("model refused"), "{err}");
    }

    #[tokio::test]
    async fn test_owner_billing_failure_is_abandoned_without_leaking() {
        let f = fixture().await;
        let attempt = f.attempt().await;
        f.registry
            .finalize(
                &attempt.id,
                Finalization::Failed {
                    code: ErrorCode::BillingInsufficient,
                    message: "Insufficient tokens: 5 required, 1 available".into(),
                },
            )
            .await
            .unwrap();

        let (sink, mut rx) = EventSink::channel(16);
        let outcome = f
            .poller(Duration::from_secs(1))
            .poll_until_done(&attempt.id, &sink)
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Abandoned);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_evicted_attempt_is_abandoned() {
        let f = fixture().await;
        let attempt = f.attempt().await;
        f.registry.evict_stale(&attempt).await.unwrap();

        let (sink, _rx) = EventSink::channel(16);
        let outcome = f
            .poller(Duration::from_secs(1))
            .poll_until_done(&attempt.id, &sink)
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Abandoned);
    }

    #[tokio::test]
    async fn test_ceiling_times_out() {
        let f = fixture().await;
        let attempt = f.attempt().await;

        let (sink, _rx) = EventSink::channel(16);
        let err = f
            .poller(Duration::from_millis(50))
            .poll_until_done(&attempt.id, &sink)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_missing_attempt_is_an_error() {
        let f = fixture().await;
        let (sink, _rx) = EventSink::channel(16);
        let err = f
            .poller(Duration::from_secs(1))
            .poll_until_done("nope", &sink)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GenerationError);
    }
}
