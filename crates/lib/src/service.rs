//! # Guide Service
//!
//! The entry point for a guide request. Each request runs in its own detached task and
//! reports progress through a channel; dropping the receiver stops delivery but never
//! the work, so a disconnected client's guide is still committed for the next request.

use crate::{
    billing::TokenLedger,
    constants::{
        DEFAULT_POLL_CEILING, DEFAULT_POLL_INTERVAL, DEFAULT_STALE_AFTER, EVENT_CHANNEL_CAPACITY,
    },
    errors::GuideError,
    events::{CompleteEvent, EventSink, GuideEvent, InitEvent, InitStatus},
    fingerprint::GuideKey,
    generation::{Claim, GenerationCoordinator},
    poller::{PollOutcome, Poller},
    pricing::Pricing,
    providers::ai::AiProvider,
    resolver::{Access, CacheResolver, CreatorlessPolicy, FreeForAll, Resolution},
    store::{ContentRecord, ContentStore, InFlightRegistry},
    types::GuideRequest,
    usage::{TracingUsageSink, UsageSink},
    validation::InputValidator,
};
use core_access::Caller;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};
use turso::Database;

/// How many times a request re-claims after the attempt it watched was abandoned.
const MAX_CLAIM_ROUNDS: usize = 3;

#[derive(Debug)]
pub struct GuideService {
    validator: InputValidator,
    resolver: CacheResolver,
    coordinator: GenerationCoordinator,
    poller: Poller,
}

impl GuideService {
    pub fn builder(db: Database, ledger: Box<dyn TokenLedger>) -> GuideServiceBuilder {
        GuideServiceBuilder {
            db,
            ledger,
            providers: Vec::new(),
            pricing: Pricing::default(),
            policy: Box::new(FreeForAll),
            usage: Box::new(TracingUsageSink),
            validator: None,
            stale_after: DEFAULT_STALE_AFTER,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_ceiling: DEFAULT_POLL_CEILING,
        }
    }

    pub fn coordinator(&self) -> &GenerationCoordinator {
        &self.coordinator
    }

    /// Starts a request in the background and returns its event stream.
    pub fn start(self: &Arc<Self>, request: GuideRequest, caller: Caller) -> mpsc::Receiver<GuideEvent> {
        let (sink, rx) = EventSink::channel(EVENT_CHANNEL_CAPACITY);
        let service = Arc::clone(self);
        let span = tracing::info_span!("guide_request", %caller, input_type = %request.input_type, mode = %request.mode);
        tokio::spawn(async move { service.handle(request, caller, &sink).await }.instrument(span));
        rx
    }

    /// Runs a request to its single terminal event.
    pub async fn handle(&self, request: GuideRequest, caller: Caller, sink: &EventSink) {
        match self.process(request, &caller, sink).await {
            Ok(complete) => sink.emit(GuideEvent::Complete(complete)).await,
            Err(e) => {
                if e.retryable() {
                    warn!(code = %e.code(), "Guide request failed: {e}");
                } else {
                    info!(code = %e.code(), "Guide request rejected: {e}");
                }
                sink.error(&e).await;
            }
        }
    }

    async fn process(
        &self,
        request: GuideRequest,
        caller: &Caller,
        sink: &EventSink,
    ) -> Result<CompleteEvent, GuideError> {
        let request = self.validator.validate(request)?;
        let key = GuideKey::for_request(&request);
        let total = request.mode.sections().len();

        if let Resolution::Hit { record, access } = self.resolver.resolve(&key, caller).await? {
            return Ok(replay(record, access, sink).await);
        }

        let mut announced = false;
        for round in 0..MAX_CLAIM_ROUNDS {
            match self.coordinator.claim(&key, caller).await? {
                Claim::Cached(record) => {
                    let access = self.resolver.attach(&record, caller).await?;
                    return Ok(replay(record, access, sink).await);
                }
                Claim::Generate(attempt) => {
                    if !announced {
                        announce(sink, total).await;
                    }
                    let outcome = self.coordinator.run(&attempt, &request, caller, sink).await?;
                    return Ok(CompleteEvent {
                        content_id: outcome.content.id,
                        tokens_consumed: outcome.tokens_consumed,
                        from_cache: false,
                    });
                }
                Claim::Poll(attempt) => {
                    if !announced {
                        announce(sink, total).await;
                        announced = true;
                    }
                    debug!(attempt_id = %attempt.id, round, "Polling attempt owned by {}", attempt.owner);
                    match self.poller.poll_until_done(&attempt.id, sink).await? {
                        PollOutcome::Completed(record) => {
                            let access = self.resolver.attach(&record, caller).await?;
                            return Ok(CompleteEvent {
                                content_id: record.id,
                                tokens_consumed: access.tokens_consumed(),
                                from_cache: true,
                            });
                        }
                        PollOutcome::Abandoned => continue,
                    }
                }
            }
        }

        Err(GuideError::Timeout(
            "Generation kept being abandoned by other requests".into(),
        ))
    }
}

async fn announce(sink: &EventSink, total: usize) {
    sink.emit(GuideEvent::Init(InitEvent {
        status: InitStatus::Started,
        estimated_sections: total,
    }))
    .await;
}

/// Streams a cached guide with the same events a live generation produces.
async fn replay(record: ContentRecord, access: Access, sink: &EventSink) -> CompleteEvent {
    let order = record.key.mode.sections();
    sink.emit(GuideEvent::Init(InitEvent {
        status: InitStatus::CacheHit,
        estimated_sections: order.len(),
    }))
    .await;
    for (index, kind) in order.iter().enumerate() {
        if let Some(content) = record.sections.get(*kind) {
            sink.section(*kind, content.clone(), index, order.len()).await;
        }
    }
    CompleteEvent {
        content_id: record.id,
        tokens_consumed: access.tokens_consumed(),
        from_cache: true,
    }
}

pub struct GuideServiceBuilder {
    db: Database,
    ledger: Box<dyn TokenLedger>,
    providers: Vec<Box<dyn AiProvider>>,
    pricing: Pricing,
    policy: Box<dyn CreatorlessPolicy>,
    usage: Box<dyn UsageSink>,
    validator: Option<InputValidator>,
    stale_after: Duration,
    poll_interval: Duration,
    poll_ceiling: Duration,
}

impl GuideServiceBuilder {
    /// Appends a provider to the fallback chain, in priority order.
    pub fn provider(mut self, provider: Box<dyn AiProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: Vec<Box<dyn AiProvider>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn creatorless_policy(mut self, policy: Box<dyn CreatorlessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn usage_sink(mut self, usage: Box<dyn UsageSink>) -> Self {
        self.usage = usage;
        self
    }

    pub fn validator(mut self, validator: InputValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_ceiling(mut self, ceiling: Duration) -> Self {
        self.poll_ceiling = ceiling;
        self
    }

    pub fn build(self) -> Result<GuideService, GuideError> {
        if self.providers.is_empty() {
            return Err(GuideError::Generation(
                "At least one AI provider is required".into(),
            ));
        }
        let validator = match self.validator {
            Some(v) => v,
            None => InputValidator::with_defaults()
                .map_err(|e| GuideError::Validation(format!("Invalid validator pattern: {e}")))?,
        };
        let resolver = CacheResolver::new(
            self.db.clone(),
            self.ledger.clone(),
            self.pricing.clone(),
            self.policy,
        );
        let coordinator = GenerationCoordinator::new(
            self.db.clone(),
            self.providers,
            self.ledger,
            self.pricing,
            self.usage,
            self.stale_after,
        );
        let poller = Poller::new(
            InFlightRegistry::new(self.db.clone()),
            ContentStore::new(self.db),
            self.poll_interval,
            self.poll_ceiling,
            self.stale_after,
        );
        Ok(GuideService {
            validator,
            resolver,
            coordinator,
            poller,
        })
    }
}
