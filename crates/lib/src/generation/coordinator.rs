//! # Generation Coordinator
//!
//! Owns a claimed attempt from the token charge to the committed guide:
//!
//! 1. charge the generation cost (unlimited plans pay nothing),
//! 2. run each pass against the provider chain, emitting sections as fields close and
//!    checkpointing partial results into the registry,
//! 3. commit the guide, mark the attempt completed, then record the caller's ownership.
//!
//! Any failure marks the attempt failed. Only a safety-filter rejection is retried,
//! once per attempt, against the next provider in the chain.

use super::{
    assembler::SectionAssembler,
    plan::{plan_for, PassPlan},
};
use crate::{
    billing::{ChargeMetadata, ChargeReason, TokenLedger},
    errors::{ErrorCode, GuideError, PromptError},
    events::EventSink,
    fingerprint::GuideKey,
    parser::{parse_lenient, FieldStreamParser},
    pricing::Pricing,
    prompts::build_prompts,
    providers::ai::{AiProvider, StreamChunk, Usage},
    store::{
        ClaimOutcome, ContentRecord, ContentStore, Finalization, InFlightRecord, InFlightRegistry,
        NewContent,
    },
    types::{GuideRequest, SectionKind},
    usage::{UsageRecord, UsageSink},
};
use chrono::Utc;
use core_access::{ensure_ownership, Caller};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use turso::Database;

const CLAIM_ROUNDS: usize = 3;

/// What a caller should do for a key that is not cached.
#[derive(Debug, Clone)]
pub enum Claim {
    /// The caller owns this running attempt and must generate.
    Generate(InFlightRecord),
    /// Someone else is generating; watch this attempt.
    Poll(InFlightRecord),
    /// The guide was committed while the caller was claiming.
    Cached(ContentRecord),
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub content: ContentRecord,
    pub tokens_consumed: u64,
}

#[derive(Debug, Clone)]
pub struct GenerationCoordinator {
    db: Database,
    registry: InFlightRegistry,
    contents: ContentStore,
    providers: Vec<Box<dyn AiProvider>>,
    ledger: Box<dyn TokenLedger>,
    pricing: Pricing,
    usage: Box<dyn UsageSink>,
    stale_after: Duration,
}

impl GenerationCoordinator {
    pub fn new(
        db: Database,
        providers: Vec<Box<dyn AiProvider>>,
        ledger: Box<dyn TokenLedger>,
        pricing: Pricing,
        usage: Box<dyn UsageSink>,
        stale_after: Duration,
    ) -> Self {
        Self {
            registry: InFlightRegistry::new(db.clone()),
            contents: ContentStore::new(db.clone()),
            db,
            providers,
            ledger,
            pricing,
            usage,
            stale_after,
        }
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Decides who generates the key. Stale attempts are evicted on the way.
    pub async fn claim(&self, key: &GuideKey, caller: &Caller) -> Result<Claim, GuideError> {
        for _ in 0..CLAIM_ROUNDS {
            if let Some(existing) = self.registry.find_running(key).await? {
                if !existing.is_stale(Utc::now(), self.stale_after) {
                    return Ok(Claim::Poll(existing));
                }
                self.registry.evict_stale(&existing).await?;
            }

            match self.registry.create(key, caller).await? {
                ClaimOutcome::Claimed(attempt) => {
                    // A commit may have landed between the cache lookup and the claim.
                    if let Some(record) = self.contents.find(key).await? {
                        debug!(content_id = %record.id, "Guide appeared while claiming.");
                        self.registry
                            .finalize(
                                &attempt.id,
                                Finalization::Completed {
                                    content_id: record.id.clone(),
                                },
                            )
                            .await?;
                        return Ok(Claim::Cached(record));
                    }
                    return Ok(Claim::Generate(attempt));
                }
                ClaimOutcome::Contended(existing) => {
                    if !existing.is_stale(Utc::now(), self.stale_after) {
                        return Ok(Claim::Poll(existing));
                    }
                    self.registry.evict_stale(&existing).await?;
                }
            }
        }
        Err(GuideError::Storage(format!(
            "Could not settle ownership of key {}",
            key.short()
        )))
    }

    /// Runs a claimed attempt to completion. The attempt is always left terminal.
    pub async fn run(
        &self,
        attempt: &InFlightRecord,
        request: &GuideRequest,
        caller: &Caller,
        sink: &EventSink,
    ) -> Result<GenerationOutcome, GuideError> {
        match self.generate(attempt, request, caller, sink).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                match e.code() {
                    ErrorCode::BillingInsufficient
                    | ErrorCode::Validation
                    | ErrorCode::SecurityViolation => {
                        info!(attempt_id = %attempt.id, code = %e.code(), "Generation refused: {e}")
                    }
                    _ => error!(attempt_id = %attempt.id, code = %e.code(), "Generation failed: {e}"),
                }
                let failed = Finalization::Failed {
                    code: e.code(),
                    message: e.to_string(),
                };
                if let Err(finalize_err) = self.registry.finalize(&attempt.id, failed).await {
                    warn!(attempt_id = %attempt.id, "Could not mark attempt failed: {finalize_err}");
                }
                Err(e)
            }
        }
    }

    async fn generate(
        &self,
        attempt: &InFlightRecord,
        request: &GuideRequest,
        caller: &Caller,
        sink: &EventSink,
    ) -> Result<GenerationOutcome, GuideError> {
        let started = Instant::now();
        let key = &attempt.key;

        if self.providers.is_empty() {
            return Err(PromptError::MissingAiProvider("empty provider chain".into()).into());
        }

        let amount = self.pricing.generation_cost(request.mode, &key.language);
        let metadata = ChargeMetadata {
            reason: ChargeReason::Generation,
            fingerprint: key.fingerprint.clone(),
            mode: key.mode.to_string(),
            language: key.language.clone(),
        };
        let receipt = self.ledger.charge(caller, amount, &metadata).await?;

        let plans = plan_for(request.mode);
        let passes = plans.len();
        let mut assembler = SectionAssembler::new(request.mode, plans.clone());
        let mut provider_index = 0;
        let mut fallback_used = false;
        let mut usage = Usage::default();

        for (pass, plan) in plans.iter().enumerate() {
            loop {
                let provider = &self.providers[provider_index];
                let result = self
                    .run_pass(provider.as_ref(), attempt, request, plan, pass, passes, &mut assembler, sink)
                    .await;
                match result {
                    Ok(pass_usage) => {
                        if let Some(u) = pass_usage {
                            usage.merge(&u);
                        }
                        break;
                    }
                    Err(e)
                        if e.is_content_filter()
                            && !fallback_used
                            && provider_index + 1 < self.providers.len() =>
                    {
                        warn!(
                            attempt_id = %attempt.id,
                            pass,
                            from = provider.name(),
                            to = self.providers[provider_index + 1].name(),
                            "Content filtered, falling back to next provider."
                        );
                        // Later passes stay on the fallback provider.
                        provider_index += 1;
                        fallback_used = true;
                        assembler.discard_pass(pass);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let ready = assembler.finish_pass(pass);
            self.emit_ready(&assembler, ready, sink).await;
            self.registry
                .checkpoint(&attempt.id, &assembler.sections())
                .await?;
            debug!(attempt_id = %attempt.id, pass = pass + 1, passes, "Pass finished.");
        }

        let missing = assembler.missing();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(SectionKind::as_str).collect();
            return Err(GuideError::Generation(format!(
                "Model response is missing sections: {}",
                names.join(", ")
            )));
        }

        let committed = self
            .contents
            .find_or_create(NewContent::new(
                key.clone(),
                &request.input,
                assembler.sections(),
                Some(caller.clone()),
            ))
            .await?
            .into_record();

        // Past this point the guide exists; nothing below may fail the request.
        let completed = Finalization::Completed {
            content_id: committed.id.clone(),
        };
        if let Err(e) = self.registry.finalize(&attempt.id, completed).await {
            warn!(attempt_id = %attempt.id, "Could not mark attempt completed: {e}");
        }
        // The record names this caller as creator, so a missing row is restored on
        // their next request.
        if let Err(e) = ensure_ownership(&self.db, &committed.id, caller).await {
            warn!(content_id = %committed.id, %caller, "Could not record ownership: {e}");
        }

        let record = UsageRecord {
            content_id: Some(committed.id.clone()),
            key: key.clone(),
            caller: caller.clone(),
            usage,
            tokens_charged: receipt.charged,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.usage.record(&record).await {
            warn!(content_id = %committed.id, "Failed to record usage: {e}");
        }

        info!(
            content_id = %committed.id,
            attempt_id = %attempt.id,
            tokens = receipt.charged,
            elapsed_ms = record.duration_ms,
            "Guide generated."
        );
        Ok(GenerationOutcome {
            content: committed,
            tokens_consumed: receipt.charged,
        })
    }

    /// Streams one pass from one provider. Provider errors come back untouched so the
    /// caller can decide on fallback.
    #[allow(clippy::too_many_arguments)]
    async fn run_pass(
        &self,
        provider: &dyn AiProvider,
        attempt: &InFlightRecord,
        request: &GuideRequest,
        plan: &PassPlan,
        pass: usize,
        passes: usize,
        assembler: &mut SectionAssembler,
        sink: &EventSink,
    ) -> Result<Option<Usage>, PassError> {
        let (system_prompt, user_prompt) = build_prompts(request, plan, pass, passes);
        debug!(provider = provider.name(), pass = pass + 1, "--> Starting pass");

        let mut stream = provider.stream_generate(&system_prompt, &user_prompt).await?;
        let mut parser = FieldStreamParser::new();
        let mut usage = None;
        let mut chunks = 0usize;

        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Text(text) => {
                    chunks += 1;
                    let fields = parser.push(&text);
                    if fields.is_empty() {
                        continue;
                    }
                    for field in fields {
                        let ready = assembler.accept(pass, field);
                        self.emit_ready(assembler, ready, sink).await;
                    }
                    self.registry
                        .checkpoint(&attempt.id, &assembler.sections())
                        .await?;
                }
                StreamChunk::Usage(u) => usage = Some(u),
            }
        }
        debug!(provider = provider.name(), pass = pass + 1, chunks, "<-- Stream ended");

        if let Some(parsed) = parse_lenient(parser.raw_text()) {
            let ready = assembler.absorb(pass, parsed);
            self.emit_ready(assembler, ready, sink).await;
        }
        Ok(usage)
    }

    async fn emit_ready(&self, assembler: &SectionAssembler, ready: Vec<SectionKind>, sink: &EventSink) {
        let order = assembler.mode().sections();
        for kind in ready {
            if let (Some(content), Some(index)) =
                (assembler.section(kind), order.iter().position(|k| *k == kind))
            {
                sink.section(kind, content, index, order.len()).await;
            }
        }
    }
}

/// A pass either failed at the provider (maybe retryable) or in storage (never).
#[derive(Debug)]
enum PassError {
    Provider(PromptError),
    Guide(GuideError),
}

impl PassError {
    fn is_content_filter(&self) -> bool {
        matches!(self, PassError::Provider(e) if e.is_content_filter())
    }
}

impl From<PromptError> for PassError {
    fn from(err: PromptError) -> Self {
        PassError::Provider(err)
    }
}

impl From<GuideError> for PassError {
    fn from(err: GuideError) -> Self {
        PassError::Guide(err)
    }
}

impl From<PassError> for GuideError {
    fn from(err: PassError) -> Self {
        match err {
            PassError::Provider(e) => e.into(),
            PassError::Guide(e) => e,
        }
    }
}
