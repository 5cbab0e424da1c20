//! # Devotio
//!
//! Deduplicated study-guide generation. A guide is identified by a fingerprint of its
//! normalized request; the first caller to ask for it generates it once, concurrent
//! callers watch that generation, and later callers are served from the content store
//! under the cache access rules.
//!
//! The usual entry point is [`GuideService`], which validates a request, resolves it
//! against the cache, and otherwise coordinates generation, emitting [`GuideEvent`]s.

pub mod billing;
pub mod constants;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod generation;
pub mod parser;
pub mod poller;
pub mod pricing;
pub mod prompts;
pub mod providers;
pub mod resolver;
pub mod service;
pub mod store;
pub mod types;
pub mod usage;
pub mod validation;

pub use billing::{Account, BillingError, Plan, SqliteTokenLedger, TokenLedger};
pub use errors::{ErrorCode, GuideError, PromptError};
pub use events::{EventSink, GuideEvent};
pub use fingerprint::GuideKey;
pub use pricing::Pricing;
pub use providers::ai::{AiProvider, GeminiProvider, LocalAiProvider};
pub use providers::db::sqlite::SqliteProvider;
pub use resolver::{BillEveryone, CreatorlessPolicy, FreeForAll};
pub use service::{GuideService, GuideServiceBuilder};
pub use store::{ContentRecord, ContentStore};
pub use types::{GenerationMode, GuideRequest, GuideSections, InputType, SectionKind};
pub use usage::{SqliteUsageSink, TracingUsageSink, UsageSink};
pub use validation::InputValidator;
