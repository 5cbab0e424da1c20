//! # Cache Resolver
//!
//! Decides what a cached guide costs the caller and attaches it to their library.
//! Billing always happens before the record is handed out, so a failed charge never
//! discloses content or creates ownership.

use crate::{
    billing::{ChargeMetadata, ChargeReason, ChargeReceipt, TokenLedger},
    errors::GuideError,
    fingerprint::GuideKey,
    pricing::Pricing,
    store::{ContentRecord, ContentStore},
};
use core_access::{ensure_ownership, find_ownership, Caller};
use dyn_clone::DynClone;
use std::fmt::Debug;
use tracing::{debug, info};
use turso::Database;

/// Who pays for guides written before creators were tracked.
pub trait CreatorlessPolicy: Send + Sync + Debug + DynClone {
    fn grants_free_access(&self, record: &ContentRecord, caller: &Caller) -> bool;
}

dyn_clone::clone_trait_object!(CreatorlessPolicy);

/// Legacy guides are free for everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeForAll;

impl CreatorlessPolicy for FreeForAll {
    fn grants_free_access(&self, _record: &ContentRecord, _caller: &Caller) -> bool {
        true
    }
}

/// Legacy guides are billed like any other non-creator access.
#[derive(Debug, Clone, Copy, Default)]
pub struct BillEveryone;

impl CreatorlessPolicy for BillEveryone {
    fn grants_free_access(&self, _record: &ContentRecord, _caller: &Caller) -> bool {
        false
    }
}

/// Why the caller may read a cached guide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Creator,
    /// No creator recorded and the policy waived the charge.
    Legacy,
    /// The caller already holds the guide in their library.
    Owned,
    Purchased(ChargeReceipt),
}

impl Access {
    pub fn tokens_consumed(&self) -> u64 {
        match self {
            Access::Purchased(receipt) => receipt.charged,
            Access::Creator | Access::Legacy | Access::Owned => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Hit { record: ContentRecord, access: Access },
    Miss { key: GuideKey },
}

#[derive(Debug, Clone)]
pub struct CacheResolver {
    db: Database,
    contents: ContentStore,
    ledger: Box<dyn TokenLedger>,
    pricing: Pricing,
    policy: Box<dyn CreatorlessPolicy>,
}

impl CacheResolver {
    pub fn new(
        db: Database,
        ledger: Box<dyn TokenLedger>,
        pricing: Pricing,
        policy: Box<dyn CreatorlessPolicy>,
    ) -> Self {
        Self {
            contents: ContentStore::new(db.clone()),
            db,
            ledger,
            pricing,
            policy,
        }
    }

    pub async fn resolve(&self, key: &GuideKey, caller: &Caller) -> Result<Resolution, GuideError> {
        match self.contents.find(key).await? {
            Some(record) => {
                let access = self.attach(&record, caller).await?;
                Ok(Resolution::Hit { record, access })
            }
            None => {
                debug!(key = %key.short(), "Cache miss.");
                Ok(Resolution::Miss { key: key.clone() })
            }
        }
    }

    /// Bills the caller if needed, then ensures they own the guide.
    pub async fn attach(&self, record: &ContentRecord, caller: &Caller) -> Result<Access, GuideError> {
        let access = if record.is_created_by(caller) {
            Access::Creator
        } else if record.creator.is_none() && self.policy.grants_free_access(record, caller) {
            Access::Legacy
        } else if find_ownership(&self.db, &record.id, caller).await?.is_some() {
            Access::Owned
        } else {
            let amount = self.pricing.access_cost(record.key.mode, &record.key.language);
            let metadata = ChargeMetadata {
                reason: ChargeReason::CacheAccess,
                fingerprint: record.key.fingerprint.clone(),
                mode: record.key.mode.to_string(),
                language: record.key.language.clone(),
            };
            Access::Purchased(self.ledger.charge(caller, amount, &metadata).await?)
        };

        ensure_ownership(&self.db, &record.id, caller).await?;
        info!(content_id = %record.id, %caller, ?access, "Cache hit.");
        Ok(access)
    }
}
