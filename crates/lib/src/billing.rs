//! # Token Ledger
//!
//! Callers pay for generations and for reading guides someone else created. The
//! `TokenLedger` trait is the seam to whatever billing backend is in use; the
//! `SqliteTokenLedger` keeps balances in the application database.
//!
//! Unlimited plans never touch their balance: every charge succeeds with zero cost.

use async_trait::async_trait;
use chrono::Utc;
use core_access::{is_unique_violation, Caller};
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, info};
use turso::{params, Connection, Database, Value};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Insufficient tokens: {required} required, {available} available")]
    Insufficient { required: u64, available: u64 },
    #[error("Ledger database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Ledger data integrity error: {0}")]
    DataIntegrity(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Standard,
    Unlimited,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Standard => "standard",
            Plan::Unlimited => "unlimited",
        }
    }

    fn parse(raw: &str) -> Result<Self, BillingError> {
        match raw {
            "free" => Ok(Plan::Free),
            "standard" => Ok(Plan::Standard),
            "unlimited" => Ok(Plan::Unlimited),
            other => Err(BillingError::DataIntegrity(format!("Unknown plan '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeReason {
    Generation,
    CacheAccess,
}

/// What a charge is for. Persisted next to the transaction for auditing.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeMetadata {
    pub reason: ChargeReason,
    pub fingerprint: String,
    pub mode: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeReceipt {
    pub charged: u64,
    /// `None` for unlimited plans.
    pub remaining_balance: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub plan: Plan,
    pub balance: u64,
}

#[async_trait]
pub trait TokenLedger: Send + Sync + Debug + DynClone {
    /// Returns the caller's account, opening one if the caller has never been seen.
    async fn account(&self, caller: &Caller) -> Result<Account, BillingError>;

    /// Charges `amount` tokens, or fails with `BillingError::Insufficient` leaving the
    /// balance untouched.
    async fn charge(
        &self,
        caller: &Caller,
        amount: u64,
        metadata: &ChargeMetadata,
    ) -> Result<ChargeReceipt, BillingError>;
}

dyn_clone::clone_trait_object!(TokenLedger);

/// A ledger stored in the `token_accounts` and `token_transactions` tables.
#[derive(Clone)]
pub struct SqliteTokenLedger {
    db: Database,
    starting_balance: u64,
}

impl Debug for SqliteTokenLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTokenLedger")
            .field("starting_balance", &self.starting_balance)
            .finish_non_exhaustive()
    }
}

impl SqliteTokenLedger {
    /// New accounts are opened on the free plan with `starting_balance` tokens.
    pub fn new(db: Database, starting_balance: u64) -> Self {
        Self {
            db,
            starting_balance,
        }
    }

    async fn read_account(
        conn: &Connection,
        caller: &Caller,
    ) -> Result<Option<Account>, BillingError> {
        let mut rows = conn
            .query(
                "SELECT plan, balance FROM token_accounts WHERE caller_type = ? AND caller_id = ?",
                params![caller.kind().as_str(), caller.id().to_string()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let plan: String = row.get(0)?;
        let balance = match row.get_value(1)? {
            Value::Integer(i) if i >= 0 => i as u64,
            other => {
                return Err(BillingError::DataIntegrity(format!(
                    "Invalid balance {other:?} for {caller}"
                )));
            }
        };
        Ok(Some(Account {
            plan: Plan::parse(&plan)?,
            balance,
        }))
    }

    async fn open_account(conn: &Connection, caller: &Caller, balance: u64) -> Result<(), BillingError> {
        let stored = sql_amount(balance)?;
        let now = Utc::now().to_rfc3339();
        match conn
            .execute(
                "INSERT INTO token_accounts (caller_type, caller_id, plan, balance, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    caller.kind().as_str(),
                    caller.id().to_string(),
                    Plan::Free.as_str(),
                    stored,
                    now.clone(),
                    now
                ],
            )
            .await
        {
            Ok(_) => {
                info!(%caller, balance, "Opened token account.");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(%caller, "Token account opened concurrently.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_account(&self, conn: &Connection, caller: &Caller) -> Result<Account, BillingError> {
        if let Some(account) = Self::read_account(conn, caller).await? {
            return Ok(account);
        }
        Self::open_account(conn, caller, self.starting_balance).await?;
        Self::read_account(conn, caller).await?.ok_or_else(|| {
            BillingError::DataIntegrity(format!("Token account for {caller} vanished after creation"))
        })
    }

    /// Adds tokens to a caller's balance (top-ups, refunds, admin grants).
    pub async fn grant(&self, caller: &Caller, amount: u64) -> Result<Account, BillingError> {
        let amount = sql_amount(amount)?;
        let conn = self.db.connect()?;
        self.ensure_account(&conn, caller).await?;
        conn.execute(
            "UPDATE token_accounts SET balance = balance + ?, updated_at = ?
             WHERE caller_type = ? AND caller_id = ?",
            params![
                amount,
                Utc::now().to_rfc3339(),
                caller.kind().as_str(),
                caller.id().to_string()
            ],
        )
        .await?;
        self.ensure_account(&conn, caller).await
    }

    pub async fn set_plan(&self, caller: &Caller, plan: Plan) -> Result<Account, BillingError> {
        let conn = self.db.connect()?;
        self.ensure_account(&conn, caller).await?;
        conn.execute(
            "UPDATE token_accounts SET plan = ?, updated_at = ?
             WHERE caller_type = ? AND caller_id = ?",
            params![
                plan.as_str(),
                Utc::now().to_rfc3339(),
                caller.kind().as_str(),
                caller.id().to_string()
            ],
        )
        .await?;
        self.ensure_account(&conn, caller).await
    }

    /// Number of recorded charges for a caller.
    pub async fn transaction_count(&self, caller: &Caller) -> Result<u64, BillingError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM token_transactions WHERE caller_type = ? AND caller_id = ?",
                params![caller.kind().as_str(), caller.id().to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => match row.get_value(0)? {
                Value::Integer(n) => Ok(n as u64),
                other => Err(BillingError::DataIntegrity(format!("Bad count {other:?}"))),
            },
            None => Ok(0),
        }
    }
}

/// Token amounts are stored as SQLite integers.
fn sql_amount(amount: u64) -> Result<i64, BillingError> {
    i64::try_from(amount)
        .map_err(|_| BillingError::DataIntegrity(format!("Token amount {amount} is out of range")))
}

#[async_trait]
impl TokenLedger for SqliteTokenLedger {
    async fn account(&self, caller: &Caller) -> Result<Account, BillingError> {
        let conn = self.db.connect()?;
        self.ensure_account(&conn, caller).await
    }

    async fn charge(
        &self,
        caller: &Caller,
        amount: u64,
        metadata: &ChargeMetadata,
    ) -> Result<ChargeReceipt, BillingError> {
        let conn = self.db.connect()?;
        let account = self.ensure_account(&conn, caller).await?;

        if account.plan == Plan::Unlimited {
            debug!(%caller, reason = ?metadata.reason, "Unlimited plan, charge skipped.");
            return Ok(ChargeReceipt {
                charged: 0,
                remaining_balance: None,
            });
        }
        if amount == 0 {
            return Ok(ChargeReceipt {
                charged: 0,
                remaining_balance: Some(account.balance),
            });
        }

        let debit = sql_amount(amount)?;
        // The balance guard in the WHERE clause makes the debit atomic: two concurrent
        // charges can never both spend the same tokens.
        let debited = conn
            .execute(
                "UPDATE token_accounts SET balance = balance - ?, updated_at = ?
                 WHERE caller_type = ? AND caller_id = ? AND balance >= ?",
                params![
                    debit,
                    Utc::now().to_rfc3339(),
                    caller.kind().as_str(),
                    caller.id().to_string(),
                    debit
                ],
            )
            .await?;

        if debited == 0 {
            let available = Self::read_account(&conn, caller)
                .await?
                .map(|a| a.balance)
                .unwrap_or(0);
            return Err(BillingError::Insufficient {
                required: amount,
                available,
            });
        }

        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| BillingError::DataIntegrity(e.to_string()))?;
        conn.execute(
            "INSERT INTO token_transactions (id, caller_type, caller_id, amount, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                caller.kind().as_str(),
                caller.id().to_string(),
                debit,
                metadata_json,
                Utc::now().to_rfc3339()
            ],
        )
        .await?;

        let remaining = Self::read_account(&conn, caller).await?.map(|a| a.balance);
        info!(%caller, amount, ?remaining, reason = ?metadata.reason, "Charged tokens.");
        Ok(ChargeReceipt {
            charged: amount,
            remaining_balance: remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::db::sqlite::SqliteProvider;

    fn metadata() -> ChargeMetadata {
        ChargeMetadata {
            reason: ChargeReason::Generation,
            fingerprint: "f".repeat(64),
            mode: "standard".into(),
            language: "en".into(),
        }
    }

    async fn ledger(starting_balance: u64) -> SqliteTokenLedger {
        let provider = SqliteProvider::new(":memory:").await.unwrap();
        provider.initialize_schema().await.unwrap();
        SqliteTokenLedger::new(provider.db, starting_balance)
    }

    #[tokio::test]
    async fn test_charge_debits_balance_and_records_transaction() {
        let ledger = ledger(30).await;
        let caller = Caller::user("u-1");

        let receipt = ledger.charge(&caller, 10, &metadata()).await.unwrap();
        assert_eq!(receipt.charged, 10);
        assert_eq!(receipt.remaining_balance, Some(20));
        assert_eq!(ledger.transaction_count(&caller).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_amounts_are_rejected() {
        let ledger = ledger(30).await;
        let caller = Caller::user("u-big");

        let err = ledger.charge(&caller, u64::MAX, &metadata()).await.unwrap_err();
        assert!(matches!(err, BillingError::DataIntegrity(_)), "{err:?}");
        let err = ledger.grant(&caller, u64::MAX).await.unwrap_err();
        assert!(matches!(err, BillingError::DataIntegrity(_)), "{err:?}");

        assert_eq!(ledger.account(&caller).await.unwrap().balance, 30);
        assert_eq!(ledger.transaction_count(&caller).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_account_untouched() {
        let ledger = ledger(5).await;
        let caller = Caller::session("s-1");

        let err = ledger.charge(&caller, 10, &metadata()).await.unwrap_err();
        assert!(matches!(
            err,
            BillingError::Insufficient {
                required: 10,
                available: 5
            }
        ));
        assert_eq!(ledger.account(&caller).await.unwrap().balance, 5);
        assert_eq!(ledger.transaction_count(&caller).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unlimited_plan_is_never_debited() {
        let ledger = ledger(0).await;
        let caller = Caller::user("vip");
        ledger.set_plan(&caller, Plan::Unlimited).await.unwrap();

        let receipt = ledger.charge(&caller, 1_000, &metadata()).await.unwrap();
        assert_eq!(receipt.charged, 0);
        assert_eq!(receipt.remaining_balance, None);
        assert_eq!(ledger.transaction_count(&caller).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_grant_tops_up() {
        let ledger = ledger(0).await;
        let caller = Caller::user("u-2");
        let account = ledger.grant(&caller, 12).await.unwrap();
        assert_eq!(account.balance, 12);
        assert_eq!(account.plan, Plan::Free);
    }
}
