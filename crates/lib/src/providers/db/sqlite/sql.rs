//! # SQLite Schema
//!
//! Table definitions for the guide generation subsystem. Every statement is idempotent
//! and runs on each startup.

/// Canonical guide content. One row per key, shared by every owner.
///
/// `input_value` is NULL for question inputs, which may contain personal details.
/// `creator_*` is NULL for legacy rows that predate creator tracking.
pub const CREATE_GUIDE_CONTENT_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS guide_content (
        id TEXT PRIMARY KEY,
        input_type TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        language TEXT NOT NULL,
        mode TEXT NOT NULL,
        input_value TEXT,
        sections_json TEXT NOT NULL,
        enrichment_json TEXT NOT NULL DEFAULT '{}',
        creator_type TEXT,
        creator_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (input_type, fingerprint, language, mode)
    );
";

/// At most one row per key. `last_heartbeat` is unix milliseconds so staleness can be
/// compared and swapped atomically.
pub const CREATE_GUIDE_INFLIGHT_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS guide_inflight (
        id TEXT PRIMARY KEY,
        input_type TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        language TEXT NOT NULL,
        mode TEXT NOT NULL,
        owner_type TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL,
        sections_json TEXT NOT NULL DEFAULT '{}',
        last_heartbeat INTEGER NOT NULL,
        error_code TEXT,
        error_message TEXT,
        content_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (input_type, fingerprint, language, mode)
    );
";

pub const CREATE_GENERATION_USAGE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS generation_usage (
        id TEXT PRIMARY KEY,
        content_id TEXT,
        fingerprint TEXT NOT NULL,
        mode TEXT NOT NULL,
        language TEXT NOT NULL,
        caller_type TEXT NOT NULL,
        caller_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        model TEXT,
        prompt_tokens INTEGER NOT NULL DEFAULT 0,
        completion_tokens INTEGER NOT NULL DEFAULT 0,
        cost_usd REAL NOT NULL DEFAULT 0,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        tokens_charged INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
";

pub const CREATE_TOKEN_ACCOUNTS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS token_accounts (
        caller_type TEXT NOT NULL,
        caller_id TEXT NOT NULL,
        plan TEXT NOT NULL,
        balance INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (caller_type, caller_id)
    );
";

pub const CREATE_TOKEN_TRANSACTIONS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS token_transactions (
        id TEXT PRIMARY KEY,
        caller_type TEXT NOT NULL,
        caller_id TEXT NOT NULL,
        amount INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

/// Every statement needed by the subsystem, including the identity and ownership
/// tables owned by `core_access`.
pub const ALL_TABLE_CREATION_SQL: &[&str] = &[
    core_access::sql::CREATE_USERS_TABLE_SQL,
    core_access::sql::CREATE_GUIDE_OWNERSHIP_TABLE_SQL,
    CREATE_GUIDE_CONTENT_TABLE_SQL,
    CREATE_GUIDE_INFLIGHT_TABLE_SQL,
    CREATE_GENERATION_USAGE_TABLE_SQL,
    CREATE_TOKEN_ACCOUNTS_TABLE_SQL,
    CREATE_TOKEN_TRANSACTIONS_TABLE_SQL,
];
