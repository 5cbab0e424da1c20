//! # Core Access Schema
//!
//! Table definitions owned by this crate. The `devotio` crate appends these to its own
//! schema list so a single `initialize_schema` call creates everything.

pub const CREATE_USERS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
";

/// One row per (guide, caller). Many rows may point at one canonical guide.
pub const CREATE_GUIDE_OWNERSHIP_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS guide_ownership (
        id TEXT PRIMARY KEY,
        content_id TEXT NOT NULL,
        caller_type TEXT NOT NULL,
        caller_id TEXT NOT NULL,
        is_saved INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (content_id, caller_type, caller_id)
    );
";

pub const ALL_TABLE_CREATION_SQL: &[&str] =
    &[CREATE_USERS_TABLE_SQL, CREATE_GUIDE_OWNERSHIP_TABLE_SQL];
