//! # Shared Constants
//!
//! Defaults shared by the library and the server. The server's configuration layer
//! overrides most of them.

use std::time::Duration;

/// The default path for the main application SQLite database.
pub const DEFAULT_DB_FILE: &str = "db/devotio.db";

/// A `running` attempt without a heartbeat for this long is considered abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Pollers give up after this long, whatever the attempt's state.
pub const DEFAULT_POLL_CEILING: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Tokens granted to a caller the first time the ledger sees them.
pub const DEFAULT_STARTING_BALANCE: u64 = 50;

pub const DEFAULT_MAX_INPUT_CHARS: usize = 500;

/// Capacity of the per-request event channel between the worker and the transport.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
