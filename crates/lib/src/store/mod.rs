//! Durable state of the subsystem: canonical content and in-flight attempts.

pub mod content;
pub mod inflight;

pub use content::{ContentRecord, ContentStore, InsertOutcome, NewContent};
pub use inflight::{
    AttemptStatus, ClaimOutcome, Finalization, InFlightRecord, InFlightRegistry,
};

use crate::errors::GuideError;
use turso::{Row, Value};

/// Reads a nullable TEXT column.
pub(crate) fn optional_text(row: &Row, index: usize) -> Result<Option<String>, GuideError> {
    match row.get_value(index)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(GuideError::Storage(format!(
            "Expected TEXT or NULL in column {index}, got {other:?}"
        ))),
    }
}

pub(crate) fn integer(row: &Row, index: usize) -> Result<i64, GuideError> {
    match row.get_value(index)? {
        Value::Integer(i) => Ok(i),
        other => Err(GuideError::Storage(format!(
            "Expected INTEGER in column {index}, got {other:?}"
        ))),
    }
}
