//! Caller identity.
//!
//! Every request is made either by an authenticated user or by an anonymous session.
//! The two are mutually exclusive and are persisted as a `(caller_type, caller_id)`
//! pair wherever a row belongs to a caller.

use crate::CoreAccessError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerKind {
    User,
    Session,
}

impl CallerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerKind::User => "user",
            CallerKind::Session => "session",
        }
    }
}

/// The identity a request is made under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Caller {
    Authenticated { user_id: String },
    Anonymous { session_id: String },
}

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        Caller::Authenticated {
            user_id: user_id.into(),
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Caller::Anonymous {
            session_id: session_id.into(),
        }
    }

    pub fn kind(&self) -> CallerKind {
        match self {
            Caller::Authenticated { .. } => CallerKind::User,
            Caller::Anonymous { .. } => CallerKind::Session,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Caller::Authenticated { user_id } => user_id,
            Caller::Anonymous { session_id } => session_id,
        }
    }

    /// Rebuilds a caller from its persisted `(caller_type, caller_id)` columns.
    pub fn from_parts(kind: &str, id: String) -> Result<Self, CoreAccessError> {
        match kind {
            "user" => Ok(Caller::Authenticated { user_id: id }),
            "session" => Ok(Caller::Anonymous { session_id: id }),
            other => Err(CoreAccessError::DataIntegrity(format!(
                "Unknown caller type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_parts_round_trip() {
        let caller = Caller::session("abc");
        let rebuilt = Caller::from_parts(caller.kind().as_str(), caller.id().to_string()).unwrap();
        assert_eq!(caller, rebuilt);
        assert_eq!(caller.to_string(), "session:abc");
        assert!(Caller::from_parts("robot", "x".into()).is_err());
    }

    #[test]
    fn test_user_and_session_with_same_id_differ() {
        assert_ne!(Caller::user("42"), Caller::session("42"));
    }
}
