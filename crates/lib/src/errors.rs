use crate::billing::BillingError;
use core_access::CoreAccessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by AI providers and the transport underneath them.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Failed to build Reqwest client: {0}")]
    ReqwestClientBuild(reqwest::Error),
    #[error("Failed to send request to AI provider: {0}")]
    AiRequest(reqwest::Error),
    #[error("Failed to deserialize AI provider response: {0}")]
    AiDeserialization(String),
    #[error("AI provider returned an error: {0}")]
    AiApi(String),
    #[error("AI provider rejected the content under a safety filter: {0}")]
    ContentFiltered(String),
    #[error("AI provider stream was interrupted: {0}")]
    StreamInterrupted(String),
    #[error("AI provider is not configured: {0}")]
    MissingAiProvider(String),
    #[error("Failed to connect to storage: {0}")]
    StorageConnection(String),
    #[error("Storage operation failed: {0}")]
    StorageOperationFailed(String),
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl PromptError {
    /// Only safety-filter rejections are worth retrying against another provider.
    pub fn is_content_filter(&self) -> bool {
        matches!(self, PromptError::ContentFiltered(_))
    }
}

/// The stable error codes surfaced to clients in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    SecurityViolation,
    BillingInsufficient,
    StorageError,
    GenerationError,
    Timeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::SecurityViolation => "SECURITY_VIOLATION",
            ErrorCode::BillingInsufficient => "BILLING_INSUFFICIENT",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::GenerationError => "GENERATION_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "VALIDATION" => Some(ErrorCode::Validation),
            "SECURITY_VIOLATION" => Some(ErrorCode::SecurityViolation),
            "BILLING_INSUFFICIENT" => Some(ErrorCode::BillingInsufficient),
            "STORAGE_ERROR" => Some(ErrorCode::StorageError),
            "GENERATION_ERROR" => Some(ErrorCode::GenerationError),
            "TIMEOUT" => Some(ErrorCode::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors of the guide generation subsystem.
#[derive(Error, Debug)]
pub enum GuideError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Input was blocked by content screening: {0}")]
    SecurityViolation(String),
    #[error("Insufficient tokens: {required} required, {available} available")]
    BillingInsufficient { required: u64, available: u64 },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl GuideError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GuideError::Validation(_) => ErrorCode::Validation,
            GuideError::SecurityViolation(_) => ErrorCode::SecurityViolation,
            GuideError::BillingInsufficient { .. } => ErrorCode::BillingInsufficient,
            GuideError::Storage(_) => ErrorCode::StorageError,
            GuideError::Generation(_) => ErrorCode::GenerationError,
            GuideError::Timeout(_) => ErrorCode::Timeout,
        }
    }

    /// Whether resubmitting the same request can succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            GuideError::BillingInsufficient { .. }
                | GuideError::Generation(_)
                | GuideError::Timeout(_)
        )
    }
}

impl From<turso::Error> for GuideError {
    fn from(err: turso::Error) -> Self {
        GuideError::Storage(err.to_string())
    }
}

impl From<CoreAccessError> for GuideError {
    fn from(err: CoreAccessError) -> Self {
        GuideError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GuideError {
    fn from(err: serde_json::Error) -> Self {
        GuideError::Storage(format!("Corrupt JSON column: {err}"))
    }
}

impl From<BillingError> for GuideError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Insufficient {
                required,
                available,
            } => GuideError::BillingInsufficient {
                required,
                available,
            },
            other => GuideError::Storage(other.to_string()),
        }
    }
}

impl From<PromptError> for GuideError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::StorageConnection(msg) | PromptError::StorageOperationFailed(msg) => {
                GuideError::Storage(msg)
            }
            other => GuideError::Generation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_flags_follow_taxonomy() {
        assert!(!GuideError::Validation("x".into()).retryable());
        assert!(!GuideError::SecurityViolation("x".into()).retryable());
        assert!(!GuideError::Storage("x".into()).retryable());
        assert!(GuideError::Generation("x".into()).retryable());
        assert!(GuideError::Timeout("x".into()).retryable());
        assert!(GuideError::BillingInsufficient {
            required: 2,
            available: 1
        }
        .retryable());
    }

    #[test]
    fn test_prompt_errors_map_to_generation_except_storage() {
        let gen: GuideError = PromptError::ContentFiltered("blocked".into()).into();
        assert_eq!(gen.code(), ErrorCode::GenerationError);
        let storage: GuideError = PromptError::StorageConnection("down".into()).into();
        assert_eq!(storage.code(), ErrorCode::StorageError);
    }

    #[test]
    fn test_error_code_wire_names() {
        for code in [
            ErrorCode::Validation,
            ErrorCode::SecurityViolation,
            ErrorCode::BillingInsufficient,
            ErrorCode::StorageError,
            ErrorCode::GenerationError,
            ErrorCode::Timeout,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
    }
}
