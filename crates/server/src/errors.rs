use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use core_access::CoreAccessError;
use devotio::{BillingError, ErrorCode, GuideError};
use serde_json::json;
use tracing::{error, warn};

/// A custom error type for the server application.
///
/// This enum encapsulates the errors a handler can return, allowing them to be
/// converted into appropriate HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors from the guide subsystem, carrying a stable code.
    Guide(GuideError),
    /// The caller has no guide with this id.
    NotFound(String),
    /// Generic internal server errors.
    Internal(anyhow::Error),
}

impl From<GuideError> for AppError {
    fn from(err: GuideError) -> Self {
        AppError::Guide(err)
    }
}

impl From<CoreAccessError> for AppError {
    fn from(err: CoreAccessError) -> Self {
        AppError::Guide(err.into())
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        AppError::Guide(err.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

/// The HTTP status used for each error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation | ErrorCode::SecurityViolation => StatusCode::BAD_REQUEST,
        ErrorCode::BillingInsufficient => StatusCode::PAYMENT_REQUIRED,
        ErrorCode::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::GenerationError => StatusCode::BAD_GATEWAY,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, body) = match self {
            AppError::Guide(err) => {
                let code = err.code();
                let status = status_for(code);
                if status.is_server_error() {
                    error!(%code, "Request failed: {err}");
                } else {
                    warn!(%code, "Request rejected: {err}");
                }
                // Storage details stay in the logs.
                let message = match code {
                    ErrorCode::StorageError => "A storage error occurred.".to_string(),
                    _ => err.to_string(),
                };
                (
                    status,
                    json!({ "error": message, "code": code, "retryable": err.retryable() }),
                )
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{what} not found") }),
            ),
            AppError::Internal(err) => {
                error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "An internal server error occurred." }),
                )
            }
        };

        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorCode::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::BillingInsufficient), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(status_for(ErrorCode::GenerationError), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorCode::Timeout), StatusCode::GATEWAY_TIMEOUT);

        let response = AppError::Guide(GuideError::BillingInsufficient {
            required: 5,
            available: 1,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            AppError::NotFound("Guide".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
