use super::{ApiResponse, AppError, AppState};
use crate::auth::middleware::CallerIdentity;
use axum::{extract::State, Json};
use devotio::{Account, TokenLedger};

/// `GET /account`: the caller's plan and token balance.
pub async fn account_handler(
    State(app_state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
) -> Result<Json<ApiResponse<Account>>, AppError> {
    let account = app_state.ledger.account(&caller).await?;
    Ok(Json(ApiResponse { result: account }))
}
