//! Transfer status webhook

use axum::{extract::State, http::HeaderMap, Json};

use crate::error::{ApiError, ApiResult};
use crate::middleware::secrets_match;
use crate::models::ApiResponse;
use crate::settlement::{SettlementResult, TransferStatusEvent};
use crate::state::AppState;

/// Receive a transfer status change from the gateway
pub async fn transfer_status_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<TransferStatusEvent>,
) -> ApiResult<Json<ApiResponse<SettlementResult>>> {
    match &app_state.webhook_secret {
        Some(secret) if !secret.is_empty() => {
            let provided = headers
                .get("X-Webhook-Secret")
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();

            if !secrets_match(provided, secret) {
                return Err(ApiError::Unauthorized(
                    "Unauthorized webhook request".to_string(),
                ));
            }
        }
        _ => {
            // Fail closed when no secret is configured
            tracing::error!("Webhook secret not configured - rejecting request");
            return Err(ApiError::Unavailable(
                "Webhook endpoint is not configured".to_string(),
            ));
        }
    }

    let result = app_state.settlement.apply(&event).await?;

    Ok(Json(ApiResponse {
        success: true,
        data: Some(result),
        error: None,
    }))
}
