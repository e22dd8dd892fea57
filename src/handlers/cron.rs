//! Auto-pay trigger handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::autopay::{BatchProcessor, BatchSummary, ManualTriggerRequest, ManualTriggerResponse};
use crate::error::{ApiError, ApiResult};
use crate::middleware::CronAuth;

/// Scheduled entry point: process everything currently due
pub async fn run_auto_pay(
    _auth: CronAuth,
    State(processor): State<Arc<BatchProcessor>>,
) -> ApiResult<Json<BatchSummary>> {
    let summary = processor.run(Utc::now()).await.map_err(|e| {
        tracing::error!("Auto-pay run aborted: {}", e);
        ApiError::Internal(e.to_string())
    })?;

    Ok(Json(summary))
}

/// Manual entry point: charge one named payment, or a loan's earliest due one
pub async fn trigger_auto_pay(
    _auth: CronAuth,
    State(processor): State<Arc<BatchProcessor>>,
    body: Result<Json<ManualTriggerRequest>, JsonRejection>,
) -> ApiResult<Json<ManualTriggerResponse>> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request.validate()?;

    let response = processor.handler().trigger(&request, Utc::now()).await?;
    Ok(Json(response))
}
