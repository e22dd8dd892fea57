//! Route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::middleware;
use crate::state::AppState;

pub fn cron_routes() -> Router<AppState> {
    Router::new().route("/cron/auto-pay", get(run_auto_pay).post(trigger_auto_pay))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/transfers", post(transfer_status_webhook))
}

/// Every route with request tracing applied
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(cron_routes())
        .merge(webhook_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
