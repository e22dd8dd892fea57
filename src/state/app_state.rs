//! Application state shared across handlers

use axum::extract::FromRef;
use std::sync::Arc;

use crate::autopay::BatchProcessor;
use crate::ledger::LedgerStore;
use crate::middleware::CronSecret;
use crate::settlement::SettlementService;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub batch_processor: Arc<BatchProcessor>,
    pub settlement: Arc<SettlementService>,
    pub cron_secret: CronSecret,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        batch_processor: Arc<BatchProcessor>,
        settlement: Arc<SettlementService>,
        cron_secret: Option<String>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            store,
            batch_processor,
            settlement,
            cron_secret: CronSecret::new(cron_secret),
            webhook_secret,
        }
    }
}

impl FromRef<AppState> for CronSecret {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.cron_secret.clone()
    }
}

impl FromRef<AppState> for Arc<BatchProcessor> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.batch_processor.clone()
    }
}

impl FromRef<AppState> for Arc<SettlementService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.settlement.clone()
    }
}
