//! Trust & reputation engine
//!
//! Converts repayment outcomes into a borrower's trust score, rating and
//! borrowing tier. Every event is applied at most once per schedule item;
//! repeated deliveries are absorbed by a dedup guard.

pub mod rating;
pub mod scoring;
mod service;

pub use service::PgTrustEngine;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rail a completed payment arrived on
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Charged by the auto-pay job outside the transfer gateway
    Auto,
    /// Settled through the transfer gateway (reported by webhook)
    Gateway,
    Manual,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Auto => "auto",
            PaymentMethod::Gateway => "gateway",
            PaymentMethod::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedPaymentEvent {
    pub loan_id: Uuid,
    pub borrower_id: Uuid,
    /// Audit payment row, when one was written
    pub payment_id: Option<Uuid>,
    pub schedule_id: Uuid,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub payment_method: PaymentMethod,
    /// Adjust the score only, leave the repayment counters alone
    pub skip_user_stats: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissedPaymentEvent {
    pub borrower_id: Uuid,
    pub loan_id: Uuid,
    pub schedule_id: Uuid,
    pub days_overdue: i64,
}

/// Outcome of a trust engine call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustUpdate {
    /// `false` when the event was a duplicate or could not be applied
    pub trust_score_updated: bool,
    pub error: Option<String>,
}

impl TrustUpdate {
    pub fn updated() -> Self {
        Self {
            trust_score_updated: true,
            error: None,
        }
    }

    pub fn duplicate() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            trust_score_updated: false,
            error: Some(error.into()),
        }
    }
}

/// Entry points the auto-pay flow calls into. Implementations report
/// failures through [`TrustUpdate::error`] instead of returning an error,
/// so callers never have a reason to abort on them.
#[async_trait]
pub trait TrustEngine: Send + Sync {
    async fn record_completed_payment(&self, event: CompletedPaymentEvent) -> TrustUpdate;

    async fn record_missed_payment(&self, event: MissedPaymentEvent) -> TrustUpdate;
}
