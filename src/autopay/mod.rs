//! Auto-pay batch processing
//!
//! [`BatchProcessor`] runs one pass over every due installment;
//! [`PaymentHandler`] applies the charge workflow to a single installment
//! and is shared by the scheduled batch and the manual trigger.

mod batch;
mod handler;
mod manual;

pub use batch::{plan_batch, BatchPlan, BatchProcessor, BatchSummary};
pub use handler::{check_gates, FundingSources, PaymentHandler};
pub use manual::{ManualTriggerRequest, ManualTriggerResponse, ManualFee};

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::gateway::FeeBreakdown;

/// Tunables for one auto-pay run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoPayConfig {
    /// Most installments handled per run; the rest wait for the next run
    pub batch_size: usize,
    /// Installments in flight at once
    pub concurrency: usize,
    /// Base URL used for links in emails
    pub app_url: String,
    pub currency: String,
}

impl AutoPayConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 25;
    pub const DEFAULT_CONCURRENCY: usize = 5;

    pub fn new(batch_size: usize, concurrency: usize, app_url: String) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            app_url,
            currency: "USD".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: String) -> Self {
        self.currency = currency;
        self
    }
}

impl Default for AutoPayConfig {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BATCH_SIZE,
            Self::DEFAULT_CONCURRENCY,
            "http://localhost:3000".to_string(),
        )
    }
}

/// Which side of the loan is missing a bank connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanParty {
    Borrower,
    Lender,
}

impl LoanParty {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanParty::Borrower => "borrower",
            LoanParty::Lender => "lender",
        }
    }
}

/// Why an installment was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyPaid,
    AlreadyTransferred { transfer_id: String },
    MissingFundingSource(LoanParty),
}

impl SkipReason {
    pub fn describe(&self) -> String {
        match self {
            SkipReason::AlreadyPaid => "already paid".to_string(),
            SkipReason::AlreadyTransferred { transfer_id } => {
                format!("already transferred ({})", transfer_id)
            }
            SkipReason::MissingFundingSource(party) => {
                format!("{} has no bank account connected", party.as_str())
            }
        }
    }
}

impl From<SkipReason> for PaymentError {
    fn from(reason: SkipReason) -> Self {
        match reason {
            SkipReason::AlreadyPaid => PaymentError::AlreadyPaid,
            SkipReason::AlreadyTransferred { transfer_id } => {
                PaymentError::AlreadyTransferred { transfer_id }
            }
            SkipReason::MissingFundingSource(party) => {
                PaymentError::MissingFundingSource(format!(
                    "{} has no bank account connected",
                    party.as_str()
                ))
            }
        }
    }
}

/// Result of a successful charge
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedPayment {
    pub schedule_id: Uuid,
    pub loan_id: Uuid,
    pub transfer_id: String,
    pub amount: Decimal,
    pub amount_remaining: Decimal,
    pub loan_completed: bool,
    /// Audit row in `payments`, absent if that insert failed
    pub payment_id: Option<Uuid>,
    pub fee: FeeBreakdown,
}

/// Terminal outcome of handling one installment. Failures are the `Err`
/// side of the handler's result.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Processed(ProcessedPayment),
    Skipped(SkipReason),
}
