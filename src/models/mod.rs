//! Data models for the auto-pay service
//!
//! Rows read from the ledger store are parsed into these types at the
//! boundary; nothing downstream works with loosely shaped records.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod borrower;
pub use borrower::*;

/// Remaining balance at or below which a loan counts as fully repaid
pub const COMPLETION_TOLERANCE: Decimal = dec!(0.50);

/// Loan status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Active,
    Completed,
    Declined,
    Cancelled,
    Defaulted,
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Loan {
    pub id: Uuid,
    pub borrower_id: Option<Uuid>,
    /// Individual lender; mutually exclusive with `business_lender_id`
    pub lender_id: Option<Uuid>,
    pub business_lender_id: Option<Uuid>,
    pub amount: Decimal,
    /// Principal plus interest
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub amount_remaining: Decimal,
    pub status: LoanStatus,
    pub borrower_funding_source_url: Option<String>,
    pub lender_funding_source_url: Option<String>,
    /// Set when the lender was invited by email and has no account
    pub invite_token: Option<String>,
    pub invite_email: Option<String>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// The lender was invited as a guest rather than as a registered user
    pub fn is_guest_loan(&self) -> bool {
        has_value(&self.invite_token)
    }

    /// Balance changes produced by applying `payment` to this loan
    ///
    /// The loan completes when no unpaid installments remain or the
    /// remaining balance is within [`COMPLETION_TOLERANCE`]; the remaining
    /// amount is floored at zero.
    pub fn apply_payment(
        &self,
        payment: Decimal,
        unpaid_items_remaining: i64,
        now: DateTime<Utc>,
    ) -> LoanBalanceUpdate {
        let amount_paid = self.amount_paid + payment;
        let raw_remaining = self.total_amount - amount_paid;
        let is_completed = unpaid_items_remaining == 0 || raw_remaining <= COMPLETION_TOLERANCE;

        LoanBalanceUpdate {
            loan_id: self.id,
            amount_paid,
            amount_remaining: raw_remaining.max(Decimal::ZERO),
            status: if is_completed {
                LoanStatus::Completed
            } else {
                self.status
            },
            last_payment_at: now,
            completed_at: is_completed.then_some(now),
        }
    }
}

fn has_value(value: &Option<String>) -> bool {
    non_blank(value).is_some()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// New balance state written back to a loan after a payment
#[derive(Debug, Clone, PartialEq)]
pub struct LoanBalanceUpdate {
    pub loan_id: Uuid,
    pub amount_paid: Decimal,
    pub amount_remaining: Decimal,
    pub status: LoanStatus,
    pub last_payment_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Schedule item status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "schedule_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Scheduled,
    Paid,
    Missed,
}

/// One installment of a loan's repayment plan
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PaymentScheduleItem {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub is_paid: bool,
    pub status: ScheduleStatus,
    /// Idempotency marker: once set, the item is never charged again
    pub transfer_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub platform_fee: Option<Decimal>,
    pub payment_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl PaymentScheduleItem {
    /// Whole days between the due date and `now`, never negative
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        (now.date_naive() - self.due_date).num_days().max(0)
    }
}

/// A person or business taking part in a loan
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    /// Bank account connected on the party's own profile
    pub funding_source_url: Option<String>,
}

impl Party {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "there"
        } else {
            &self.name
        }
    }
}

/// A due installment with its loan and both parties, fetched in one query
#[derive(Debug, Clone)]
pub struct DuePayment {
    pub schedule: PaymentScheduleItem,
    pub loan: Loan,
    pub borrower: Option<Party>,
    pub lender: Option<Party>,
}

impl DuePayment {
    /// Funding source to debit: the handle stamped on the loan, else the
    /// borrower's profile
    pub fn borrower_funding_source(&self) -> Option<&str> {
        non_blank(&self.loan.borrower_funding_source_url).or_else(|| {
            self.borrower
                .as_ref()
                .and_then(|p| non_blank(&p.funding_source_url))
        })
    }

    /// Funding source to credit: the handle stamped on the loan, else the
    /// lender's profile
    pub fn lender_funding_source(&self) -> Option<&str> {
        non_blank(&self.loan.lender_funding_source_url).or_else(|| {
            self.lender
                .as_ref()
                .and_then(|p| non_blank(&p.funding_source_url))
        })
    }

    /// Both parties have a connected funding source, on the loan or on their
    /// profile, so repayments move through the transfer gateway
    pub fn is_gateway_capable(&self) -> bool {
        self.borrower_funding_source().is_some() && self.lender_funding_source().is_some()
    }

    pub fn borrower_name(&self) -> &str {
        self.borrower.as_ref().map(Party::display_name).unwrap_or("there")
    }

    pub fn lender_name(&self) -> &str {
        self.lender.as_ref().map(Party::display_name).unwrap_or("there")
    }
}

/// Transfer status as reported by the gateway
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "transfer_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Transfer direction relative to the loan
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "transfer_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    Repayment,
    Disbursement,
}

/// Ledger record of one logical money movement
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Transfer {
    pub id: Uuid,
    /// Canonical external id (last leg of a facilitated transfer)
    pub dwolla_transfer_id: String,
    pub loan_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
    pub amount: Decimal,
    pub status: TransferStatus,
    pub platform_fee: Decimal,
    pub fee_type: String,
    pub gross_amount: Decimal,
    pub net_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transfer row to insert (ignored if the external id already exists)
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub dwolla_transfer_id: String,
    pub loan_id: Uuid,
    pub transfer_type: TransferType,
    pub amount: Decimal,
    pub status: TransferStatus,
    pub platform_fee: Decimal,
    pub fee_type: String,
    pub gross_amount: Decimal,
    pub net_amount: Decimal,
}

/// Fields set on a schedule item once its transfer has been initiated
#[derive(Debug, Clone)]
pub struct SchedulePaidUpdate {
    pub schedule_id: Uuid,
    pub transfer_id: String,
    pub paid_at: DateTime<Utc>,
    pub platform_fee: Decimal,
}

/// Audit row in the `payments` table
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub loan_id: Uuid,
    pub schedule_id: Uuid,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub status: String,
    pub transfer_id: String,
    pub note: String,
}

/// Row in the `notifications` table
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Option<Uuid>,
    pub loan_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}
