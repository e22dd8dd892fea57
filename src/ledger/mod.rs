//! Ledger store access
//!
//! Every method is one round trip to the store. No transaction spans more
//! than one call, so callers must treat each write as independently
//! committed. Read-modify-write methods lock the row they change.

mod memory;
mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::PaymentResult;
use crate::models::{
    BorrowerProfile, DuePayment, Loan, LoanBalanceUpdate, NewNotification,
    NewPayment, NewTransfer, SchedulePaidUpdate, Transfer, TransferStatus,
};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Connectivity check for `/health`
    async fn ping(&self) -> PaymentResult<()>;

    /// Unpaid, not-missed installments on active loans due on or before
    /// `today`, oldest first, with loan and party details joined in
    async fn fetch_due_payments(&self, today: NaiveDate) -> PaymentResult<Vec<DuePayment>>;

    /// A single installment with its loan and parties, regardless of status
    async fn get_due_payment(&self, schedule_id: Uuid) -> PaymentResult<Option<DuePayment>>;

    /// Earliest unpaid installment of a loan due on or before `today`
    async fn earliest_unpaid_payment(
        &self,
        loan_id: Uuid,
        today: NaiveDate,
    ) -> PaymentResult<Option<DuePayment>>;

    /// Installment whose idempotency marker equals `transfer_id`
    async fn find_payment_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> PaymentResult<Option<DuePayment>>;

    /// Insert a transfer row, ignoring duplicates on the external id.
    /// Returns `true` when a new row was written.
    async fn upsert_transfer(&self, transfer: &NewTransfer) -> PaymentResult<bool>;

    async fn get_transfer(&self, transfer_id: &str) -> PaymentResult<Option<Transfer>>;

    /// Returns `false` when no transfer has that external id
    async fn update_transfer_status(
        &self,
        transfer_id: &str,
        status: TransferStatus,
    ) -> PaymentResult<bool>;

    /// Flag an installment as paid. Only an item that is still unpaid and
    /// has no transfer id is updated; anything else is an error.
    async fn mark_schedule_paid(&self, update: &SchedulePaidUpdate) -> PaymentResult<()>;

    /// Flag an installment as missed, leaving `is_paid` and `transfer_id` untouched
    async fn mark_schedule_missed(&self, schedule_id: Uuid, note: &str) -> PaymentResult<()>;

    /// Insert an audit payment row and return its id
    async fn insert_payment(&self, payment: &NewPayment) -> PaymentResult<Uuid>;

    /// Point the installment at its audit payment row
    async fn link_schedule_payment(&self, schedule_id: Uuid, payment_id: Uuid) -> PaymentResult<()>;

    async fn count_unpaid_schedule_items(&self, loan_id: Uuid) -> PaymentResult<i64>;

    async fn get_loan(&self, loan_id: Uuid) -> PaymentResult<Option<Loan>>;

    async fn update_loan_balance(&self, update: &LoanBalanceUpdate) -> PaymentResult<()>;

    /// Increment `payments_missed` and apply the rating ladder as one atomic
    /// step, returning the updated profile. `None` when the borrower has no
    /// profile.
    async fn register_missed_payment(
        &self,
        borrower_id: Uuid,
    ) -> PaymentResult<Option<BorrowerProfile>>;

    async fn record_notification(&self, notification: &NewNotification) -> PaymentResult<()>;
}
